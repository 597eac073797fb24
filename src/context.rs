//! Per-call configuration and direction markers.
use crate::error::AxonError;
use anyhow::{bail, Result};
use derive_more::Display;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Direction of a push through an axon.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Direction {
    /// Left neurons to right neurons (inference).
    LeftToRight,
    /// Right neurons to left neurons (gradient or reconstruction).
    RightToLeft,
}

impl Direction {
    /// The paired direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::LeftToRight => Self::RightToLeft,
            Self::RightToLeft => Self::LeftToRight,
        }
    }
}

/// Whether an adjustment is added to or subtracted from the stored values.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AdjustmentDirection {
    /// `stored += delta`
    Addition,
    /// `stored -= delta`
    Subtraction,
}

/// Configuration supplied with every push.
///
/// Defaults:
/// - keep_probability: 1 (no dropout)
/// - freeze_out: false
/// - regularisation_lambda: 0
/// - seed: None (dropout masks are drawn from the thread rng)
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AxonContext {
    keep_probability: f32,
    freeze_out: bool,
    regularisation_lambda: f32,
    seed: Option<u64>,
}

impl Default for AxonContext {
    fn default() -> Self {
        Self {
            keep_probability: 1.,
            freeze_out: false,
            regularisation_lambda: 0.,
            seed: None,
        }
    }
}

impl AxonContext {
    /// Creates the default context.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the probability that each input cell survives dropout.
    ///
    /// **Errors**
    ///
    /// If `keep_probability` is not in (0, 1]. A probability of 0 cannot be inverted when
    /// rescaling the survivors.
    pub fn with_keep_probability(mut self, keep_probability: f32) -> Result<Self> {
        if !(keep_probability > 0. && keep_probability <= 1.) {
            bail!(AxonError::InvalidProbability(keep_probability));
        }
        self.keep_probability = keep_probability;
        Ok(self)
    }
    /// Disables weight adjustment for trainable axons.
    pub fn with_freeze_out(mut self, freeze_out: bool) -> Self {
        self.freeze_out = freeze_out;
        self
    }
    /// Adds `lambda * weights` to computed weight gradients.
    pub fn with_regularisation_lambda(mut self, regularisation_lambda: f32) -> Self {
        self.regularisation_lambda = regularisation_lambda;
        self
    }
    /// Seeds dropout mask sampling.
    ///
    /// Every push with a seeded context draws its mask from a fresh rng with this seed, so
    /// inputs of the same shape get the same mask on every call. Change the seed between
    /// steps for independent masks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed.replace(seed);
        self
    }
    /// The dropout keep probability.
    pub fn keep_probability(&self) -> f32 {
        self.keep_probability
    }
    /// Whether weights are frozen.
    pub fn freeze_out(&self) -> bool {
        self.freeze_out
    }
    /// The regularisation strength.
    pub fn regularisation_lambda(&self) -> f32 {
        self.regularisation_lambda
    }
    /// The dropout seed.
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
    pub(crate) fn dropout_requested(&self) -> bool {
        self.keep_probability != 1.
    }
}
