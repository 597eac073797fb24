use super::{AxonActivation, AxonKind, Transform, Transformed};
use crate::{error::AxonError, neurons::Neurons};
use anyhow::{bail, Result};
use ndarray::ArrayView2;

/// Identity in both directions, for skip connections.
#[derive(Clone, Debug, PartialEq)]
pub struct PassThroughAxon {
    left: Neurons,
    right: Neurons,
}

impl PassThroughAxon {
    /// Creates the axon.
    ///
    /// **Errors**
    ///
    /// If the counts or bias units differ.
    pub fn new(left: Neurons, right: Neurons) -> Result<Self> {
        if left != right {
            bail!(AxonError::configuration(format!(
                "pass through axon cannot map {left:?} to {right:?}"
            )));
        }
        Ok(Self { left, right })
    }
    /// The left neurons.
    pub fn left_neurons(&self) -> Neurons {
        self.left
    }
    /// The right neurons.
    pub fn right_neurons(&self) -> Neurons {
        self.right
    }
}

impl Transform for PassThroughAxon {
    fn kind(&self) -> AxonKind {
        AxonKind::PassThrough
    }
    fn left_count(&self) -> usize {
        self.left.count()
    }
    fn right_count(&self) -> usize {
        self.right.count()
    }
    fn supports_input_dropout(&self) -> bool {
        false
    }
    fn left_to_right(&self, input: ArrayView2<f32>) -> Result<Transformed> {
        Ok(input.to_owned().into())
    }
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        _previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed> {
        Ok(input.to_owned().into())
    }
}
