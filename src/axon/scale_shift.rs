use super::{into_standard_shape, AxonActivation, AxonGradients, AxonKind, Transform, Transformed};
use crate::{
    context::AxonContext,
    error::AxonError,
    neurons::{Neurons, Neurons3D},
    weights::{AxonWeights, BiasInit},
};
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Initial scale and shift vectors.
///
/// Defaults:
/// - scale: ones
/// - shift: zeros
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScaleAndShiftConfig {
    scale: Option<Array1<f32>>,
    shift: Option<Array1<f32>>,
}

impl ScaleAndShiftConfig {
    /// Creates the default config.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the scale, one value per channel.
    pub fn with_scale(mut self, scale: Array1<f32>) -> Self {
        self.scale.replace(scale);
        self
    }
    /// Sets the shift, one value per channel.
    pub fn with_shift(mut self, shift: Array1<f32>) -> Self {
        self.shift.replace(shift);
        self
    }
    /// The scale, if set.
    pub fn scale(&self) -> Option<ArrayView1<f32>> {
        self.scale.as_ref().map(Array1::view)
    }
    /// The shift, if set.
    pub fn shift(&self) -> Option<ArrayView1<f32>> {
        self.shift.as_ref().map(Array1::view)
    }
}

/// Elementwise `x * scale + shift`, the affine step of batch normalization.
///
/// Scale and shift hold one value per channel: per feature for flat neurons, per depth slice
/// for spatial neurons. The scale is stored as the `channels x 1` connection weights and the
/// shift as the left to right biases, carried by the required left bias unit. A right bias unit
/// is ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct ScaleAndShiftAxon {
    left: Neurons,
    right: Neurons,
    channel_size: usize,
    weights: AxonWeights,
}

impl ScaleAndShiftAxon {
    /// Creates an axon with one scale and shift per feature.
    ///
    /// **Errors**
    ///
    /// - The counts differ or are zero.
    /// - The left neurons have no bias unit.
    /// - The scale or shift do not have one value per feature.
    pub fn new(left: Neurons, right: Neurons, config: ScaleAndShiftConfig) -> Result<Self> {
        Self::build(left, right, 1, config)
    }
    /// Creates an axon with one scale and shift per channel.
    ///
    /// **Errors**
    ///
    /// See [`.new()`](Self::new()). The shapes must also match.
    pub fn spatial(left: Neurons3D, right: Neurons3D, config: ScaleAndShiftConfig) -> Result<Self> {
        if left.depth() != right.depth() || left.grid() != right.grid() {
            bail!(AxonError::configuration(format!(
                "scale and shift cannot map {left:?} to {right:?}"
            )));
        }
        Self::build(left.flatten(), right.flatten(), left.grid(), config)
    }
    fn build(
        left: Neurons,
        right: Neurons,
        channel_size: usize,
        config: ScaleAndShiftConfig,
    ) -> Result<Self> {
        if left.count() != right.count() || left.count() == 0 {
            bail!(AxonError::configuration(format!(
                "scale and shift requires equal, nonzero counts, found {left:?} -> {right:?}"
            )));
        }
        if !left.has_bias_unit() {
            bail!(AxonError::configuration(
                "scale and shift requires a left bias unit for the shift"
            ));
        }
        let channels = left.count() / channel_size;
        let ScaleAndShiftConfig { scale, shift } = config;
        let scale = scale.unwrap_or_else(|| Array1::ones(channels));
        let weights = AxonWeights::new(
            1,
            channels,
            Some(scale.insert_axis(Axis(1))),
            BiasInit::from_option(true, channels, shift),
            BiasInit::None,
        )?;
        log::debug!("scale and shift axon {left:?}, {channels} channels");
        Ok(Self {
            left,
            right,
            channel_size,
            weights,
        })
    }
    /// The number of scale and shift values.
    pub fn channels(&self) -> usize {
        self.weights.outputs()
    }
    /// The scale.
    pub fn scale(&self) -> ArrayView1<f32> {
        self.weights.connection_weights().index_axis_move(Axis(1), 0)
    }
    /// The left neurons.
    pub fn left_neurons(&self) -> Neurons {
        self.left
    }
    /// The right neurons.
    pub fn right_neurons(&self) -> Neurons {
        self.right
    }
    /// The weight store.
    pub fn weights(&self) -> &AxonWeights {
        &self.weights
    }
    pub(super) fn weights_mut(&mut self) -> &mut AxonWeights {
        &mut self.weights
    }
    // Per channel values as a per feature column.
    fn expand(&self, values: ArrayView1<f32>) -> Array2<f32> {
        Array2::from_shape_fn((self.left.count(), 1), |(f, _)| {
            values[f / self.channel_size]
        })
    }
    // Per feature values summed per channel.
    fn reduce(&self, values: Array1<f32>) -> Result<Array1<f32>> {
        let values = into_standard_shape(
            values.insert_axis(Axis(1)),
            (self.channels(), self.channel_size),
        )?;
        Ok(values.sum_axis(Axis(1)))
    }
}

impl Transform for ScaleAndShiftAxon {
    fn kind(&self) -> AxonKind {
        AxonKind::ScaleAndShift
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
        let mut output = &input * &self.expand(self.scale());
        if let Some(shift) = self.weights.left_to_right_biases() {
            output += &self.expand(shift);
        }
        Ok(output.into())
    }
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        _previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed> {
        Ok((&input * &self.expand(self.scale())).into())
    }
    fn gradients(
        &self,
        upstream: ArrayView2<f32>,
        forward: &AxonActivation,
        context: &AxonContext,
    ) -> Result<Option<AxonGradients>> {
        let input = forward.post_dropout_input().features();
        let scale = self.reduce((&upstream * &input).sum_axis(Axis(1)))?;
        let mut connection_weights = scale.insert_axis(Axis(1));
        let lambda = context.regularisation_lambda();
        if lambda != 0. {
            connection_weights.scaled_add(lambda, &self.weights.connection_weights());
        }
        let shift = self.reduce(upstream.sum_axis(Axis(1)))?;
        Ok(Some(AxonGradients::new(connection_weights, Some(shift))))
    }
}
