use super::{AxonActivation, AxonGradients, AxonKind, Transform, Transformed};
use crate::{
    context::AxonContext,
    error::AxonError,
    neurons::Neurons,
    weights::{AxonWeights, BiasInit},
};
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// `weights · input + left to right biases`.
pub(super) fn dense_left_to_right(weights: &AxonWeights, input: ArrayView2<f32>) -> Array2<f32> {
    let mut output = weights.connection_weights().dot(&input);
    if let Some(biases) = weights.left_to_right_biases() {
        output += &biases.insert_axis(Axis(1));
    }
    output
}

/// `weightsᵀ · input`, without biases.
pub(super) fn dense_right_to_left(weights: &AxonWeights, input: ArrayView2<f32>) -> Array2<f32> {
    weights.connection_weights().t().dot(&input)
}

/// `upstream · inputᵀ + λ weights`, with the bias gradient summed over columns.
pub(super) fn dense_gradients(
    weights: &AxonWeights,
    upstream: ArrayView2<f32>,
    input: ArrayView2<f32>,
    context: &AxonContext,
) -> AxonGradients {
    let mut connection_weights = upstream.dot(&input.t());
    let lambda = context.regularisation_lambda();
    if lambda != 0. {
        connection_weights.scaled_add(lambda, &weights.connection_weights());
    }
    let left_to_right_biases = weights
        .left_to_right_biases()
        .map(|_| upstream.sum_axis(Axis(1)));
    AxonGradients::new(connection_weights, left_to_right_biases)
}

fn add_biases(output: &mut Array2<f32>, biases: Option<ArrayView1<f32>>) {
    if let Some(biases) = biases {
        *output += &biases.insert_axis(Axis(1));
    }
}

/// Dense connection between two flat groups of neurons.
///
/// Left to right computes `W · x + b`, right to left computes `Wᵀ · g + c`, where `b` exists when
/// the left neurons have a bias unit and `c` exists when the right neurons have one.
#[derive(Clone, Debug, PartialEq)]
pub struct FullyConnectedAxon {
    left: Neurons,
    right: Neurons,
    weights: AxonWeights,
}

impl FullyConnectedAxon {
    /// Creates an axon with randomly initialized weights and zero biases.
    ///
    /// **Errors**
    ///
    /// If either side has no neurons.
    pub fn new(left: Neurons, right: Neurons) -> Result<Self> {
        Self::from_parts(left, right, None, None, None)
    }
    /// Creates an axon from optional existing weights.
    ///
    /// `connection_weights` is `right.count() x left.count()`.
    ///
    /// **Errors**
    ///
    /// - Either side has no neurons.
    /// - Biases are supplied for a side without a bias unit.
    /// - A supplied value has the wrong shape.
    pub fn from_parts(
        left: Neurons,
        right: Neurons,
        connection_weights: Option<Array2<f32>>,
        left_to_right_biases: Option<Array1<f32>>,
        right_to_left_biases: Option<Array1<f32>>,
    ) -> Result<Self> {
        if left.count() == 0 || right.count() == 0 {
            bail!(AxonError::configuration(format!(
                "empty fully connected axon {left:?} -> {right:?}"
            )));
        }
        if left_to_right_biases.is_some() && !left.has_bias_unit() {
            bail!(AxonError::configuration(
                "left to right biases require a left bias unit"
            ));
        }
        if right_to_left_biases.is_some() && !right.has_bias_unit() {
            bail!(AxonError::configuration(
                "right to left biases require a right bias unit"
            ));
        }
        let weights = AxonWeights::new(
            left.count(),
            right.count(),
            connection_weights,
            BiasInit::from_option(left.has_bias_unit(), right.count(), left_to_right_biases),
            BiasInit::from_option(right.has_bias_unit(), left.count(), right_to_left_biases),
        )?;
        log::debug!("fully connected axon {left:?} -> {right:?}");
        Ok(Self {
            left,
            right,
            weights,
        })
    }
    /// Restricts the connections, see [`AxonWeights::with_connection_weights_mask()`].
    ///
    /// **Errors**
    ///
    /// If the mask is not the shape of the connection weights.
    pub fn with_connection_weights_mask(mut self, mask: Array2<f32>) -> Result<Self> {
        self.weights = self.weights.with_connection_weights_mask(mask)?;
        Ok(self)
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
}

impl Transform for FullyConnectedAxon {
    fn kind(&self) -> AxonKind {
        AxonKind::FullyConnected
    }
    fn left_count(&self) -> usize {
        self.left.count()
    }
    fn right_count(&self) -> usize {
        self.right.count()
    }
    fn supports_input_dropout(&self) -> bool {
        true
    }
    fn left_to_right(&self, input: ArrayView2<f32>) -> Result<Transformed> {
        Ok(dense_left_to_right(&self.weights, input).into())
    }
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        _previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed> {
        let mut output = dense_right_to_left(&self.weights, input);
        add_biases(&mut output, self.weights.right_to_left_biases());
        Ok(output.into())
    }
    fn gradients(
        &self,
        upstream: ArrayView2<f32>,
        forward: &AxonActivation,
        context: &AxonContext,
    ) -> Result<Option<AxonGradients>> {
        let input = forward.post_dropout_input().features();
        Ok(Some(dense_gradients(&self.weights, upstream, input, context)))
    }
}
