//! Axons: the connections between two groups of neurons.
//!
//! An [`Axon`] pushes an [`ActivationBatch`] left to right (inference) or right to left
//! (gradients / reconstruction), returning an [`AxonActivation`]. Every variant shares the same
//! scaffolding, applied by [`Axon::push_left_to_right()`] and [`Axon::push_right_to_left()`]:
//!
//! 1. The batch must have rows spanning features. A bias row is stripped.
//! 2. The feature count must match the neurons on the input side.
//! 3. If the context requests dropout, each input cell is kept with the keep probability and the
//!    survivors are scaled by its inverse. Only fully connected and convolutional axons accept
//!    dropout.
//! 4. The variant transforms the post dropout input.
//! 5. If the activation of the paired direction carries an input dropout mask, that mask is
//!    applied to the output.
use crate::{
    activation::ActivationBatch,
    context::{AdjustmentDirection, AxonContext, Direction},
    error::AxonError,
    weights::AxonWeights,
};
use anyhow::{bail, Result};
use derive_more::Display;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use parking_lot::RwLock;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod convolutional;
mod dropout;
mod fully_connected;
mod pass_through;
mod pooling;
mod scale_shift;
#[cfg(test)]
mod tests;

pub use convolutional::ConvolutionalAxon;
pub use fully_connected::FullyConnectedAxon;
pub use pass_through::PassThroughAxon;
pub use pooling::{AveragePoolingAxon, MaxPoolingAxon};
pub use scale_shift::{ScaleAndShiftAxon, ScaleAndShiftConfig};

/// The variant of an [`Axon`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AxonKind {
    /// [`FullyConnectedAxon`]
    FullyConnected,
    /// [`ConvolutionalAxon`]
    Convolutional,
    /// [`MaxPoolingAxon`]
    MaxPooling,
    /// [`AveragePoolingAxon`]
    AveragePooling,
    /// [`ScaleAndShiftAxon`]
    ScaleAndShift,
    /// [`PassThroughAxon`]
    PassThrough,
}

/// Unscaled gradients of a trainable axon's weights, summed over the examples.
#[derive(Clone, Debug, PartialEq)]
pub struct AxonGradients {
    connection_weights: Array2<f32>,
    left_to_right_biases: Option<Array1<f32>>,
}

impl AxonGradients {
    pub(crate) fn new(
        connection_weights: Array2<f32>,
        left_to_right_biases: Option<Array1<f32>>,
    ) -> Self {
        Self {
            connection_weights,
            left_to_right_biases,
        }
    }
    /// The connection weights gradient, shaped like the connection weights.
    pub fn connection_weights(&self) -> ArrayView2<f32> {
        self.connection_weights.view()
    }
    /// The left to right biases gradient, if the axon has them.
    pub fn left_to_right_biases(&self) -> Option<ArrayView1<f32>> {
        self.left_to_right_biases.as_ref().map(Array1::view)
    }
}

/// The result of one push through an axon.
#[derive(Clone, Debug)]
pub struct AxonActivation {
    output: ActivationBatch,
    post_dropout_input: ActivationBatch,
    input_dropout_mask: Option<Array2<f32>>,
    keep_probability: f32,
    selection_mask: Option<Array2<f32>>,
    gradients: Option<AxonGradients>,
    kind: AxonKind,
    direction: Direction,
}

impl AxonActivation {
    /// The output batch.
    pub fn output(&self) -> &ActivationBatch {
        &self.output
    }
    /// Consumes the activation, returning the output batch.
    pub fn into_output(self) -> ActivationBatch {
        self.output
    }
    /// The input actually transformed, after dropout. Immutable.
    pub fn post_dropout_input(&self) -> &ActivationBatch {
        &self.post_dropout_input
    }
    /// The binary dropout mask applied to the input, if any.
    pub fn input_dropout_mask(&self) -> Option<ArrayView2<f32>> {
        self.input_dropout_mask.as_ref().map(Array2::view)
    }
    /// The keep probability used to scale the input dropout survivors, 1 without dropout.
    pub fn keep_probability(&self) -> f32 {
        self.keep_probability
    }
    /// For max pooling, the one hot selection of each window's maximum in the window columns.
    pub fn selection_mask(&self) -> Option<ArrayView2<f32>> {
        self.selection_mask.as_ref().map(Array2::view)
    }
    /// The weight gradients, for right to left pushes through trainable axons that were given
    /// the forward activation.
    pub fn gradients(&self) -> Option<&AxonGradients> {
        self.gradients.as_ref()
    }
    /// The variant of the axon that produced this activation.
    pub fn kind(&self) -> AxonKind {
        self.kind
    }
    /// The direction of the push.
    pub fn direction(&self) -> Direction {
        self.direction
    }
    /// Multiplies the output by `mask`.
    ///
    /// Used to mask an output after the fact, once the paired direction's dropout mask is known.
    ///
    /// **Errors**
    ///
    /// If `mask` is not the shape of the output.
    pub fn apply_output_dropout_mask(&mut self, mask: ArrayView2<f32>) -> Result<()> {
        let mut output = self.output.data_mut()?;
        if output.raw_dim() != mask.raw_dim() {
            bail!(AxonError::shape(
                format!("output dropout mask {:?}", output.shape()),
                format!("{:?}", mask.shape()),
            ));
        }
        output *= &mask;
        Ok(())
    }
}

/// Reshapes `array` in row major order.
pub(crate) fn into_standard_shape(array: Array2<f32>, dim: (usize, usize)) -> Result<Array2<f32>> {
    let array = if array.is_standard_layout() {
        array
    } else {
        array.as_standard_layout().into_owned()
    };
    Ok(array.into_shape(dim)?)
}

/// Result of a variant's transform.
pub(crate) struct Transformed {
    pub(crate) output: Array2<f32>,
    pub(crate) selection_mask: Option<Array2<f32>>,
}

impl From<Array2<f32>> for Transformed {
    fn from(output: Array2<f32>) -> Self {
        Self {
            output,
            selection_mask: None,
        }
    }
}

/// The transform of one variant, invoked by the shared scaffolding.
pub(crate) trait Transform {
    fn kind(&self) -> AxonKind;
    fn left_count(&self) -> usize;
    fn right_count(&self) -> usize;
    fn supports_input_dropout(&self) -> bool;
    fn left_to_right(&self, input: ArrayView2<f32>) -> Result<Transformed>;
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed>;
    /// Gradients for `upstream` (right side) given the forward activation.
    #[allow(unused_variables)]
    fn gradients(
        &self,
        upstream: ArrayView2<f32>,
        forward: &AxonActivation,
        context: &AxonContext,
    ) -> Result<Option<AxonGradients>> {
        Ok(None)
    }
}

/// A connection between two groups of neurons.
#[derive(Clone, Debug)]
pub enum Axon {
    /// Dense weights.
    FullyConnected(FullyConnectedAxon),
    /// Shared weights over spatial windows.
    Convolutional(ConvolutionalAxon),
    /// Window maximum.
    MaxPooling(MaxPoolingAxon),
    /// Window mean.
    AveragePooling(AveragePoolingAxon),
    /// Elementwise scale and shift.
    ScaleAndShift(ScaleAndShiftAxon),
    /// Identity.
    PassThrough(PassThroughAxon),
}

/// An axon shared between threads. Pushes take a read lock, adjustments a write lock.
pub type SharedAxon = Arc<RwLock<Axon>>;

macro_rules! impl_from_axon {
    ($($variant:ident($axon:ty)),* $(,)?) => {
        $(
            impl From<$axon> for Axon {
                fn from(axon: $axon) -> Self {
                    Self::$variant(axon)
                }
            }
        )*
    };
}

impl_from_axon!(
    FullyConnected(FullyConnectedAxon),
    Convolutional(ConvolutionalAxon),
    MaxPooling(MaxPoolingAxon),
    AveragePooling(AveragePoolingAxon),
    ScaleAndShift(ScaleAndShiftAxon),
    PassThrough(PassThroughAxon),
);

impl Axon {
    fn transform(&self) -> &dyn Transform {
        match self {
            Self::FullyConnected(axon) => axon,
            Self::Convolutional(axon) => axon,
            Self::MaxPooling(axon) => axon,
            Self::AveragePooling(axon) => axon,
            Self::ScaleAndShift(axon) => axon,
            Self::PassThrough(axon) => axon,
        }
    }
    /// The variant.
    pub fn kind(&self) -> AxonKind {
        self.transform().kind()
    }
    /// The number of left neurons, excluding the bias unit.
    pub fn left_neuron_count(&self) -> usize {
        self.transform().left_count()
    }
    /// The number of right neurons, excluding the bias unit.
    pub fn right_neuron_count(&self) -> usize {
        self.transform().right_count()
    }
    /// Whether weights may be adjusted under `context`.
    ///
    /// Always false for pooling and pass through axons, and false for every axon when the
    /// context freezes out weights.
    pub fn is_trainable(&self, context: &AxonContext) -> bool {
        self.weights().is_some() && !context.freeze_out()
    }
    /// An independent deep copy, including the weights.
    pub fn dup(&self) -> Self {
        self.clone()
    }
    /// Wraps the axon for sharing between threads.
    pub fn into_shared(self) -> SharedAxon {
        Arc::new(RwLock::new(self))
    }
    /// The weight store, for trainable variants.
    pub fn weights(&self) -> Option<&AxonWeights> {
        match self {
            Self::FullyConnected(axon) => Some(axon.weights()),
            Self::Convolutional(axon) => Some(axon.weights()),
            Self::ScaleAndShift(axon) => Some(axon.weights()),
            Self::MaxPooling(_) | Self::AveragePooling(_) | Self::PassThrough(_) => None,
        }
    }
    fn weights_mut(&mut self) -> Result<&mut AxonWeights> {
        match self {
            Self::FullyConnected(axon) => Ok(axon.weights_mut()),
            Self::Convolutional(axon) => Ok(axon.weights_mut()),
            Self::ScaleAndShift(axon) => Ok(axon.weights_mut()),
            Self::MaxPooling(_) | Self::AveragePooling(_) | Self::PassThrough(_) => bail!(
                AxonError::unsupported(format!("{} axons have no weights", self.kind()))
            ),
        }
    }
    /// A copy of the connection weights, if any.
    pub fn detached_connection_weights(&self) -> Option<Array2<f32>> {
        self.weights().map(AxonWeights::detached_connection_weights)
    }
    /// A copy of the left to right biases, if any.
    pub fn detached_left_to_right_biases(&self) -> Option<Array1<f32>> {
        self.weights()
            .and_then(AxonWeights::detached_left_to_right_biases)
    }
    /// A copy of the right to left biases, if any.
    pub fn detached_right_to_left_biases(&self) -> Option<Array1<f32>> {
        self.weights()
            .and_then(AxonWeights::detached_right_to_left_biases)
    }
    /// Adds or subtracts `delta` from the connection weights.
    ///
    /// **Errors**
    ///
    /// If the axon has no weights or `delta` has the wrong shape.
    pub fn adjust_connection_weights(
        &mut self,
        delta: ArrayView2<f32>,
        direction: AdjustmentDirection,
    ) -> Result<()> {
        self.weights_mut()?
            .adjust_connection_weights(delta, direction)
    }
    /// Adds or subtracts `delta` from the left to right biases.
    ///
    /// **Errors**
    ///
    /// If the axon has no left to right biases or `delta` has the wrong length.
    pub fn adjust_left_to_right_biases(
        &mut self,
        delta: ArrayView1<f32>,
        direction: AdjustmentDirection,
    ) -> Result<()> {
        self.weights_mut()?
            .adjust_left_to_right_biases(delta, direction)
    }
    /// Adds or subtracts `delta` from the right to left biases.
    ///
    /// **Errors**
    ///
    /// If the axon has no right to left biases or `delta` has the wrong length.
    pub fn adjust_right_to_left_biases(
        &mut self,
        delta: ArrayView1<f32>,
        direction: AdjustmentDirection,
    ) -> Result<()> {
        self.weights_mut()?
            .adjust_right_to_left_biases(delta, direction)
    }
    /// Pushes `input` from the left neurons to the right neurons.
    ///
    /// `previous_right_to_left` is the right to left activation of this axon earlier in the same
    /// step. Its input dropout mask, if any, masks the output of this push.
    ///
    /// **Errors**
    ///
    /// - The input orientation or feature count does not match.
    /// - Dropout is requested from an axon that does not support it.
    /// - `previous_right_to_left` is not a right to left activation of this kind of axon.
    pub fn push_left_to_right(
        &self,
        input: &ActivationBatch,
        previous_right_to_left: Option<&AxonActivation>,
        context: &AxonContext,
    ) -> Result<AxonActivation> {
        self.push(
            Direction::LeftToRight,
            input,
            previous_right_to_left,
            context,
        )
    }
    /// Pushes `input` from the right neurons to the left neurons.
    ///
    /// `previous_left_to_right` is the forward activation of this axon in the same step. Max
    /// pooling requires it for its selection mask. Trainable axons use it to compute
    /// [`AxonGradients`], unless the context freezes out weights.
    ///
    /// **Errors**
    ///
    /// See [`.push_left_to_right()`](Self::push_left_to_right()).
    pub fn push_right_to_left(
        &self,
        input: &ActivationBatch,
        previous_left_to_right: Option<&AxonActivation>,
        context: &AxonContext,
    ) -> Result<AxonActivation> {
        self.push(
            Direction::RightToLeft,
            input,
            previous_left_to_right,
            context,
        )
    }
    fn push(
        &self,
        direction: Direction,
        input: &ActivationBatch,
        previous: Option<&AxonActivation>,
        context: &AxonContext,
    ) -> Result<AxonActivation> {
        let transform = self.transform();
        let kind = transform.kind();
        input.expect_rows_span_features()?;
        let (input_count, output_count) = match direction {
            Direction::LeftToRight => (transform.left_count(), transform.right_count()),
            Direction::RightToLeft => (transform.right_count(), transform.left_count()),
        };
        if input.feature_count() != input_count {
            bail!(AxonError::shape(
                format!("{input_count} {direction} input features for {kind} axon"),
                input.feature_count(),
            ));
        }
        if let Some(previous) = previous {
            if previous.kind() != kind || previous.direction() != direction.opposite() {
                bail!(AxonError::MissingActivation(format!(
                    "expected a {} activation of a {kind} axon, found {} {}",
                    direction.opposite(),
                    previous.direction(),
                    previous.kind(),
                )));
            }
        }
        let paired_mask = previous.and_then(|previous| {
            previous.input_dropout_mask().map(|mask| {
                let scale = previous.keep_probability().recip();
                mask.mapv(|m| m * scale)
            })
        });
        // Input dropout is sampled left to right only. Right to left reuses the paired mask.
        let sample_dropout = direction == Direction::LeftToRight && context.dropout_requested();
        if (sample_dropout || paired_mask.is_some()) && !transform.supports_input_dropout() {
            bail!(AxonError::unsupported(format!(
                "{kind} axons do not support input dropout"
            )));
        }
        log::trace!(
            "{kind} {direction} push of {} examples",
            input.example_count()
        );
        let features = input.features();
        let (post_dropout_input, input_dropout_mask) = if sample_dropout {
            let (post, mask) = dropout::apply(features, context)?;
            (post, Some(mask))
        } else {
            (features.to_owned(), None)
        };
        let Transformed {
            output,
            selection_mask,
        } = match direction {
            Direction::LeftToRight => transform.left_to_right(post_dropout_input.view())?,
            Direction::RightToLeft => {
                transform.right_to_left(post_dropout_input.view(), previous)?
            }
        };
        if output.nrows() != output_count || output.ncols() != input.example_count() {
            bail!(AxonError::shape(
                format!("{kind} output [{output_count}, {}]", input.example_count()),
                format!("{:?}", output.shape()),
            ));
        }
        let gradients = match (direction, previous) {
            (Direction::RightToLeft, Some(forward)) if self.is_trainable(context) => {
                transform.gradients(post_dropout_input.view(), forward, context)?
            }
            _ => None,
        };
        let mut activation = AxonActivation {
            output: ActivationBatch::new(output),
            post_dropout_input: ActivationBatch::new(post_dropout_input).freeze(),
            input_dropout_mask,
            keep_probability: if sample_dropout {
                context.keep_probability()
            } else {
                1.
            },
            selection_mask,
            gradients,
            kind,
            direction,
        };
        if let Some(mask) = paired_mask {
            activation.apply_output_dropout_mask(mask.view())?;
        }
        Ok(activation)
    }
}
