use super::{
    fully_connected::{dense_gradients, dense_left_to_right, dense_right_to_left},
    into_standard_shape, AxonActivation, AxonGradients, AxonKind, Transform, Transformed,
};
use crate::{
    context::AxonContext,
    error::AxonError,
    neurons::Neurons3D,
    reformat::{ConvolutionalFormatter, Padding, Reformat, ReformatConfig, SpatialConfig},
    weights::{AxonWeights, BiasInit},
};
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Convolution of a spatial group of neurons.
///
/// The input is expanded into window columns (see [`crate::reformat`]), multiplied by a dense
/// kernel of `output_depth x (input_depth * filter_height * filter_width)` and reshaped into the
/// right neurons. Right to left is the mirror: the kernel transpose followed by col2im.
///
/// Left to right biases (left bias unit) hold one value per output channel, right to left biases
/// (right bias unit) one value per input channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvolutionalAxon {
    left: Neurons3D,
    right: Neurons3D,
    spatial: SpatialConfig,
    formatter: ConvolutionalFormatter,
    weights: AxonWeights,
}

impl ConvolutionalAxon {
    /// Creates an axon with a random kernel and zero biases.
    ///
    /// **Errors**
    ///
    /// If the geometry is inconsistent, see [`ReformatConfig::derive()`].
    pub fn new(left: Neurons3D, right: Neurons3D, spatial: SpatialConfig) -> Result<Self> {
        Self::from_parts(left, right, spatial, None, None, None)
    }
    /// Creates an axon from an optional existing kernel and biases.
    ///
    /// **Errors**
    ///
    /// - The geometry is inconsistent.
    /// - Biases are supplied for a side without a bias unit.
    /// - A supplied value has the wrong shape.
    pub fn from_parts(
        left: Neurons3D,
        right: Neurons3D,
        spatial: SpatialConfig,
        connection_weights: Option<Array2<f32>>,
        left_to_right_biases: Option<Array1<f32>>,
        right_to_left_biases: Option<Array1<f32>>,
    ) -> Result<Self> {
        let config = ReformatConfig::derive(&left, &right, &spatial)?;
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
            config.input_depth * config.filter_size(),
            config.output_depth,
            connection_weights,
            BiasInit::from_option(left.has_bias_unit(), right.depth(), left_to_right_biases),
            BiasInit::from_option(right.has_bias_unit(), left.depth(), right_to_left_biases),
        )?;
        log::debug!("convolutional axon {left:?} -> {right:?} {config:?}");
        Ok(Self {
            left,
            right,
            spatial,
            formatter: ConvolutionalFormatter::new(config),
            weights,
        })
    }
    /// Restricts the kernel connections, see [`AxonWeights::with_connection_weights_mask()`].
    ///
    /// **Errors**
    ///
    /// If the mask is not the shape of the kernel.
    pub fn with_connection_weights_mask(mut self, mask: Array2<f32>) -> Result<Self> {
        self.weights = self.weights.with_connection_weights_mask(mask)?;
        Ok(self)
    }
    /// The left neurons.
    pub fn left_neurons(&self) -> Neurons3D {
        self.left
    }
    /// The right neurons.
    pub fn right_neurons(&self) -> Neurons3D {
        self.right
    }
    /// The window configuration as supplied.
    pub fn spatial_config(&self) -> &SpatialConfig {
        &self.spatial
    }
    /// The resolved window geometry.
    pub fn reformat_config(&self) -> &ReformatConfig {
        self.formatter.config()
    }
    /// The weight store. Connection weights are the kernel.
    pub fn weights(&self) -> &AxonWeights {
        &self.weights
    }
    pub(super) fn weights_mut(&mut self) -> &mut AxonWeights {
        &mut self.weights
    }
    /// The convolution from the right neurons back to the left neurons.
    ///
    /// Its kernel moves `W[o, i * filter + sr * filter_width + sc]` to
    /// `W'[i, o * filter + (filter_height - 1 - sr) * filter_width + (filter_width - 1 - sc)]`,
    /// and its padding is `filter - 1 - padding`, so that its left to right push equals the right
    /// to left push of `self`. Biases swap sides. The result is an independent copy.
    ///
    /// **Errors**
    ///
    /// If the strides are not 1 or the padding exceeds `filter - 1`.
    pub fn reversed(&self) -> Result<Self> {
        let config = self.reformat_config();
        let (fh, fw) = (config.filter_height, config.filter_width);
        if config.stride_height != 1 || config.stride_width != 1 {
            bail!(AxonError::configuration(format!(
                "reversed kernel requires unit strides, found {:?}",
                [config.stride_height, config.stride_width]
            )));
        }
        if config.padding_height >= fh || config.padding_width >= fw {
            bail!(AxonError::configuration(format!(
                "reversed kernel requires padding below the filter {:?}, found {:?}",
                [fh, fw],
                [config.padding_height, config.padding_width]
            )));
        }
        let filter = config.filter_size();
        let (input_depth, output_depth) = (config.input_depth, config.output_depth);
        let reverse = |kernel: ArrayView2<f32>| {
            Array2::from_shape_fn((input_depth, output_depth * filter), |(i, column)| {
                let (o, offset) = (column / filter, column % filter);
                let (sr, sc) = (fh - 1 - offset / fw, fw - 1 - offset % fw);
                kernel[(o, i * filter + sr * fw + sc)]
            })
        };
        let left = Neurons3D::new(
            self.right.width(),
            self.right.height(),
            self.right.depth(),
            self.right.has_bias_unit(),
        );
        let right = Neurons3D::new(
            self.left.width(),
            self.left.height(),
            self.left.depth(),
            self.left.has_bias_unit(),
        );
        let spatial = SpatialConfig::new()
            .with_filter([fh, fw])
            .with_padding(Padding::explicit(
                fh - 1 - config.padding_height,
                fw - 1 - config.padding_width,
            ));
        let reversed = Self::from_parts(
            left,
            right,
            spatial,
            Some(reverse(self.weights.connection_weights())),
            self.weights.detached_right_to_left_biases(),
            self.weights.detached_left_to_right_biases(),
        )?;
        match self.weights.connection_weights_mask() {
            Some(mask) => reversed.with_connection_weights_mask(reverse(mask)),
            None => Ok(reversed),
        }
    }
    // Right side activations as `output_depth x (positions * examples)`.
    fn right_columns(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let config = self.reformat_config();
        let dim = (
            config.output_depth,
            config.output_grid() * input.ncols(),
        );
        into_standard_shape(input.to_owned(), dim)
    }
}

impl Transform for ConvolutionalAxon {
    fn kind(&self) -> AxonKind {
        AxonKind::Convolutional
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
        let columns = self.formatter.reformat_left_to_right_input(input)?;
        let output = dense_left_to_right(&self.weights, columns.view());
        Ok(into_standard_shape(output, (self.right.count(), input.ncols()))?.into())
    }
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        _previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed> {
        let upstream = self.right_columns(input)?;
        let columns = dense_right_to_left(&self.weights, upstream.view());
        let mut output = self
            .formatter
            .reformat_right_to_left_output(columns.view())?;
        if let Some(biases) = self.weights.right_to_left_biases() {
            let grid = self.left.grid();
            for (mut channel, bias) in output.axis_chunks_iter_mut(Axis(0), grid).zip(biases) {
                channel += *bias;
            }
        }
        Ok(output.into())
    }
    fn gradients(
        &self,
        upstream: ArrayView2<f32>,
        forward: &AxonActivation,
        context: &AxonContext,
    ) -> Result<Option<AxonGradients>> {
        let columns = self
            .formatter
            .reformat_left_to_right_input(forward.post_dropout_input().features())?;
        let upstream = self.right_columns(upstream)?;
        Ok(Some(dense_gradients(
            &self.weights,
            upstream.view(),
            columns.view(),
            context,
        )))
    }
}
