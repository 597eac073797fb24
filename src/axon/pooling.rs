use super::{into_standard_shape, AxonActivation, AxonKind, Transform, Transformed};
use crate::{
    error::AxonError,
    neurons::Neurons3D,
    reformat::{Im2ColFormatter, Reformat, ReformatConfig, SpatialConfig, WindowLayout},
};
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Zip};

#[derive(Clone, Debug, PartialEq)]
struct PoolingWindow {
    left: Neurons3D,
    right: Neurons3D,
    spatial: SpatialConfig,
    formatter: Im2ColFormatter,
    scale_outputs: bool,
}

impl PoolingWindow {
    fn new(kind: AxonKind, left: Neurons3D, right: Neurons3D, spatial: SpatialConfig) -> Result<Self> {
        if left.depth() != right.depth() {
            bail!(AxonError::configuration(format!(
                "{kind} axon cannot change depth {} to {}",
                left.depth(),
                right.depth()
            )));
        }
        if left.has_bias_unit() || right.has_bias_unit() {
            bail!(AxonError::configuration(format!(
                "{kind} axons have no biases"
            )));
        }
        let config = ReformatConfig::derive(&left, &right, &spatial)?;
        log::debug!("{kind} axon {left:?} -> {right:?} {config:?}");
        Ok(Self {
            left,
            right,
            spatial,
            formatter: Im2ColFormatter::new(config, WindowLayout::Pooling),
            scale_outputs: false,
        })
    }
    fn config(&self) -> &ReformatConfig {
        self.formatter.config()
    }
    // (input width * input height) / (output width * output height)
    fn output_scale(&self) -> f32 {
        self.left.grid() as f32 / self.right.grid() as f32
    }
    // One reduced value per window column, reshaped to the right neurons.
    fn into_output(&self, mut values: Array1<f32>, examples: usize) -> Result<Array2<f32>> {
        if self.scale_outputs {
            values *= self.output_scale();
        }
        Ok(values.into_shape((self.right.count(), examples))?)
    }
    // Broadcasts `upstream` down every window column, optionally masked, then col2im.
    fn scatter(
        &self,
        upstream: ArrayView2<f32>,
        mask: Option<ArrayView2<f32>>,
        divisor: f32,
    ) -> Result<Array2<f32>> {
        let examples = upstream.ncols();
        let dim = self.formatter.column_dim(examples);
        let flat = into_standard_shape(upstream.to_owned(), (1, dim.1))?;
        let mut columns = Array2::<f32>::zeros(dim);
        columns += &flat;
        if let Some(mask) = mask {
            if mask.dim() != dim {
                bail!(AxonError::shape(
                    format!("selection mask {dim:?}"),
                    format!("{:?}", mask.shape()),
                ));
            }
            columns *= &mask;
        }
        if divisor != 1. {
            columns /= divisor;
        }
        let mut output = self
            .formatter
            .reformat_right_to_left_output(columns.view())?;
        if self.scale_outputs {
            output *= self.output_scale().recip();
        }
        Ok(output)
    }
}

// Index and value of the first maximum.
fn first_max(column: ArrayView1<f32>) -> (usize, f32) {
    column
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(index, max), (i, x)| {
            if *x > max {
                (i, *x)
            } else {
                (index, max)
            }
        })
}

macro_rules! impl_pooling_accessors {
    ($axon:ty) => {
        impl $axon {
            /// Enables output scaling.
            ///
            /// Left to right multiplies by `(input width * input height) / (output width *
            /// output height)`, right to left multiplies the reconstructed input by the inverse.
            pub fn with_scale_outputs(mut self, scale_outputs: bool) -> Self {
                self.window.scale_outputs = scale_outputs;
                self
            }
            /// Whether outputs are scaled.
            pub fn scale_outputs(&self) -> bool {
                self.window.scale_outputs
            }
            /// The left neurons.
            pub fn left_neurons(&self) -> Neurons3D {
                self.window.left
            }
            /// The right neurons.
            pub fn right_neurons(&self) -> Neurons3D {
                self.window.right
            }
            /// The window configuration as supplied.
            pub fn spatial_config(&self) -> &SpatialConfig {
                &self.window.spatial
            }
            /// The resolved window geometry.
            pub fn reformat_config(&self) -> &ReformatConfig {
                self.window.config()
            }
        }
    };
}

/// Maximum over each window of each channel.
///
/// The forward activation records which window cell was selected, ties going to the first cell
/// in row major window order. Right to left routes each gradient to the selected cell only, so it
/// requires that forward activation.
#[derive(Clone, Debug, PartialEq)]
pub struct MaxPoolingAxon {
    window: PoolingWindow,
}

impl MaxPoolingAxon {
    /// Creates the axon.
    ///
    /// **Errors**
    ///
    /// - The depths differ or either side has a bias unit.
    /// - The geometry is inconsistent, see [`ReformatConfig::derive()`].
    pub fn new(left: Neurons3D, right: Neurons3D, spatial: SpatialConfig) -> Result<Self> {
        Ok(Self {
            window: PoolingWindow::new(AxonKind::MaxPooling, left, right, spatial)?,
        })
    }
}

impl_pooling_accessors!(MaxPoolingAxon);

impl Transform for MaxPoolingAxon {
    fn kind(&self) -> AxonKind {
        AxonKind::MaxPooling
    }
    fn left_count(&self) -> usize {
        self.window.left.count()
    }
    fn right_count(&self) -> usize {
        self.window.right.count()
    }
    fn supports_input_dropout(&self) -> bool {
        false
    }
    fn left_to_right(&self, input: ArrayView2<f32>) -> Result<Transformed> {
        let columns = self.window.formatter.reformat_left_to_right_input(input)?;
        let mut values = Array1::zeros(columns.ncols());
        let mut selection_mask = Array2::zeros(columns.raw_dim());
        Zip::from(&mut values)
            .and(columns.columns())
            .and(selection_mask.columns_mut())
            .par_for_each(|value, column, mut selected| {
                let (index, max) = first_max(column);
                *value = max;
                selected[index] = 1.;
            });
        Ok(Transformed {
            output: self.window.into_output(values, input.ncols())?,
            selection_mask: Some(selection_mask),
        })
    }
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed> {
        let Some(mask) = previous_left_to_right.and_then(AxonActivation::selection_mask) else {
            bail!(AxonError::MissingActivation(
                "max pooling right to left requires the left to right activation".into()
            ));
        };
        Ok(self.window.scatter(input, Some(mask), 1.)?.into())
    }
}

/// Mean over each window of each channel.
///
/// Left to right divides each window sum by the number of window cells inside the input, using 1
/// for a window entirely in the padding. Right to left divides by the full filter size.
#[derive(Clone, Debug, PartialEq)]
pub struct AveragePoolingAxon {
    window: PoolingWindow,
}

impl AveragePoolingAxon {
    /// Creates the axon.
    ///
    /// **Errors**
    ///
    /// - The depths differ or either side has a bias unit.
    /// - The geometry is inconsistent, see [`ReformatConfig::derive()`].
    pub fn new(left: Neurons3D, right: Neurons3D, spatial: SpatialConfig) -> Result<Self> {
        Ok(Self {
            window: PoolingWindow::new(AxonKind::AveragePooling, left, right, spatial)?,
        })
    }
}

impl_pooling_accessors!(AveragePoolingAxon);

impl Transform for AveragePoolingAxon {
    fn kind(&self) -> AxonKind {
        AxonKind::AveragePooling
    }
    fn left_count(&self) -> usize {
        self.window.left.count()
    }
    fn right_count(&self) -> usize {
        self.window.right.count()
    }
    fn supports_input_dropout(&self) -> bool {
        false
    }
    fn left_to_right(&self, input: ArrayView2<f32>) -> Result<Transformed> {
        let columns = self.window.formatter.reformat_left_to_right_input(input)?;
        let examples = input.ncols();
        let counts = self.window.config().contributing_counts();
        if counts.contains(&0) {
            log::debug!("average pooling window entirely in padding, dividing by 1");
        }
        let grid = counts.len();
        let mut values = columns.sum_axis(Axis(0));
        for (j, value) in values.iter_mut().enumerate() {
            let count = counts[(j / examples) % grid].max(1);
            *value /= count as f32;
        }
        Ok(self.window.into_output(values, examples)?.into())
    }
    fn right_to_left(
        &self,
        input: ArrayView2<f32>,
        _previous_left_to_right: Option<&AxonActivation>,
    ) -> Result<Transformed> {
        let filter = self.window.config().filter_size() as f32;
        Ok(self.window.scatter(input, None, filter)?.into())
    }
}
