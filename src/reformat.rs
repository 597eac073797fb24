//! Image to column reformatting.
//!
//! Spatial activations have one row per feature in channel-major order (see
//! [`Neurons3D`](crate::neurons::Neurons3D)) and one column per example. Reformatting expands every
//! filter window into a column so that convolution and pooling become matrix operations.
//!
//! Two column layouts exist, selected by [`WindowLayout`]:
//!
//! - [`WindowLayout::Convolution`]: row `d * filter + (sr * filter_width + sc)`, column
//!   `position * examples + example`. Rows group by input channel, then window offset, matching
//!   the left neurons `filter_width x filter_height x input_depth` of the convolution's dense
//!   kernel. Because positions are outermost in the columns, the dense output
//!   `output_depth x (positions * examples)` is already the spatial output after a reshape.
//! - [`WindowLayout::Pooling`]: row `sr * filter_width + sc`, column
//!   `(d * positions + position) * examples + example`. Rows are window offsets only and the
//!   channel moves into the columns, so a reduction down each column pools one channel, and the
//!   reduced row reshapes directly into the spatial output.
//!
//! Window cells that fall into the padding are skipped: nothing is written left to right and
//! nothing is accumulated right to left.
use crate::{error::AxonError, neurons::Neurons3D};
use anyhow::{bail, Result};
use ndarray::{s, Array2, ArrayView2, Axis};
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};


/// Padding policy of a spatial axon.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Padding {
    /// Zero cells added on each side.
    Explicit {
        /// Rows added above and below.
        height: usize,
        /// Columns added left and right.
        width: usize,
    },
    /// Padding computed so the declared output size is reached.
    ///
    /// Computed per dimension as `((output - 1) * stride + filter - input) / 2`, rounded to
    /// `floor + 1` when not an integer. Requires an explicit filter.
    Same,
}

impl Default for Padding {
    fn default() -> Self {
        Self::Explicit {
            height: 0,
            width: 0,
        }
    }
}

impl Padding {
    /// Explicit padding of `height` rows and `width` columns.
    pub fn explicit(height: usize, width: usize) -> Self {
        Self::Explicit { height, width }
    }
}

/// Window configuration of a spatial axon.
///
/// Defaults:
/// - filter: derived from the neuron geometry
/// - strides: 1
/// - padding: 0
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpatialConfig {
    filter: Option<[usize; 2]>,
    strides: Option<[usize; 2]>,
    padding: Padding,
}

impl SpatialConfig {
    /// Creates the default config.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the filter as `[height, width]`.
    pub fn with_filter(mut self, filter: [usize; 2]) -> Self {
        self.filter.replace(filter);
        self
    }
    /// Sets the strides as `[height, width]`.
    pub fn with_strides(mut self, strides: [usize; 2]) -> Self {
        self.strides.replace(strides);
        self
    }
    /// Sets the padding policy.
    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }
    /// The filter, if set.
    pub fn filter(&self) -> Option<[usize; 2]> {
        self.filter
    }
    /// The strides.
    pub fn strides(&self) -> [usize; 2] {
        self.strides.unwrap_or([1, 1])
    }
    /// The padding policy.
    pub fn padding(&self) -> Padding {
        self.padding
    }
}

/// Fully resolved window geometry, derived from neuron geometry and a [`SpatialConfig`].
///
/// Derivation is deterministic, deriving twice from the same inputs yields equal values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[allow(missing_docs)]
pub struct ReformatConfig {
    pub input_width: usize,
    pub input_height: usize,
    pub input_depth: usize,
    pub filter_width: usize,
    pub filter_height: usize,
    pub stride_width: usize,
    pub stride_height: usize,
    pub padding_width: usize,
    pub padding_height: usize,
    pub output_width: usize,
    pub output_height: usize,
    pub output_depth: usize,
}

impl ReformatConfig {
    /// Resolves the geometry of a window from `left` to `right` neurons.
    ///
    /// **Errors**
    ///
    /// If a dimension is zero, a filter cannot be derived, or the filter, strides and padding
    /// do not map the left grid onto the right grid.
    pub fn derive(left: &Neurons3D, right: &Neurons3D, config: &SpatialConfig) -> Result<Self> {
        if left.count() == 0 || right.count() == 0 {
            bail!(AxonError::configuration(format!(
                "empty neuron geometry {left:?} -> {right:?}"
            )));
        }
        let [sh, sw] = config.strides();
        let explicit = match config.padding() {
            Padding::Explicit { height, width } => Some([height, width]),
            Padding::Same => None,
        };
        let (fh, ph) = resolve_axis(
            "height",
            left.height(),
            right.height(),
            config.filter().map(|f| f[0]),
            sh,
            explicit.map(|p| p[0]),
        )?;
        let (fw, pw) = resolve_axis(
            "width",
            left.width(),
            right.width(),
            config.filter().map(|f| f[1]),
            sw,
            explicit.map(|p| p[1]),
        )?;
        Ok(Self {
            input_width: left.width(),
            input_height: left.height(),
            input_depth: left.depth(),
            filter_width: fw,
            filter_height: fh,
            stride_width: sw,
            stride_height: sh,
            padding_width: pw,
            padding_height: ph,
            output_width: right.width(),
            output_height: right.height(),
            output_depth: right.depth(),
        })
    }
    /// `filter_width * filter_height`.
    pub fn filter_size(&self) -> usize {
        self.filter_width * self.filter_height
    }
    /// `input_width * input_height`.
    pub fn input_grid(&self) -> usize {
        self.input_width * self.input_height
    }
    /// `output_width * output_height`.
    pub fn output_grid(&self) -> usize {
        self.output_width * self.output_height
    }
    /// The number of left neurons.
    pub fn input_count(&self) -> usize {
        self.input_grid() * self.input_depth
    }
    /// Whether the window is a plain 1x1 map over the same grid.
    pub fn is_one_by_one(&self) -> bool {
        self.filter_width == 1
            && self.filter_height == 1
            && self.stride_width == 1
            && self.stride_height == 1
            && self.padding_width == 0
            && self.padding_height == 0
            && self.input_width == self.output_width
            && self.input_height == self.output_height
    }
    /// For each output position, the number of window cells inside the unpadded input.
    pub fn contributing_counts(&self) -> Vec<usize> {
        let rows = |or: usize| {
            (0..self.filter_height)
                .filter(|sr| {
                    input_index(or, *sr, self.stride_height, self.padding_height, self.input_height)
                        .is_some()
                })
                .count()
        };
        let cols = |oc: usize| {
            (0..self.filter_width)
                .filter(|sc| {
                    input_index(oc, *sc, self.stride_width, self.padding_width, self.input_width)
                        .is_some()
                })
                .count()
        };
        (0..self.output_height)
            .flat_map(|or| (0..self.output_width).map(move |oc| (or, oc)))
            .map(|(or, oc)| rows(or) * cols(oc))
            .collect()
    }
}

// `padding` is `None` for same padding.
fn resolve_axis(
    name: &str,
    input: usize,
    output: usize,
    filter: Option<usize>,
    stride: usize,
    padding: Option<usize>,
) -> Result<(usize, usize)> {
    if stride == 0 {
        bail!(AxonError::configuration(format!("zero {name} stride")));
    }
    let same = padding.is_none();
    let (filter, padding) = match (filter, padding) {
        (Some(filter), Some(padding)) => (filter, padding),
        (None, Some(padding)) => {
            let span = input + 2 * padding;
            let covered = (output - 1) * stride;
            if covered >= span {
                bail!(AxonError::configuration(format!(
                    "cannot derive {name} filter for input {input}, output {output}, stride {stride}, padding {padding}"
                )));
            }
            (span - covered, padding)
        }
        (Some(filter), None) => (filter, same_padding(input, output, filter, stride)),
        (None, None) => bail!(AxonError::configuration(format!(
            "same padding requires an explicit {name} filter"
        ))),
    };
    if filter == 0 || filter > input + 2 * padding {
        bail!(AxonError::configuration(format!(
            "{name} filter {filter} does not fit input {input} with padding {padding}"
        )));
    }
    let expected = (input + 2 * padding - filter) / stride + 1;
    // Rounding same padding up may add one trailing window, which is never visited.
    let rounded_up = same && expected == output + 1;
    if expected != output && !rounded_up {
        bail!(AxonError::configuration(format!(
            "{name} filter {filter}, stride {stride}, padding {padding} map input {input} to {expected}, not {output}"
        )));
    }
    Ok((filter, padding))
}

fn same_padding(input: usize, output: usize, filter: usize, stride: usize) -> usize {
    let required = ((output.max(1) - 1) * stride + filter) as isize - input as isize;
    if required <= 0 {
        return 0;
    }
    let padding = required as f64 / 2.;
    if padding.fract() != 0. {
        padding.floor() as usize + 1
    } else {
        padding as usize
    }
}

/// The unpadded input index of window offset `offset` at output index `output`, if inside.
#[inline]
fn input_index(
    output: usize,
    offset: usize,
    stride: usize,
    padding: usize,
    input: usize,
) -> Option<usize> {
    (output * stride + offset)
        .checked_sub(padding)
        .filter(|i| *i < input)
}

/// Row ordering of the column matrix. See the [module docs](self).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WindowLayout {
    /// Channel, then window offset.
    Convolution,
    /// Window offset only, channels in the columns.
    Pooling,
}

/// Converts spatial activations to and from window columns.
pub trait Reformat {
    /// The geometry.
    fn config(&self) -> &ReformatConfig;
    /// The column layout produced.
    fn layout(&self) -> WindowLayout;
    /// Expands a spatial `input` (`input_count x examples`) into window columns.
    ///
    /// **Errors**
    ///
    /// If `input` does not have `input_count` rows.
    fn reformat_left_to_right_input(&self, input: ArrayView2<f32>) -> Result<Array2<f32>>;
    /// Accumulates window `columns` back into the spatial input layout.
    ///
    /// Overlapping windows sum their contributions.
    ///
    /// **Errors**
    ///
    /// If `columns` does not have the shape produced by
    /// [`.reformat_left_to_right_input()`](Reformat::reformat_left_to_right_input()).
    fn reformat_right_to_left_output(&self, columns: ArrayView2<f32>) -> Result<Array2<f32>>;
    /// The shape of the column matrix for `examples`.
    fn column_dim(&self, examples: usize) -> (usize, usize) {
        let config = self.config();
        match self.layout() {
            WindowLayout::Convolution => (
                config.input_depth * config.filter_size(),
                config.output_grid() * examples,
            ),
            WindowLayout::Pooling => (
                config.filter_size(),
                config.input_depth * config.output_grid() * examples,
            ),
        }
    }
}

fn check_input(config: &ReformatConfig, input: &ArrayView2<f32>) -> Result<()> {
    if input.nrows() != config.input_count() {
        bail!(AxonError::shape(
            format!("{} spatial input rows", config.input_count()),
            input.nrows(),
        ));
    }
    Ok(())
}

fn column_examples<R: Reformat + ?Sized>(reformat: &R, columns: &ArrayView2<f32>) -> Result<usize> {
    let config = reformat.config();
    let per_example = match reformat.layout() {
        WindowLayout::Convolution => config.output_grid(),
        WindowLayout::Pooling => config.input_depth * config.output_grid(),
    };
    let examples = columns.ncols() / per_example;
    if reformat.column_dim(examples) != columns.dim() {
        bail!(AxonError::shape(
            format!("columns {:?}", reformat.column_dim(examples)),
            format!("{:?}", columns.shape()),
        ));
    }
    Ok(examples)
}

/// General im2col / col2im over strided, padded windows.
#[derive(Clone, Debug, PartialEq)]
pub struct Im2ColFormatter {
    config: ReformatConfig,
    layout: WindowLayout,
}

impl Im2ColFormatter {
    /// Creates a formatter for `config` producing `layout`.
    pub fn new(config: ReformatConfig, layout: WindowLayout) -> Self {
        log::debug!("im2col formatter {layout:?} {config:?}");
        Self { config, layout }
    }
    // Column offset of (channel, position) for the first example.
    #[inline]
    fn column_base(&self, d: usize, position: usize, examples: usize) -> usize {
        match self.layout {
            WindowLayout::Convolution => position * examples,
            WindowLayout::Pooling => (d * self.config.output_grid() + position) * examples,
        }
    }
    #[inline]
    fn column_row(&self, d: usize, offset: usize) -> usize {
        match self.layout {
            WindowLayout::Convolution => d * self.config.filter_size() + offset,
            WindowLayout::Pooling => offset,
        }
    }
}

impl Reformat for Im2ColFormatter {
    fn config(&self) -> &ReformatConfig {
        &self.config
    }
    fn layout(&self) -> WindowLayout {
        self.layout
    }
    fn reformat_left_to_right_input(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        let config = &self.config;
        check_input(config, &input)?;
        let examples = input.ncols();
        let input = input.as_standard_layout();
        let (ih, iw) = (config.input_height, config.input_width);
        let (oh, ow) = (config.output_height, config.output_width);
        let fw = config.filter_width;
        let filter = config.filter_size();
        let depth = config.input_depth;
        let mut output = Array2::zeros(self.column_dim(examples));
        // Every (channel, offset) pair owns one destination row.
        output
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(row, mut output)| {
                let (channels, offset) = match self.layout {
                    WindowLayout::Convolution => (row / filter..row / filter + 1, row % filter),
                    WindowLayout::Pooling => (0..depth, row),
                };
                let (sr, sc) = (offset / fw, offset % fw);
                for d in channels {
                    for or in 0..oh {
                        let Some(ir) =
                            input_index(or, sr, config.stride_height, config.padding_height, ih)
                        else {
                            continue;
                        };
                        for oc in 0..ow {
                            let Some(ic) =
                                input_index(oc, sc, config.stride_width, config.padding_width, iw)
                            else {
                                continue;
                            };
                            let base = self.column_base(d, or * ow + oc, examples);
                            output
                                .slice_mut(s![base..base + examples])
                                .assign(&input.row(d * ih * iw + ir * iw + ic));
                        }
                    }
                }
            });
        Ok(output)
    }
    fn reformat_right_to_left_output(&self, columns: ArrayView2<f32>) -> Result<Array2<f32>> {
        let config = &self.config;
        let examples = column_examples(self, &columns)?;
        let (ih, iw) = (config.input_height, config.input_width);
        let (oh, ow) = (config.output_height, config.output_width);
        let fw = config.filter_width;
        let mut output = Array2::zeros((config.input_count(), examples));
        // Channels own disjoint blocks of the output; windows inside a channel overlap and
        // accumulate serially.
        output
            .axis_chunks_iter_mut(Axis(0), ih * iw)
            .into_par_iter()
            .enumerate()
            .for_each(|(d, mut block)| {
                for offset in 0..config.filter_size() {
                    let (sr, sc) = (offset / fw, offset % fw);
                    let source = columns.row(self.column_row(d, offset));
                    for or in 0..oh {
                        let Some(ir) =
                            input_index(or, sr, config.stride_height, config.padding_height, ih)
                        else {
                            continue;
                        };
                        for oc in 0..ow {
                            let Some(ic) =
                                input_index(oc, sc, config.stride_width, config.padding_width, iw)
                            else {
                                continue;
                            };
                            let base = self.column_base(d, or * ow + oc, examples);
                            let mut target = block.row_mut(ir * iw + ic);
                            target += &source.slice(s![base..base + examples]);
                        }
                    }
                }
            });
        Ok(output)
    }
}

/// Reformatting for a 1x1 window with unit strides and no padding.
///
/// The column layout is then a reshape of the spatial layout, so no window is enumerated.
#[derive(Clone, Debug, PartialEq)]
pub struct OneByOneConvolutionalFormatter {
    config: ReformatConfig,
}

impl OneByOneConvolutionalFormatter {
    /// Creates the formatter.
    ///
    /// **Errors**
    ///
    /// If `config` is not a 1x1 window.
    pub fn new(config: ReformatConfig) -> Result<Self> {
        if !config.is_one_by_one() {
            bail!(AxonError::configuration(format!(
                "{config:?} is not a one by one window"
            )));
        }
        log::debug!("one by one formatter {config:?}");
        Ok(Self { config })
    }
}

impl Reformat for OneByOneConvolutionalFormatter {
    fn config(&self) -> &ReformatConfig {
        &self.config
    }
    fn layout(&self) -> WindowLayout {
        WindowLayout::Convolution
    }
    fn reformat_left_to_right_input(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        check_input(&self.config, &input)?;
        let dim = self.column_dim(input.ncols());
        Ok(input.as_standard_layout().into_owned().into_shape(dim)?)
    }
    fn reformat_right_to_left_output(&self, columns: ArrayView2<f32>) -> Result<Array2<f32>> {
        let examples = column_examples(self, &columns)?;
        Ok(columns
            .as_standard_layout()
            .into_owned()
            .into_shape((self.config.input_count(), examples))?)
    }
}

/// The formatter used by convolutional axons.
///
/// Picks [`OneByOneConvolutionalFormatter`] whenever the window allows it.
#[derive(Clone, Debug, PartialEq)]
pub enum ConvolutionalFormatter {
    /// Strided / padded windows.
    General(Im2ColFormatter),
    /// 1x1 windows.
    OneByOne(OneByOneConvolutionalFormatter),
}

impl ConvolutionalFormatter {
    /// Creates the formatter for `config`.
    pub fn new(config: ReformatConfig) -> Self {
        match OneByOneConvolutionalFormatter::new(config) {
            Ok(formatter) => Self::OneByOne(formatter),
            Err(_) => Self::General(Im2ColFormatter::new(config, WindowLayout::Convolution)),
        }
    }
    fn inner(&self) -> &dyn Reformat {
        match self {
            Self::General(formatter) => formatter,
            Self::OneByOne(formatter) => formatter,
        }
    }
}

impl Reformat for ConvolutionalFormatter {
    fn config(&self) -> &ReformatConfig {
        self.inner().config()
    }
    fn layout(&self) -> WindowLayout {
        WindowLayout::Convolution
    }
    fn reformat_left_to_right_input(&self, input: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.inner().reformat_left_to_right_input(input)
    }
    fn reformat_right_to_left_output(&self, columns: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.inner().reformat_right_to_left_output(columns)
    }
}
