//! Activation batches.
use crate::error::AxonError;
use anyhow::{bail, Result};
use derive_more::Display;
use ndarray::{concatenate, s, Array2, ArrayView2, ArrayViewMut2, Axis};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How features map onto the two matrix axes.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeatureOrientation {
    /// One row per feature, one column per example. Required by every axon.
    RowsSpanFeatures,
    /// One row per example, one column per feature.
    ColumnsSpanFeatures,
}

/// A batch of examples flowing through an axon.
///
/// When `bias_row` is set, the first row along the feature axis holds the bias unit (all ones)
/// and is not counted by [`.feature_count()`](Self::feature_count()).
#[derive(Clone, Debug, PartialEq)]
pub struct ActivationBatch {
    data: Array2<f32>,
    orientation: FeatureOrientation,
    bias_row: bool,
    immutable: bool,
}

impl ActivationBatch {
    /// Creates a mutable batch with rows spanning features and no bias row.
    pub fn new(data: Array2<f32>) -> Self {
        Self {
            data,
            orientation: FeatureOrientation::RowsSpanFeatures,
            bias_row: false,
            immutable: false,
        }
    }
    /// Creates a batch with explicit orientation and bias row.
    ///
    /// **Errors**
    ///
    /// If `bias_row` is set but the feature axis is empty.
    pub fn from_parts(
        data: Array2<f32>,
        orientation: FeatureOrientation,
        bias_row: bool,
    ) -> Result<Self> {
        let features = match orientation {
            FeatureOrientation::RowsSpanFeatures => data.nrows(),
            FeatureOrientation::ColumnsSpanFeatures => data.ncols(),
        };
        if bias_row && features == 0 {
            bail!(AxonError::shape("a bias row", "no features"));
        }
        Ok(Self {
            data,
            orientation,
            bias_row,
            immutable: false,
        })
    }
    /// The orientation.
    pub fn orientation(&self) -> FeatureOrientation {
        self.orientation
    }
    /// Whether the batch carries a bias row.
    pub fn has_bias_row(&self) -> bool {
        self.bias_row
    }
    /// Whether in place mutation is forbidden.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }
    /// The number of features, excluding the bias row.
    pub fn feature_count(&self) -> usize {
        let features = match self.orientation {
            FeatureOrientation::RowsSpanFeatures => self.data.nrows(),
            FeatureOrientation::ColumnsSpanFeatures => self.data.ncols(),
        };
        features - usize::from(self.bias_row)
    }
    /// The number of examples.
    pub fn example_count(&self) -> usize {
        match self.orientation {
            FeatureOrientation::RowsSpanFeatures => self.data.ncols(),
            FeatureOrientation::ColumnsSpanFeatures => self.data.nrows(),
        }
    }
    /// The raw buffer, including the bias row if present.
    pub fn data(&self) -> ArrayView2<f32> {
        self.data.view()
    }
    /// The features without the bias row.
    pub fn features(&self) -> ArrayView2<f32> {
        let skip = usize::from(self.bias_row);
        match self.orientation {
            FeatureOrientation::RowsSpanFeatures => self.data.slice(s![skip.., ..]),
            FeatureOrientation::ColumnsSpanFeatures => self.data.slice(s![.., skip..]),
        }
    }
    /// Mutable access to the raw buffer.
    ///
    /// **Errors**
    ///
    /// If the batch has been frozen.
    pub fn data_mut(&mut self) -> Result<ArrayViewMut2<f32>> {
        if self.immutable {
            bail!(AxonError::ImmutableActivation);
        }
        Ok(self.data.view_mut())
    }
    /// Forbids any further in place mutation.
    pub fn freeze(mut self) -> Self {
        self.immutable = true;
        self
    }
    /// Consumes the batch, returning the raw buffer.
    pub fn into_data(self) -> Array2<f32> {
        self.data
    }
    /// Returns the batch with a leading row (or column) of ones.
    ///
    /// Returns the batch unchanged if it already has one.
    pub fn with_bias_row(self) -> Self {
        if self.bias_row {
            return self;
        }
        let data = match self.orientation {
            FeatureOrientation::RowsSpanFeatures => {
                let ones = Array2::ones((1, self.data.ncols()));
                concatenate![Axis(0), ones, self.data]
            }
            FeatureOrientation::ColumnsSpanFeatures => {
                let ones = Array2::ones((self.data.nrows(), 1));
                concatenate![Axis(1), ones, self.data]
            }
        };
        Self {
            data,
            bias_row: true,
            immutable: false,
            ..self
        }
    }
    /// Returns the batch without its bias row.
    pub fn without_bias_row(self) -> Self {
        if !self.bias_row {
            return self;
        }
        let data = self.features().to_owned();
        Self {
            data,
            bias_row: false,
            immutable: false,
            ..self
        }
    }
    /// Returns the batch with rows spanning features, transposing if required.
    pub fn to_rows_span_features(&self) -> Self {
        match self.orientation {
            FeatureOrientation::RowsSpanFeatures => self.clone(),
            FeatureOrientation::ColumnsSpanFeatures => Self {
                data: self.data.t().as_standard_layout().into_owned(),
                orientation: FeatureOrientation::RowsSpanFeatures,
                bias_row: self.bias_row,
                immutable: false,
            },
        }
    }
    pub(crate) fn expect_rows_span_features(&self) -> Result<()> {
        if self.orientation != FeatureOrientation::RowsSpanFeatures {
            bail!(AxonError::Orientation(self.orientation.to_string()));
        }
        Ok(())
    }
}

impl From<Array2<f32>> for ActivationBatch {
    fn from(data: Array2<f32>) -> Self {
        Self::new(data)
    }
}
