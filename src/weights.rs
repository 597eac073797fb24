//! Connection weights and biases owned by trainable axons.
use crate::{context::AdjustmentDirection, error::AxonError};
use anyhow::{bail, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use rand::distributions::{Distribution, Uniform};

pub(crate) fn xavier(inputs: usize, outputs: usize) -> Uniform<f32> {
    let fan = (inputs + outputs).max(1);
    let a = (6. / fan as f32).sqrt();
    Uniform::new_inclusive(-a, a)
}

/// Weight storage for one axon.
///
/// `connection_weights` is always `outputs x inputs`, where the meaning of inputs and outputs
/// depends on the axon (a convolution stores `output_depth x (input_depth * filter)`, with one
/// left to right bias per output channel and one right to left bias per input channel).
/// Values only change through the `adjust_*` methods, which bump [`.version()`](Self::version()).
#[derive(Clone, Debug, PartialEq)]
pub struct AxonWeights {
    connection_weights: Array2<f32>,
    connection_weights_mask: Option<Array2<f32>>,
    left_to_right_biases: Option<Array1<f32>>,
    right_to_left_biases: Option<Array1<f32>>,
    inputs: usize,
    outputs: usize,
    version: u64,
}

impl AxonWeights {
    /// Creates weights for `inputs` and `outputs` from optional initial values.
    ///
    /// Missing connection weights are drawn from a uniform distribution of (-a, a) where
    /// a = sqrt(6 / (inputs + outputs)). Missing biases are zero. A bias vector is only stored
    /// when its length is given.
    ///
    /// **Errors**
    ///
    /// If any supplied value does not match the expected shape.
    pub fn new(
        inputs: usize,
        outputs: usize,
        connection_weights: Option<Array2<f32>>,
        left_to_right_biases: BiasInit,
        right_to_left_biases: BiasInit,
    ) -> Result<Self> {
        let connection_weights = match connection_weights {
            Some(weights) => {
                if weights.dim() != (outputs, inputs) {
                    bail!(AxonError::shape(
                        format!("connection weights {:?}", [outputs, inputs]),
                        format!("{:?}", weights.shape()),
                    ));
                }
                weights
            }
            None => {
                let data = xavier(inputs, outputs)
                    .sample_iter(&mut rand::thread_rng())
                    .take(inputs * outputs)
                    .collect::<Vec<_>>();
                Array2::from_shape_vec((outputs, inputs), data)?
            }
        };
        let left_to_right_biases = left_to_right_biases.build("left to right biases")?;
        let right_to_left_biases = right_to_left_biases.build("right to left biases")?;
        Ok(Self {
            connection_weights,
            connection_weights_mask: None,
            left_to_right_biases,
            right_to_left_biases,
            inputs,
            outputs,
            version: 0,
        })
    }
    /// Restricts which connections exist.
    ///
    /// Masked out connections are zeroed now and never move under adjustment.
    ///
    /// **Errors**
    ///
    /// If the mask is not the shape of the connection weights.
    pub fn with_connection_weights_mask(mut self, mask: Array2<f32>) -> Result<Self> {
        if mask.raw_dim() != self.connection_weights.raw_dim() {
            bail!(AxonError::shape(
                format!("mask {:?}", self.connection_weights.shape()),
                format!("{:?}", mask.shape()),
            ));
        }
        if mask.iter().all(|x| *x == 0.) {
            log::debug!("connection weights mask removes every connection");
        }
        self.connection_weights *= &mask;
        self.connection_weights_mask.replace(mask);
        Ok(self)
    }
    /// The number of input neurons (columns of the connection weights).
    pub fn inputs(&self) -> usize {
        self.inputs
    }
    /// The number of output neurons (rows of the connection weights).
    pub fn outputs(&self) -> usize {
        self.outputs
    }
    /// Incremented on every adjustment.
    pub fn version(&self) -> u64 {
        self.version
    }
    /// The connection weights.
    pub fn connection_weights(&self) -> ArrayView2<f32> {
        self.connection_weights.view()
    }
    /// The connection weights mask, if any.
    pub fn connection_weights_mask(&self) -> Option<ArrayView2<f32>> {
        self.connection_weights_mask.as_ref().map(Array2::view)
    }
    /// The left to right biases, if any.
    pub fn left_to_right_biases(&self) -> Option<ArrayView1<f32>> {
        self.left_to_right_biases.as_ref().map(Array1::view)
    }
    /// The right to left biases, if any.
    pub fn right_to_left_biases(&self) -> Option<ArrayView1<f32>> {
        self.right_to_left_biases.as_ref().map(Array1::view)
    }
    /// A copy of the connection weights.
    pub fn detached_connection_weights(&self) -> Array2<f32> {
        self.connection_weights.clone()
    }
    /// A copy of the left to right biases.
    pub fn detached_left_to_right_biases(&self) -> Option<Array1<f32>> {
        self.left_to_right_biases.clone()
    }
    /// A copy of the right to left biases.
    pub fn detached_right_to_left_biases(&self) -> Option<Array1<f32>> {
        self.right_to_left_biases.clone()
    }
    /// Adds or subtracts `delta` from the connection weights.
    ///
    /// The delta is multiplied by the connection weights mask, if any.
    ///
    /// **Errors**
    ///
    /// If `delta` is not the shape of the connection weights.
    pub fn adjust_connection_weights(
        &mut self,
        delta: ArrayView2<f32>,
        direction: AdjustmentDirection,
    ) -> Result<()> {
        if delta.raw_dim() != self.connection_weights.raw_dim() {
            bail!(AxonError::shape(
                format!("connection weights delta {:?}", self.connection_weights.shape()),
                format!("{:?}", delta.shape()),
            ));
        }
        let sign = sign(direction);
        match self.connection_weights_mask.as_ref() {
            Some(mask) => Zip::from(&mut self.connection_weights)
                .and(&delta)
                .and(mask)
                .for_each(|w, d, m| *w += sign * d * m),
            None => self.connection_weights.scaled_add(sign, &delta),
        }
        self.version += 1;
        Ok(())
    }
    /// Adds or subtracts `delta` from the left to right biases.
    ///
    /// **Errors**
    ///
    /// If there are no left to right biases or `delta` has the wrong length.
    pub fn adjust_left_to_right_biases(
        &mut self,
        delta: ArrayView1<f32>,
        direction: AdjustmentDirection,
    ) -> Result<()> {
        adjust_biases(
            self.left_to_right_biases.as_mut(),
            delta,
            direction,
            "left to right biases",
        )?;
        self.version += 1;
        Ok(())
    }
    /// Adds or subtracts `delta` from the right to left biases.
    ///
    /// **Errors**
    ///
    /// If there are no right to left biases or `delta` has the wrong length.
    pub fn adjust_right_to_left_biases(
        &mut self,
        delta: ArrayView1<f32>,
        direction: AdjustmentDirection,
    ) -> Result<()> {
        adjust_biases(
            self.right_to_left_biases.as_mut(),
            delta,
            direction,
            "right to left biases",
        )?;
        self.version += 1;
        Ok(())
    }
}

fn sign(direction: AdjustmentDirection) -> f32 {
    match direction {
        AdjustmentDirection::Addition => 1.,
        AdjustmentDirection::Subtraction => -1.,
    }
}

fn adjust_biases(
    biases: Option<&mut Array1<f32>>,
    delta: ArrayView1<f32>,
    direction: AdjustmentDirection,
    name: &str,
) -> Result<()> {
    let Some(biases) = biases else {
        bail!(AxonError::unsupported(format!("axon has no {name}")));
    };
    if biases.raw_dim() != delta.raw_dim() {
        bail!(AxonError::shape(
            format!("{name} delta [{}]", biases.len()),
            format!("{:?}", delta.shape()),
        ));
    }
    biases.scaled_add(sign(direction), &delta);
    Ok(())
}

/// How to create an optional bias vector.
#[derive(Clone, Debug, PartialEq)]
pub enum BiasInit {
    /// No biases.
    None,
    /// `len` zeros.
    Zeros(usize),
    /// Supplied values of length `len`.
    Values {
        /// Expected length.
        len: usize,
        /// The values.
        values: Array1<f32>,
    },
}

impl BiasInit {
    /// Biases of `len` from optional values, or no biases when `enabled` is false.
    pub fn from_option(enabled: bool, len: usize, values: Option<Array1<f32>>) -> Self {
        match (enabled, values) {
            (false, _) => Self::None,
            (true, Some(values)) => Self::Values { len, values },
            (true, None) => Self::Zeros(len),
        }
    }
    fn build(self, name: &str) -> Result<Option<Array1<f32>>> {
        match self {
            Self::None => Ok(None),
            Self::Zeros(len) => Ok(Some(Array1::zeros(len))),
            Self::Values { len, values } => {
                if values.len() != len {
                    bail!(AxonError::shape(
                        format!("{name} [{len}]"),
                        format!("{:?}", values.shape()),
                    ));
                }
                Ok(Some(values))
            }
        }
    }
}
