//! Neuron group descriptors for the two sides of an axon.
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// A flat group of neurons.
///
/// `bias_unit` declares an extra always-on neuron. On the left side of an axon it gives the
/// axon left-to-right biases, on the right side right-to-left biases.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Neurons {
    count: usize,
    bias_unit: bool,
}

impl Neurons {
    /// Creates a group of `count` neurons, excluding the bias unit.
    pub fn new(count: usize, bias_unit: bool) -> Self {
        Self { count, bias_unit }
    }
    /// The number of neurons excluding the bias unit.
    pub fn count(&self) -> usize {
        self.count
    }
    /// Whether the group has a bias unit.
    pub fn has_bias_unit(&self) -> bool {
        self.bias_unit
    }
}

impl Debug for Neurons {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Neurons");
        builder.field("count", &self.count);
        if self.bias_unit {
            builder.field("bias_unit", &true);
        }
        builder.finish()
    }
}

/// A spatial group of neurons, laid out channel-major.
///
/// Feature `d * height * width + row * width + column` holds channel `d` at (`row`, `column`).
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Neurons3D {
    width: usize,
    height: usize,
    depth: usize,
    bias_unit: bool,
}

impl Neurons3D {
    /// Creates a `width` x `height` x `depth` group.
    pub fn new(width: usize, height: usize, depth: usize, bias_unit: bool) -> Self {
        Self {
            width,
            height,
            depth,
            bias_unit,
        }
    }
    /// The width of each channel.
    pub fn width(&self) -> usize {
        self.width
    }
    /// The height of each channel.
    pub fn height(&self) -> usize {
        self.height
    }
    /// The number of channels.
    pub fn depth(&self) -> usize {
        self.depth
    }
    /// `width * height`.
    pub fn grid(&self) -> usize {
        self.width * self.height
    }
    /// The number of neurons excluding the bias unit.
    pub fn count(&self) -> usize {
        self.width * self.height * self.depth
    }
    /// Whether the group has a bias unit.
    pub fn has_bias_unit(&self) -> bool {
        self.bias_unit
    }
    /// Forgets the spatial layout.
    pub fn flatten(&self) -> Neurons {
        Neurons::new(self.count(), self.bias_unit)
    }
}

impl Debug for Neurons3D {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("Neurons3D");
        builder.field("shape", &[self.width, self.height, self.depth]);
        if self.bias_unit {
            builder.field("bias_unit", &true);
        }
        builder.finish()
    }
}

impl From<Neurons3D> for Neurons {
    fn from(neurons: Neurons3D) -> Self {
        neurons.flatten()
    }
}
