use thiserror::Error;

/// Failures raised by axons, reformatters and the weight store.
///
/// Public operations return [`anyhow::Result`]; the underlying [`AxonError`] can be
/// recovered with [`anyhow::Error::downcast_ref`] to tell a malformed topology apart from a
/// shape problem in a single call.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AxonError {
    /// Neuron geometry and connection config disagree. Raised at construction.
    #[error("invalid axon configuration: {0}")]
    Configuration(String),
    /// An activation or adjustment does not have the shape the axon expects.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// What the axon expected.
        expected: String,
        /// What the caller supplied.
        found: String,
    },
    /// Activation batches must have rows spanning the features.
    #[error("unsupported feature orientation {0}, expected rows to span features")]
    Orientation(String),
    /// The axon type does not offer the requested operation.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    /// Keep probabilities must lie in (0, 1].
    #[error("keep probability {0} is outside (0, 1]")]
    InvalidProbability(f32),
    /// In-place mutation of a frozen activation batch.
    #[error("activation batch is immutable")]
    ImmutableActivation,
    /// A right-to-left push needs the forward activation of the same step.
    #[error("missing activation: {0}")]
    MissingActivation(String),
}

impl AxonError {
    pub(crate) fn shape(expected: impl ToString, found: impl ToString) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }
}
