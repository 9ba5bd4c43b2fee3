//! Error types for Phytoscan Core.

use thiserror::Error;

/// Result type alias for Phytoscan operations.
pub type Result<T> = std::result::Result<T, PhytoscanError>;

/// Errors that can occur in Phytoscan operations.
#[derive(Error, Debug)]
pub enum PhytoscanError {
    /// Weight archive could not be parsed.
    #[error("corrupt weight artifact: {0}")]
    CorruptArtifact(String),

    /// A parameter the compiled graph expects is absent from the archive.
    #[error("missing parameter: {layer}.{param}")]
    MissingParameter {
        /// Layer identifier, e.g. `conv1.1`.
        layer: String,
        /// Parameter role, e.g. `running_var`.
        param: String,
    },

    /// Shape mismatch error.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Caller-supplied image rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A computed tensor holds NaN or infinite values.
    #[error("numeric fault in {stage}: {count} non-finite values")]
    NumericFault {
        /// Graph stage that produced the values.
        stage: String,
        /// Number of non-finite entries.
        count: usize,
    },

    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    TensorError(#[from] candle_core::Error),
}

impl PhytoscanError {
    /// Build a [`PhytoscanError::MissingParameter`].
    pub fn missing(layer: impl Into<String>, param: impl Into<String>) -> Self {
        Self::MissingParameter {
            layer: layer.into(),
            param: param.into(),
        }
    }

    /// Whether the error is recoverable per call (bad input) rather than
    /// a construction-time fault.
    pub fn is_per_call(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::NumericFault { .. })
    }
}
