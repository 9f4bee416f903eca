//! Error type for phase model construction, training and persistence.
//!
//! # Error Categories
//!
//! | Category | Variants | Recovery Strategy |
//! |----------|----------|-------------------|
//! | Validation | DimensionMismatch, EmptyInput, InvalidValue | Fix input data |
//! | Configuration | ConfigError | Fix configuration |
//! | Computation | TensorError, NonFiniteLoss | Inspect inputs / learning rate |
//! | Persistence | IoError, SerializationError, CheckpointError | Fix paths or artifact |
//!
//! Shape and configuration errors are fatal and surface before the first
//! epoch. `NonFiniteLoss` and `TensorError` raised while scoring a single
//! (celltype, gene) pair are absorbed by the sine-fit term and counted.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for all phase-model failures.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// A tensor or matrix had the wrong size along some axis.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// An input collection was empty where data is required.
    #[error("Empty input: {context}")]
    EmptyInput { context: String },

    /// A value was outside its valid domain.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    /// Configuration could not be read, parsed or validated.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// A candle tensor operation failed.
    #[error("Tensor error: {message}")]
    TensorError { message: String },

    /// A loss evaluated to NaN or infinity.
    #[error("Non-finite loss in {context}: {value}")]
    NonFiniteLoss { context: String, value: f32 },

    /// Filesystem access failed.
    #[error("I/O error at {path:?}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON or safetensors (de)serialization failed.
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    /// A checkpoint was missing tensors or had inconsistent shapes.
    #[error("Checkpoint error: {message}")]
    CheckpointError { message: String },
}

/// Result alias used throughout the crate.
pub type PhaseResult<T> = Result<T, PhaseError>;

impl PhaseError {
    /// Build a `DimensionMismatch` error.
    pub fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Build a `ConfigError`.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Whether the error is a shape or configuration problem that must abort a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::EmptyInput { .. }
                | Self::InvalidValue { .. }
                | Self::ConfigError { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_message() {
        let err = PhaseError::dimension("sample matrix columns", 50, 49);
        let msg = err.to_string();
        assert!(msg.contains("sample matrix columns"));
        assert!(msg.contains("expected 50"));
        assert!(msg.contains("got 49"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_tensor_error_not_fatal() {
        let err = PhaseError::TensorError {
            message: "matmul shape".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
