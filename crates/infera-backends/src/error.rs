//! Error types for backend operations

use std::fmt;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur at the native backend boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Invalid buffer handle
    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(u64),

    /// Invalid cached op handle
    #[error("invalid cached op handle: {0}")]
    InvalidCachedOp(u64),

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// Type mismatch
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Shape mismatch
    #[error("shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Element or byte count of a shape does not fit in `usize`
    #[error("shape {0:?} overflows the addressable size")]
    ShapeOverflow(Vec<usize>),

    /// Model definition rejected while building a cached op
    #[error("invalid model '{model}': {reason}")]
    InvalidModel { model: String, reason: String },

    /// A declared graph input was not supplied to forward
    #[error("missing graph input '{0}'")]
    MissingInput(String),

    /// A supplied tensor name does not match any graph input
    #[error("graph has no input named '{0}'")]
    UnknownInput(String),

    /// Device string could not be parsed
    #[error("invalid device '{0}' (expected cpu, gpu or gpu:<ordinal>)")]
    InvalidDevice(String),

    /// Device does not match the backend
    #[error("device mismatch: backend serves {backend}, requested {requested}")]
    DeviceMismatch { backend: String, requested: String },

    /// Asynchronous device work failed; observed at the completion point
    #[error("device execution failed: {0}")]
    DeviceFailure(String),

    /// Graph body returned an error
    #[error("graph execution error: {0}")]
    ExecutionError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an execution error
    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Create an invalid model error
    pub fn invalid_model(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            model: model.into(),
            reason: reason.into(),
        }
    }
}
