//! Error types for infera-core operations

use std::fmt;

use infera_backends::{BackendError, DType};

use crate::arena::ArenaId;

/// Result type for infera-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Cause carried by a failed translator stage
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type returned by [`Translator`](crate::Translator) stages
pub type TranslateResult<T> = std::result::Result<T, BoxError>;

/// Translator stage that produced a conversion error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Application input to tensors
    Input,
    /// Tensors to application output
    Output,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Input => write!(f, "input"),
            Phase::Output => write!(f, "output"),
        }
    }
}

/// Errors that can occur in infera-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A translator stage failed; fatal to the call only
    #[error("{phase} conversion failed: {source}")]
    Conversion {
        phase: Phase,
        #[source]
        source: BoxError,
    },

    /// Graph launch or device execution failed; fatal to the call only
    #[error("inference failed: {0}")]
    Inference(#[from] BackendError),

    /// Allocation or read through an arena that was already released
    #[error("{0} is closed")]
    ArenaClosed(ArenaId),

    /// The engine could not be built
    #[error("engine construction failed: {0}")]
    EngineConstruction(#[source] BackendError),

    /// Tensor read as the wrong element type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: DType, actual: DType },

    /// Host data does not fill the requested shape
    #[error("shape mismatch: {len} elements do not fill shape {shape:?}")]
    ShapeMismatch { shape: Vec<usize>, len: usize },

    /// Lookup of a tensor name absent from a list
    #[error("no tensor named '{0}'")]
    UnknownTensor(String),
}

impl Error {
    /// Wrap a translator failure for the given stage
    pub fn conversion(phase: Phase, source: impl Into<BoxError>) -> Self {
        Self::Conversion {
            phase,
            source: source.into(),
        }
    }

    /// True for errors that end only the current call
    pub fn is_per_call(&self) -> bool {
        matches!(self, Self::Conversion { .. } | Self::Inference(_))
    }
}
