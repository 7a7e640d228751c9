//! Native backend boundary for infera
//!
//! This crate provides:
//! - **Backend Trait**: Opaque buffer handles and cached graph execution
//! - **Completion Signals**: Readiness of values produced by asynchronous device work
//! - **Models**: Loaded graph signatures plus graph bodies
//! - **CPU Backend**: Reference implementation running launches on a host stream
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   infera-core engine                     │
//! │        (arenas, translators, predictor, metrics)         │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ BufferHandle / CachedOpHandle
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Backend Trait                        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//!                 ┌───────────┐
//!                 │    CPU    │
//!                 │  Backend  │
//!                 └───────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use infera_backends::{shared, Backend, CpuBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = shared(CpuBackend::new()?);
//!
//! let buffer = backend.write().allocate_buffer(16)?;
//! backend.write().copy_to_buffer(buffer, bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]))?;
//! assert_eq!(backend.read().buffer_size(buffer)?, 16);
//!
//! backend.write().free_buffer(buffer)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

pub mod backend;
pub mod backends;
pub mod error;
pub mod host;
pub mod model;
pub mod signal;

// Re-export public API
pub use backend::{
    byte_len, element_count, Backend, BufferHandle, CachedOpHandle, DType, Device, DeviceKind, Element, ForwardInput,
    ForwardOutput, TensorSpec,
};
pub use backends::CpuBackend;
pub use error::{BackendError, Result};
pub use host::HostTensor;
pub use model::{GraphFn, Model, ModelBuilder};
pub use signal::{CompletionNotifier, CompletionSignal};

/// A backend shared between the engine and every handle owner
pub type SharedBackend = Arc<RwLock<Box<dyn Backend + Send + Sync>>>;

/// Wrap a backend for shared use
pub fn shared<B>(backend: B) -> SharedBackend
where
    B: Backend + Send + Sync + 'static,
{
    Arc::new(RwLock::new(Box::new(backend)))
}
