//! Backend trait for native tensor memory and cached graph execution
//!
//! This trait defines the boundary between the inference engine and the
//! native layer. Everything behind it (device memory, graph compilation,
//! kernel launch) is owned by the backend; the engine only ever sees opaque
//! handles.

use std::any::Any;

use super::types::{BufferHandle, CachedOpHandle, Device, ForwardInput, ForwardOutput};
use crate::error::Result;
use crate::model::Model;

/// Backend trait for native tensor memory and graph execution
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────────────┐
/// │                     Backend Trait                        │
/// │  - Buffer management (allocate/free/copy)                │
/// │  - Cached op lifecycle (create/free)                     │
/// │  - forward() launching possibly-async device work        │
/// └─────────────────────┬───────────────────────────────────┘
///                       │
///         ┌─────────────┼─────────────┐
///         ▼             ▼             ▼
///   ┌─────────┐  ┌─────────┐  ┌─────────┐
///   │   CPU   │  │   GPU   │  │  Test   │
///   │ Backend │  │ Backend │  │ Doubles │
///   └─────────┘  └─────────┘  └─────────┘
/// ```
///
/// # Memory Model
///
/// Buffers have no owner on this side of the boundary: whoever allocates a
/// buffer is responsible for freeing it exactly once. Output buffers created
/// by [`forward`](Backend::forward) are handed to the caller on the same terms.
///
/// # Asynchrony
///
/// `forward` returns as soon as the work is launched. Each output carries a
/// [`CompletionSignal`](crate::CompletionSignal); its contents may only be
/// read after the signal completes.
///
/// # Usage
///
/// ```rust
/// use infera_backends::{Backend, CpuBackend, DType, ForwardInput, HostTensor, Model};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut backend = CpuBackend::new()?;
///
/// let model = Model::builder("double")
///     .input("x", DType::F32, vec![2])
///     .output("y", DType::F32, vec![2])
///     .graph(|inputs| {
///         let x = inputs[0].to_vec::<f32>()?;
///         let y: Vec<f32> = x.iter().map(|v| v * 2.0).collect();
///         Ok(vec![HostTensor::from_slice(vec![2], &y)?])
///     })
///     .build()?;
/// let op = backend.create_cached_op(&model)?;
///
/// let x = backend.allocate_buffer(8)?;
/// backend.copy_to_buffer(x, bytemuck::cast_slice(&[1.0f32, 2.0]))?;
///
/// let inputs = vec![ForwardInput {
///     name: "x".into(),
///     handle: x,
///     dtype: DType::F32,
///     shape: vec![2],
///     signal: Default::default(),
/// }];
/// let outputs = backend.forward(op, &inputs)?;
/// outputs[0].signal.await_readable()?;
///
/// let mut y = [0.0f32; 2];
/// backend.copy_from_buffer(outputs[0].handle, bytemuck::cast_slice_mut(&mut y))?;
/// assert_eq!(y, [2.0, 4.0]);
///
/// backend.free_buffer(outputs[0].handle)?;
/// backend.free_buffer(x)?;
/// backend.free_cached_op(op)?;
/// # Ok(())
/// # }
/// ```
pub trait Backend {
    // ============================================================================================
    // Device
    // ============================================================================================

    /// The device this backend executes on
    fn device(&self) -> Device;

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a buffer of the given size in bytes
    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle>;

    /// Free a previously allocated buffer
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer handle is invalid (including a handle
    /// that was already freed).
    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()>;

    /// Copy data from host to buffer
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer handle is invalid
    /// - Data size exceeds buffer size
    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()>;

    /// Copy data from buffer to host
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Buffer handle is invalid
    /// - Data size exceeds buffer size
    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()>;

    /// Get buffer size in bytes
    fn buffer_size(&self, handle: BufferHandle) -> Result<usize>;

    /// Number of buffers currently allocated and not yet freed
    fn live_buffers(&self) -> usize;

    // ============================================================================================
    // Cached Graph Execution
    // ============================================================================================

    /// Compile and bind `model` into a reusable cached op
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot build the graph. Callers treat
    /// this as fatal for whatever owns the cached op.
    fn create_cached_op(&mut self, model: &Model) -> Result<CachedOpHandle>;

    /// Launch the cached op on the bound inputs
    ///
    /// Inputs are matched to the graph's declared inputs by name. The call
    /// returns once the work is launched; outputs are listed in the graph's
    /// declared output order and carry pending completion signals.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or the inputs cannot be
    /// bound. Failures of the launched work surface through the output
    /// signals instead.
    fn forward(&mut self, op: CachedOpHandle, inputs: &[ForwardInput]) -> Result<Vec<ForwardOutput>>;

    /// Destroy a cached op
    fn free_cached_op(&mut self, op: CachedOpHandle) -> Result<()>;

    // ============================================================================================
    // Type Introspection
    // ============================================================================================

    /// Downcast backend to &dyn Any for backend-specific access
    fn as_any(&self) -> &dyn Any;
}
