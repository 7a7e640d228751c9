//! Tensor handles owned by arenas

use std::fmt;
use std::sync::Arc;

use infera_backends::{
    byte_len, element_count, BackendError, BufferHandle, CompletionSignal, DType, Element, ForwardInput, HostTensor,
};

use crate::arena::{ArenaId, ArenaStore};
use crate::error::{Error, Result};

/// Reference to a native buffer plus the signal guarding its contents
///
/// A `Tensor` does not own its buffer; the arena recorded in
/// [`arena`](Tensor::arena) does. Cloning yields another reference to the same
/// buffer. Reads block until the producing device work has completed and fail
/// with [`Error::ArenaClosed`] once the owner has been released.
#[derive(Clone)]
pub struct Tensor {
    handle: BufferHandle,
    dtype: DType,
    shape: Vec<usize>,
    signal: CompletionSignal,
    arena: ArenaId,
    store: Arc<ArenaStore>,
}

impl Tensor {
    pub(crate) fn new(
        handle: BufferHandle,
        dtype: DType,
        shape: Vec<usize>,
        signal: CompletionSignal,
        arena: ArenaId,
        store: Arc<ArenaStore>,
    ) -> Self {
        Self {
            handle,
            dtype,
            shape,
            signal,
            arena,
            store,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements
    ///
    /// Zero for a shape whose element count overflows; such a tensor cannot
    /// be read.
    pub fn len(&self) -> usize {
        element_count(&self.shape).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Arena that owns the buffer
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    pub fn signal(&self) -> &CompletionSignal {
        &self.signal
    }

    /// True once the producing work has finished (successfully or not)
    pub fn is_ready(&self) -> bool {
        self.signal.is_complete()
    }

    /// Block until the contents are readable
    ///
    /// Idempotent. A device failure in the producing work is reported as
    /// [`Error::Inference`].
    pub fn await_readable(&self) -> Result<()> {
        self.signal.await_readable().map_err(Error::from)
    }

    /// Download the contents as `T`, waiting for the producer first
    ///
    /// # Errors
    ///
    /// - [`Error::TypeMismatch`] if `T` is not this tensor's dtype
    /// - [`Error::Inference`] if the producing work failed
    /// - [`Error::ArenaClosed`] if the owning arena was released
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(Error::TypeMismatch {
                expected: self.dtype,
                actual: T::DTYPE,
            });
        }
        let bytes = self.read_bytes()?;
        Ok(bytemuck::pod_collect_to_vec::<u8, T>(&bytes))
    }

    /// Download the contents into a host tensor, waiting for the producer first
    pub fn to_host(&self) -> Result<HostTensor> {
        let bytes = self.read_bytes()?;
        Ok(HostTensor::from_bytes(self.dtype, self.shape.clone(), bytes)?)
    }

    fn read_bytes(&self) -> Result<Vec<u8>> {
        self.await_readable()?;
        let len = byte_len(self.dtype, &self.shape).ok_or_else(|| BackendError::ShapeOverflow(self.shape.clone()))?;
        let mut bytes = vec![0u8; len];
        self.store.read(self.arena, self.handle, &mut bytes)?;
        Ok(bytes)
    }

    /// Bind this tensor as the graph input `name`
    pub(crate) fn bind(&self, name: &str) -> ForwardInput {
        ForwardInput {
            name: name.to_string(),
            handle: self.handle,
            dtype: self.dtype,
            shape: self.shape.clone(),
            signal: self.signal.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_signal(self, signal: CompletionSignal) -> Self {
        Self { signal, ..self }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("handle", &self.handle)
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("arena", &self.arena)
            .field("signal", &self.signal)
            .finish()
    }
}
