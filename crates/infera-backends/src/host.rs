//! Host-resident tensor values
//!
//! Graph bodies compute on [`HostTensor`]s: the CPU backend downloads bound
//! input buffers into host tensors, runs the graph, and uploads the results
//! into the output buffers it allocated for the launch.

use crate::backend::{byte_len, element_count, DType, Element};
use crate::error::{BackendError, Result};

/// A dense tensor living in host memory
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    dtype: DType,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl HostTensor {
    /// Build a tensor from typed elements
    ///
    /// # Errors
    ///
    /// Returns an error if `data.len()` does not match the element count of `shape`.
    pub fn from_slice<T: Element>(shape: impl Into<Vec<usize>>, data: &[T]) -> Result<Self> {
        let shape = shape.into();
        let expected = element_count(&shape).ok_or_else(|| BackendError::ShapeOverflow(shape.clone()))?;
        if data.len() != expected {
            return Err(BackendError::BufferOutOfBounds {
                offset: 0,
                size: data.len(),
                buffer_size: expected,
            });
        }
        Ok(Self {
            dtype: T::DTYPE,
            shape,
            data: bytemuck::cast_slice(data).to_vec(),
        })
    }

    /// Build a tensor from raw bytes
    pub fn from_bytes(dtype: DType, shape: impl Into<Vec<usize>>, data: Vec<u8>) -> Result<Self> {
        let shape = shape.into();
        let expected = byte_len(dtype, &shape).ok_or_else(|| BackendError::ShapeOverflow(shape.clone()))?;
        if data.len() != expected {
            return Err(BackendError::BufferOutOfBounds {
                offset: 0,
                size: data.len(),
                buffer_size: expected,
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Single-element tensor of rank 0
    pub fn scalar<T: Element>(value: T) -> Self {
        Self {
            dtype: T::DTYPE,
            shape: Vec::new(),
            data: bytemuck::bytes_of(&value).to_vec(),
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Copy the elements out as `T`
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::TypeMismatch`] if `T` is not the tensor's dtype.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(BackendError::type_mismatch(self.dtype, T::DTYPE));
        }
        // The byte vector has no alignment guarantee for T; collect copies element-wise.
        Ok(bytemuck::pod_collect_to_vec::<u8, T>(&self.data))
    }

    /// Same data viewed under a new shape with the same element count
    pub fn reshape(self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        if element_count(&shape) != Some(self.len()) {
            return Err(BackendError::ShapeMismatch {
                name: "reshape".into(),
                expected: self.shape,
                actual: shape,
            });
        }
        Ok(Self { shape, ..self })
    }
}
