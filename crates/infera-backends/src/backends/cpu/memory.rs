//! Memory manager for CPU backend
//!
//! Heap-resident buffers keyed by handle id. Ids are never reused, so a stale
//! handle is always reported as invalid instead of aliasing a newer buffer.

use std::collections::HashMap;

use crate::backend::BufferHandle;
use crate::error::{BackendError, Result};

/// Memory manager for CPU backend
pub struct MemoryManager {
    /// Buffers storage (heap-allocated)
    buffers: HashMap<u64, Vec<u8>>,

    /// Next buffer handle ID
    next_buffer_id: u64,

    /// Total buffers ever allocated
    allocated: u64,

    /// Total buffers freed
    freed: u64,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
            allocated: 0,
            freed: 0,
        }
    }

    /// Allocate a zero-initialised buffer
    pub fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;

        self.buffers.insert(id, vec![0u8; size]);
        self.allocated += 1;

        Ok(BufferHandle::new(id))
    }

    /// Free a buffer
    pub fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        if self.buffers.remove(&handle.id()).is_none() {
            return Err(BackendError::InvalidBufferHandle(handle.id()));
        }
        self.freed += 1;
        Ok(())
    }

    /// Copy data to the start of a buffer
    pub fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;

        if data.len() > buffer.len() {
            return Err(BackendError::BufferOutOfBounds {
                offset: 0,
                size: data.len(),
                buffer_size: buffer.len(),
            });
        }

        buffer[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copy data from the start of a buffer
    pub fn copy_from_buffer(&self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        let buffer = self
            .buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))?;

        if data.len() > buffer.len() {
            return Err(BackendError::BufferOutOfBounds {
                offset: 0,
                size: data.len(),
                buffer_size: buffer.len(),
            });
        }

        data.copy_from_slice(&buffer[..data.len()]);
        Ok(())
    }

    /// Get buffer size
    pub fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.buffers
            .get(&handle.id())
            .map(Vec::len)
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    /// Buffers allocated and not yet freed
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// (allocated, freed) totals since creation
    pub fn totals(&self) -> (u64, u64) {
        (self.allocated, self.freed)
    }
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_manager_buffer_allocation() {
        let mut manager = MemoryManager::new();

        let buffer = manager.allocate_buffer(1024).unwrap();
        assert_eq!(manager.buffer_size(buffer).unwrap(), 1024);
        assert_eq!(manager.live_buffers(), 1);

        manager.free_buffer(buffer).unwrap();

        // Should fail after free
        assert!(manager.buffer_size(buffer).is_err());
        assert_eq!(manager.live_buffers(), 0);
    }

    #[test]
    fn test_memory_manager_double_free() {
        let mut manager = MemoryManager::new();
        let buffer = manager.allocate_buffer(8).unwrap();

        manager.free_buffer(buffer).unwrap();
        assert_eq!(
            manager.free_buffer(buffer),
            Err(BackendError::InvalidBufferHandle(buffer.id()))
        );
        assert_eq!(manager.totals(), (1, 1));
    }

    #[test]
    fn test_memory_manager_buffer_copy() {
        let mut manager = MemoryManager::new();

        let buffer = manager.allocate_buffer(16).unwrap();

        let data = b"Hello, World!";
        manager.copy_to_buffer(buffer, data).unwrap();

        let mut result = vec![0u8; data.len()];
        manager.copy_from_buffer(buffer, &mut result).unwrap();

        assert_eq!(&result, data);
    }

    #[test]
    fn test_memory_manager_copy_out_of_bounds() {
        let mut manager = MemoryManager::new();
        let buffer = manager.allocate_buffer(4).unwrap();

        let result = manager.copy_to_buffer(buffer, &[0u8; 8]);
        assert!(matches!(result, Err(BackendError::BufferOutOfBounds { size: 8, .. })));
    }

    #[test]
    fn test_handle_ids_not_reused() {
        let mut manager = MemoryManager::new();
        let first = manager.allocate_buffer(4).unwrap();
        manager.free_buffer(first).unwrap();
        let second = manager.allocate_buffer(4).unwrap();
        assert_ne!(first, second);
    }
}
