//! Resource arenas: hierarchical owners of native tensor buffers
//!
//! Every native buffer the engine touches is owned by exactly one arena.
//! Arenas form a tree rooted at the engine's top-level arena; releasing an
//! arena frees the buffers it owns directly, then cascades through every
//! descendant, each exactly once.
//!
//! # Layout
//!
//! The tree lives in a flat table instead of in the arena values themselves:
//!
//! ```text
//! ArenaTable
//! ├── slots[0]  root      gen 0  handles [buf1]        children [1, 2]
//! ├── slots[1]  input     gen 3  handles [buf7, buf8]  children []
//! ├── slots[2]  output    gen 1  handles [buf9]        children []
//! └── owners    buf1 → 0.0, buf7 → 1.3, buf8 → 1.3, buf9 → 2.1
//! ```
//!
//! An [`ArenaId`] is a slot index plus a generation. Released slots are
//! recycled with a bumped generation, so a stale id never reaches a newer
//! arena. Parent links are indices, so the tree has no reference cycles and
//! cascading is a walk over the table.
//!
//! # Locking
//!
//! The table mutex is always taken before the backend lock. Release holds
//! the table while it frees buffers, which keeps readers from observing a
//! handle whose arena is half released.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use infera_backends::{
    byte_len, element_count, BackendError, BufferHandle, CompletionSignal, DType, Element, ForwardOutput, SharedBackend,
};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::tensor::Tensor;

// ================================================================================================
// Identifiers
// ================================================================================================

/// Generational index of an arena in its table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId {
    index: u32,
    generation: u32,
}

impl ArenaId {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arena {}.{}", self.index, self.generation)
    }
}

/// Lifetime counters of an arena table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Arenas ever created
    pub created: u64,
    /// Arenas released (explicitly or by cascade)
    pub released: u64,
    /// Arenas currently open
    pub open: usize,
    /// Buffers currently owned by open arenas
    pub handles: usize,
}

// ================================================================================================
// Table
// ================================================================================================

#[derive(Debug, Default)]
struct Node {
    parent: Option<u32>,
    children: Vec<u32>,
    handles: Vec<BufferHandle>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Arena tree bookkeeping, free of any backend access
#[derive(Debug, Default)]
pub(crate) struct ArenaTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    owners: HashMap<BufferHandle, ArenaId>,
    created: u64,
    released: u64,
}

impl ArenaTable {
    fn node(&self, id: ArenaId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: ArenaId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    pub(crate) fn is_open(&self, id: ArenaId) -> bool {
        self.node(id).is_some()
    }

    /// Open a top-level arena
    pub(crate) fn create_root(&mut self) -> ArenaId {
        self.insert(None)
    }

    /// Open a child of `parent`
    pub(crate) fn create_child(&mut self, parent: ArenaId) -> Result<ArenaId> {
        if !self.is_open(parent) {
            return Err(Error::ArenaClosed(parent));
        }
        let id = self.insert(Some(parent.index));
        if let Some(node) = self.node_mut(parent) {
            node.children.push(id.index);
        }
        Ok(id)
    }

    fn insert(&mut self, parent: Option<u32>) -> ArenaId {
        let node = Node {
            parent,
            ..Node::default()
        };
        self.created += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.generation = slot.generation.wrapping_add(1);
                slot.node = Some(node);
                ArenaId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                ArenaId { index, generation: 0 }
            }
        }
    }

    /// Record `handle` as owned by `id`
    ///
    /// Returns the effective owner: a handle already owned by an open arena
    /// keeps that owner.
    pub(crate) fn adopt(&mut self, id: ArenaId, handle: BufferHandle) -> Result<ArenaId> {
        if !self.is_open(id) {
            return Err(Error::ArenaClosed(id));
        }
        if let Some(owner) = self.owners.get(&handle).copied() {
            if self.is_open(owner) {
                return Ok(owner);
            }
        }

        self.owners.insert(handle, id);
        if let Some(node) = self.node_mut(id) {
            node.handles.push(handle);
        }
        Ok(id)
    }

    pub(crate) fn owner(&self, handle: BufferHandle) -> Option<ArenaId> {
        self.owners.get(&handle).copied().filter(|owner| self.is_open(*owner))
    }

    pub(crate) fn handle_count(&self, id: ArenaId) -> usize {
        self.node(id).map_or(0, |node| node.handles.len())
    }

    /// Close `id` and all its descendants
    ///
    /// Returns the buffers to free, each arena's own buffers ahead of its
    /// children's, and the number of arenas closed. A closed or stale id
    /// yields nothing.
    pub(crate) fn release(&mut self, id: ArenaId) -> (Vec<BufferHandle>, usize) {
        let Some(parent) = self.node(id).map(|node| node.parent) else {
            return (Vec::new(), 0);
        };
        if let Some(parent) = parent.and_then(|index| self.slots[index as usize].node.as_mut()) {
            parent.children.retain(|&child| child != id.index);
        }

        let mut handles = Vec::new();
        let mut closed = 0;
        let mut stack = vec![id.index];
        while let Some(index) = stack.pop() {
            let Some(node) = self.slots[index as usize].node.take() else {
                continue;
            };
            for handle in &node.handles {
                self.owners.remove(handle);
            }
            handles.extend(node.handles);
            stack.extend(node.children.iter().rev());
            self.free.push(index);
            closed += 1;
        }

        self.released += closed as u64;
        (handles, closed)
    }

    pub(crate) fn stats(&self) -> ArenaStats {
        let open = self.slots.iter().filter(|slot| slot.node.is_some()).count();
        ArenaStats {
            created: self.created,
            released: self.released,
            open,
            handles: self.owners.len(),
        }
    }
}

// ================================================================================================
// Store
// ================================================================================================

/// A backend paired with the arena table that owns its buffers
pub(crate) struct ArenaStore {
    backend: SharedBackend,
    table: Mutex<ArenaTable>,
}

impl ArenaStore {
    pub(crate) fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    pub(crate) fn stats(&self) -> ArenaStats {
        self.table.lock().stats()
    }

    pub(crate) fn is_open(&self, id: ArenaId) -> bool {
        self.table.lock().is_open(id)
    }

    /// Copy a buffer out while holding the table, so its owner cannot be released mid-read
    pub(crate) fn read(&self, owner: ArenaId, handle: BufferHandle, out: &mut [u8]) -> Result<()> {
        let table = self.table.lock();
        if !table.is_open(owner) {
            return Err(Error::ArenaClosed(owner));
        }
        self.backend.write().copy_from_buffer(handle, out)?;
        Ok(())
    }

    fn release(&self, id: ArenaId) {
        let start = std::time::Instant::now();
        let mut table = self.table.lock();
        let (handles, closed) = table.release(id);
        if closed == 0 {
            return;
        }

        if !handles.is_empty() {
            let mut backend = self.backend.write();
            for handle in &handles {
                if let Err(e) = backend.free_buffer(*handle) {
                    tracing::warn!(arena = %id, handle = %handle, error = %e, "failed to free arena buffer");
                }
            }
        }
        drop(table);

        tracing::debug!(
            arena = %id,
            arenas = closed,
            handles = handles.len(),
            duration_us = start.elapsed().as_micros() as u64,
            "arena_released"
        );
    }
}

// ================================================================================================
// Arena
// ================================================================================================

/// Scoped owner of native buffers
///
/// Dropping an arena (or calling [`release`](Arena::release)) frees every
/// buffer it owns and closes its descendants. Releasing an arena whose
/// ancestor already cascaded is a no-op.
///
/// # Example
///
/// ```rust
/// use infera_backends::{shared, CpuBackend};
/// use infera_core::{Arena, Error};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let root = Arena::root(shared(CpuBackend::new()?));
/// let child = root.create_child()?;
/// let tensor = child.create_tensor(vec![2], &[1.0f32, 2.0])?;
///
/// root.release();
/// assert!(!child.is_open());
/// assert!(matches!(tensor.to_vec::<f32>(), Err(Error::ArenaClosed(_))));
/// # Ok(())
/// # }
/// ```
pub struct Arena {
    id: ArenaId,
    store: Arc<ArenaStore>,
}

impl Arena {
    /// Open a top-level arena over `backend`
    pub fn root(backend: SharedBackend) -> Self {
        let mut table = ArenaTable::default();
        let id = table.create_root();
        Self {
            id,
            store: Arc::new(ArenaStore {
                backend,
                table: Mutex::new(table),
            }),
        }
    }

    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// True until this arena or one of its ancestors is released
    pub fn is_open(&self) -> bool {
        self.store.is_open(self.id)
    }

    /// Open a child whose release is bounded by this arena's
    pub fn create_child(&self) -> Result<Arena> {
        let id = self.store.table.lock().create_child(self.id)?;
        tracing::trace!(parent = %self.id, arena = %id, "arena_created");
        Ok(Arena {
            id,
            store: Arc::clone(&self.store),
        })
    }

    /// Release this arena and everything beneath it
    ///
    /// Takes `self`, so an arena value cannot be released twice.
    pub fn release(self) {
        drop(self);
    }

    /// Buffers owned directly by this arena
    pub fn handle_count(&self) -> usize {
        self.store.table.lock().handle_count(self.id)
    }

    /// Counters for the whole tree this arena belongs to
    pub fn stats(&self) -> ArenaStats {
        self.store.stats()
    }

    pub fn backend(&self) -> &SharedBackend {
        self.store.backend()
    }

    pub(crate) fn store(&self) -> Arc<ArenaStore> {
        Arc::clone(&self.store)
    }

    /// Upload host data into a new buffer owned by this arena
    ///
    /// # Errors
    ///
    /// - [`Error::ArenaClosed`] if this arena was released
    /// - [`Error::ShapeMismatch`] if `data` does not fill `shape`, including
    ///   shapes whose element count overflows
    pub fn create_tensor<T: Element>(&self, shape: impl Into<Vec<usize>>, data: &[T]) -> Result<Tensor> {
        let shape = shape.into();
        if element_count(&shape) != Some(data.len()) {
            return Err(Error::ShapeMismatch { shape, len: data.len() });
        }
        self.allocate(T::DTYPE, shape, Some(bytemuck::cast_slice(data)))
    }

    /// Allocate a zero-filled buffer owned by this arena
    ///
    /// # Errors
    ///
    /// - [`Error::ArenaClosed`] if this arena was released
    /// - [`Error::Inference`] with [`BackendError::ShapeOverflow`] if the
    ///   byte size of `shape` does not fit in `usize`, or any other
    ///   allocation failure from the backend
    pub fn zeros(&self, dtype: DType, shape: impl Into<Vec<usize>>) -> Result<Tensor> {
        self.allocate(dtype, shape.into(), None)
    }

    fn allocate(&self, dtype: DType, shape: Vec<usize>, data: Option<&[u8]>) -> Result<Tensor> {
        let mut table = self.store.table.lock();
        if !table.is_open(self.id) {
            return Err(Error::ArenaClosed(self.id));
        }

        let len = byte_len(dtype, &shape).ok_or_else(|| BackendError::ShapeOverflow(shape.clone()))?;
        let handle = {
            let mut backend = self.store.backend.write();
            let handle = backend.allocate_buffer(len)?;
            if let Some(data) = data {
                if let Err(e) = backend.copy_to_buffer(handle, data) {
                    if let Err(free) = backend.free_buffer(handle) {
                        tracing::warn!(
                            arena = %self.id,
                            handle = %handle,
                            error = %free,
                            "failed to free unfilled buffer"
                        );
                    }
                    return Err(e.into());
                }
            }
            handle
        };
        let owner = table.adopt(self.id, handle)?;
        drop(table);

        Ok(Tensor::new(
            handle,
            dtype,
            shape,
            CompletionSignal::ready(),
            owner,
            Arc::clone(&self.store),
        ))
    }

    /// Take ownership of a buffer produced by a graph launch
    ///
    /// A buffer already owned by an open arena (a graph handing back one of
    /// its inputs) keeps its owner. If this arena is closed the buffer is
    /// freed and [`Error::ArenaClosed`] returned.
    pub fn adopt(&self, output: ForwardOutput) -> Result<Tensor> {
        let owner = {
            let mut table = self.store.table.lock();
            match table.adopt(self.id, output.handle) {
                Ok(owner) => owner,
                Err(e) => {
                    if table.owner(output.handle).is_none() {
                        if let Err(free) = self.store.backend.write().free_buffer(output.handle) {
                            tracing::warn!(
                                arena = %self.id,
                                handle = %output.handle,
                                error = %free,
                                "failed to free unadopted buffer"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        };

        Ok(Tensor::new(
            output.handle,
            output.dtype,
            output.shape,
            output.signal,
            owner,
            Arc::clone(&self.store),
        ))
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use infera_backends::{shared, Backend, CachedOpHandle, CpuBackend, Device, ForwardInput, Model};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    fn root() -> Arena {
        Arena::root(shared(CpuBackend::new().unwrap()))
    }

    fn live_buffers(arena: &Arena) -> usize {
        arena.backend().read().live_buffers()
    }

    #[test]
    fn test_table_recycles_slots_with_new_generation() {
        let mut table = ArenaTable::default();
        let root = table.create_root();
        let child = table.create_child(root).unwrap();

        assert_eq!(table.release(child).1, 1);
        let reused = table.create_child(root).unwrap();
        assert_eq!(reused.index(), child.index());
        assert_ne!(reused.generation(), child.generation());
        assert!(!table.is_open(child));
        assert!(table.is_open(reused));
    }

    #[test]
    fn test_table_release_orders_own_handles_first() {
        let mut table = ArenaTable::default();
        let root = table.create_root();
        let child = table.create_child(root).unwrap();
        table.adopt(child, BufferHandle::new(2)).unwrap();
        table.adopt(root, BufferHandle::new(1)).unwrap();

        let (handles, closed) = table.release(root);
        assert_eq!(handles, vec![BufferHandle::new(1), BufferHandle::new(2)]);
        assert_eq!(closed, 2);
        assert_eq!(table.release(root), (Vec::new(), 0));
    }

    #[test]
    fn test_table_adopt_keeps_open_owner() {
        let mut table = ArenaTable::default();
        let root = table.create_root();
        let a = table.create_child(root).unwrap();
        let b = table.create_child(root).unwrap();
        let handle = BufferHandle::new(7);

        assert_eq!(table.adopt(a, handle).unwrap(), a);
        assert_eq!(table.adopt(b, handle).unwrap(), a);
        assert_eq!(table.handle_count(b), 0);
    }

    #[test]
    fn test_child_of_closed_parent_rejected() {
        let mut table = ArenaTable::default();
        let root = table.create_root();
        table.release(root);
        assert!(matches!(table.create_child(root), Err(Error::ArenaClosed(id)) if id == root));
    }

    #[test]
    fn test_release_frees_buffers() {
        let root = root();
        let child = root.create_child().unwrap();
        child.create_tensor(vec![4], &[1i32, 2, 3, 4]).unwrap();
        child.zeros(DType::F64, vec![2, 2]).unwrap();
        assert_eq!(child.handle_count(), 2);
        assert_eq!(live_buffers(&root), 2);

        child.release();
        assert_eq!(live_buffers(&root), 0);
        assert_eq!(root.stats().released, 1);
    }

    #[test]
    fn test_cascade_then_child_drop_is_noop() {
        let root = root();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();
        grandchild.create_tensor(vec![1], &[5u8]).unwrap();

        let backend = root.backend().clone();
        root.release();
        assert!(!child.is_open());
        assert!(!grandchild.is_open());
        assert_eq!(backend.read().live_buffers(), 0);

        let stats = child.stats();
        drop(grandchild);
        drop(child);
        assert_eq!(stats, ArenaStats { created: 3, released: 3, open: 0, handles: 0 });
    }

    #[test]
    fn test_allocation_after_release_fails() {
        let root = root();
        let child = root.create_child().unwrap();
        let id = child.id();
        drop(root);

        assert!(matches!(child.create_tensor(vec![1], &[1.0f32]), Err(Error::ArenaClosed(closed)) if closed == id));
        assert!(matches!(child.create_child(), Err(Error::ArenaClosed(_))));
    }

    #[test]
    fn test_create_tensor_checks_length() {
        let root = root();
        let result = root.create_tensor(vec![2, 2], &[1.0f32, 2.0, 3.0]);
        assert!(matches!(result, Err(Error::ShapeMismatch { len: 3, .. })));
        assert_eq!(live_buffers(&root), 0);
    }

    #[test]
    fn test_overflowing_shape_is_an_error() {
        let root = root();

        let result = root.create_tensor(vec![usize::MAX, 2], &[1.0f32]);
        assert!(matches!(result, Err(Error::ShapeMismatch { len: 1, .. })));

        let result = root.zeros(DType::F64, vec![usize::MAX / 4]);
        assert!(matches!(result, Err(Error::Inference(BackendError::ShapeOverflow(_)))));

        assert_eq!(live_buffers(&root), 0);
        assert_eq!(root.handle_count(), 0);
        assert!(root.zeros(DType::F64, vec![2]).is_ok());
    }

    /// Backend that refuses uploads and frees
    struct Stubborn(CpuBackend);

    impl Backend for Stubborn {
        fn device(&self) -> Device {
            self.0.device()
        }

        fn allocate_buffer(&mut self, size: usize) -> infera_backends::Result<BufferHandle> {
            self.0.allocate_buffer(size)
        }

        fn free_buffer(&mut self, _handle: BufferHandle) -> infera_backends::Result<()> {
            Err(BackendError::Other("free rejected".into()))
        }

        fn copy_to_buffer(&mut self, _handle: BufferHandle, _data: &[u8]) -> infera_backends::Result<()> {
            Err(BackendError::Other("upload rejected".into()))
        }

        fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> infera_backends::Result<()> {
            self.0.copy_from_buffer(handle, data)
        }

        fn buffer_size(&self, handle: BufferHandle) -> infera_backends::Result<usize> {
            self.0.buffer_size(handle)
        }

        fn live_buffers(&self) -> usize {
            self.0.live_buffers()
        }

        fn create_cached_op(&mut self, model: &Model) -> infera_backends::Result<CachedOpHandle> {
            self.0.create_cached_op(model)
        }

        fn forward(
            &mut self,
            op: CachedOpHandle,
            inputs: &[ForwardInput],
        ) -> infera_backends::Result<Vec<ForwardOutput>> {
            self.0.forward(op, inputs)
        }

        fn free_cached_op(&mut self, op: CachedOpHandle) -> infera_backends::Result<()> {
            self.0.free_cached_op(op)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_failed_cleanup_free_is_logged() {
        let root = Arena::root(shared(Stubborn(CpuBackend::new().unwrap())));
        let child = root.create_child().unwrap();
        let closed = child.create_child().unwrap();
        child.release();
        let orphan = root.backend().write().allocate_buffer(8).unwrap();

        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));
        tracing::subscriber::with_default(subscriber, || {
            let upload = root.create_tensor(vec![2], &[1.0f32, 2.0]);
            assert!(matches!(upload, Err(Error::Inference(BackendError::Other(_)))));

            let adopted = closed.adopt(ForwardOutput {
                name: "y".into(),
                handle: orphan,
                dtype: DType::F32,
                shape: vec![2],
                signal: CompletionSignal::ready(),
            });
            assert!(matches!(adopted, Err(Error::ArenaClosed(_))));
        });

        assert_eq!(warnings.load(Ordering::SeqCst), 2);
        assert_eq!(root.handle_count(), 0);
    }
}
