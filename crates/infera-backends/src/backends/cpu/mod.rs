//! CPU backend implementation
//!
//! Reference implementation of the Backend trait for host execution. Graph
//! launches are asynchronous: work is queued on a single-threaded rayon pool
//! that plays the role of a device stream, so launches run in submission
//! order and `forward` returns before the graph has executed.
//!
//! # Architecture
//!
//! ```text
//! CpuBackend
//! ├── MemoryManager  - Heap buffers keyed by handle id
//! ├── cached_ops     - Bound models keyed by op handle id
//! └── stream         - 1-thread rayon pool executing launches in order
//! ```
//!
//! # Usage
//!
//! ```rust
//! use infera_backends::{Backend, CpuBackend};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut backend = CpuBackend::new()?;
//!
//! let buffer = backend.allocate_buffer(1024)?;
//! assert_eq!(backend.live_buffers(), 1);
//!
//! backend.free_buffer(buffer)?;
//! assert_eq!(backend.live_buffers(), 0);
//! # Ok(())
//! # }
//! ```

pub(crate) mod memory;

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use memory::MemoryManager;
use parking_lot::RwLock;

use crate::backend::{Backend, BufferHandle, CachedOpHandle, Device, ForwardInput, ForwardOutput, TensorSpec};
use crate::error::{BackendError, Result};
use crate::host::HostTensor;
use crate::model::Model;
use crate::signal::{CompletionNotifier, CompletionSignal};

/// CPU backend executing cached graphs on a host stream thread
pub struct CpuBackend {
    /// Memory manager (shared with the stream thread)
    memory: Arc<RwLock<MemoryManager>>,

    /// Bound models keyed by cached op id
    cached_ops: HashMap<u64, Arc<Model>>,

    /// Next cached op handle ID
    next_op_id: u64,

    /// In-order execution stream
    stream: Arc<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Create a new CPU backend with its own execution stream
    ///
    /// # Errors
    ///
    /// Returns an error if the stream thread cannot be spawned.
    #[tracing::instrument]
    pub fn new() -> Result<Self> {
        let stream = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|index| format!("infera-cpu-stream-{index}"))
            .build()
            .map_err(|e| BackendError::Other(format!("failed to start CPU stream: {e}")))?;

        Ok(Self {
            memory: Arc::new(RwLock::new(MemoryManager::new())),
            cached_ops: HashMap::new(),
            next_op_id: 1,
            stream: Arc::new(stream),
        })
    }

    /// Number of cached ops currently alive
    pub fn cached_op_count(&self) -> usize {
        self.cached_ops.len()
    }

    /// (allocated, freed) buffer totals since creation
    pub fn buffer_totals(&self) -> (u64, u64) {
        self.memory.read().totals()
    }

    /// Block until every launch submitted so far has finished
    pub fn wait_all(&self) {
        let (signal, notifier) = CompletionSignal::pending();
        self.stream.spawn(move || notifier.complete());
        // A no-op launch cannot fail; the only error is an abandoned notifier.
        if let Err(e) = signal.await_readable() {
            tracing::warn!(error = %e, "stream barrier failed");
        }
    }

    fn release_outputs(&self, outputs: &[ForwardOutput]) {
        let mut memory = self.memory.write();
        for output in outputs {
            if let Err(e) = memory.free_buffer(output.handle) {
                tracing::warn!(handle = %output.handle, error = %e, "failed to free output after launch error");
            }
        }
    }
}

impl Backend for CpuBackend {
    fn device(&self) -> Device {
        Device::cpu()
    }

    fn allocate_buffer(&mut self, size: usize) -> Result<BufferHandle> {
        self.memory.write().allocate_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> Result<()> {
        self.memory.write().free_buffer(handle)
    }

    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> Result<()> {
        self.memory.write().copy_to_buffer(handle, data)
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> Result<()> {
        self.memory.read().copy_from_buffer(handle, data)
    }

    fn buffer_size(&self, handle: BufferHandle) -> Result<usize> {
        self.memory.read().buffer_size(handle)
    }

    fn live_buffers(&self) -> usize {
        self.memory.read().live_buffers()
    }

    #[tracing::instrument(skip(self, model), fields(model = model.name()))]
    fn create_cached_op(&mut self, model: &Model) -> Result<CachedOpHandle> {
        let id = self.next_op_id;
        self.next_op_id += 1;
        self.cached_ops.insert(id, Arc::new(model.clone()));

        tracing::debug!(
            op = id,
            inputs = model.inputs().len(),
            outputs = model.outputs().len(),
            "cached_op_created"
        );

        Ok(CachedOpHandle::new(id))
    }

    #[tracing::instrument(skip(self, op, inputs), fields(op = %op, inputs = inputs.len()))]
    fn forward(&mut self, op: CachedOpHandle, inputs: &[ForwardInput]) -> Result<Vec<ForwardOutput>> {
        let start = std::time::Instant::now();

        let model = self
            .cached_ops
            .get(&op.id())
            .cloned()
            .ok_or(BackendError::InvalidCachedOp(op.id()))?;

        let bound = bind_inputs(&model, inputs)?;
        {
            let memory = self.memory.read();
            for input in &bound {
                let needed = TensorSpec::new(input.name.as_str(), input.dtype, input.shape.clone()).byte_len()?;
                let size = memory.buffer_size(input.handle)?;
                if size < needed {
                    return Err(BackendError::BufferOutOfBounds {
                        offset: 0,
                        size: needed,
                        buffer_size: size,
                    });
                }
            }
        }

        let (signal, notifier) = CompletionSignal::pending();
        let mut outputs = Vec::with_capacity(model.outputs().len());
        for spec in model.outputs() {
            let allocated = spec.byte_len().and_then(|len| self.memory.write().allocate_buffer(len));
            match allocated {
                Ok(handle) => outputs.push(ForwardOutput {
                    name: spec.name.clone(),
                    handle,
                    dtype: spec.dtype,
                    shape: spec.shape.clone(),
                    signal: signal.clone(),
                }),
                Err(e) => {
                    self.release_outputs(&outputs);
                    notifier.fail(e.to_string());
                    return Err(e);
                }
            }
        }

        let targets: Vec<BufferHandle> = outputs.iter().map(|output| output.handle).collect();
        let memory = Arc::clone(&self.memory);
        self.stream.spawn(move || launch(&model, &bound, &targets, &memory, notifier));

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            outputs = outputs.len(),
            "forward_launched"
        );

        Ok(outputs)
    }

    fn free_cached_op(&mut self, op: CachedOpHandle) -> Result<()> {
        if self.cached_ops.remove(&op.id()).is_none() {
            return Err(BackendError::InvalidCachedOp(op.id()));
        }
        tracing::debug!(op = op.id(), "cached_op_freed");
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Match supplied inputs to the model's declared inputs, in declaration order
fn bind_inputs(model: &Model, inputs: &[ForwardInput]) -> Result<Vec<ForwardInput>> {
    for (index, input) in inputs.iter().enumerate() {
        if model.input(&input.name).is_none() {
            return Err(BackendError::UnknownInput(input.name.clone()));
        }
        if inputs[..index].iter().any(|earlier| earlier.name == input.name) {
            return Err(BackendError::execution_error(format!(
                "input '{}' bound more than once",
                input.name
            )));
        }
    }

    model
        .inputs()
        .iter()
        .map(|spec| {
            let input = inputs
                .iter()
                .find(|input| input.name == spec.name)
                .ok_or_else(|| BackendError::MissingInput(spec.name.clone()))?;
            if input.dtype != spec.dtype {
                return Err(BackendError::type_mismatch(spec.dtype, input.dtype));
            }
            if input.shape != spec.shape {
                return Err(BackendError::ShapeMismatch {
                    name: spec.name.clone(),
                    expected: spec.shape.clone(),
                    actual: input.shape.clone(),
                });
            }
            Ok(input.clone())
        })
        .collect()
}

/// Stream-side body of one launch
fn launch(
    model: &Model,
    inputs: &[ForwardInput],
    targets: &[BufferHandle],
    memory: &RwLock<MemoryManager>,
    notifier: CompletionNotifier,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| execute(model, inputs, targets, memory)));
    match outcome {
        Ok(Ok(())) => notifier.complete(),
        Ok(Err(e)) => {
            tracing::debug!(model = model.name(), error = %e, "graph_failed");
            notifier.fail(e.to_string());
        }
        Err(_) => {
            tracing::error!(model = model.name(), "graph panicked");
            notifier.fail(format!("graph '{}' panicked", model.name()));
        }
    }
}

fn execute(model: &Model, inputs: &[ForwardInput], targets: &[BufferHandle], memory: &RwLock<MemoryManager>) -> Result<()> {
    for input in inputs {
        input.signal.await_readable()?;
    }

    let mut host_inputs = Vec::with_capacity(inputs.len());
    {
        let memory = memory.read();
        for input in inputs {
            let len = TensorSpec::new(input.name.as_str(), input.dtype, input.shape.clone()).byte_len()?;
            let mut bytes = vec![0u8; len];
            memory.copy_from_buffer(input.handle, &mut bytes)?;
            host_inputs.push(HostTensor::from_bytes(input.dtype, input.shape.clone(), bytes)?);
        }
    }

    let results = (model.graph())(&host_inputs)?;
    if results.len() != model.outputs().len() {
        return Err(BackendError::execution_error(format!(
            "graph '{}' produced {} outputs, {} declared",
            model.name(),
            results.len(),
            model.outputs().len()
        )));
    }

    let mut memory = memory.write();
    for ((spec, handle), result) in model.outputs().iter().zip(targets).zip(&results) {
        if result.dtype() != spec.dtype {
            return Err(BackendError::type_mismatch(spec.dtype, result.dtype()));
        }
        if result.shape() != spec.shape.as_slice() {
            return Err(BackendError::ShapeMismatch {
                name: spec.name.clone(),
                expected: spec.shape.clone(),
                actual: result.shape().to_vec(),
            });
        }
        memory.copy_to_buffer(*handle, result.as_bytes())?;
    }

    Ok(())
}
