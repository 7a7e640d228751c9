//! Cached graph handle bound to a backend
//!
//! A [`CachedOp`] is created once per engine and destroyed once, on
//! [`close`](CachedOp::close) or drop, whichever comes first.

use std::sync::Arc;

use infera_backends::{CachedOpHandle, ForwardInput, Model, SharedBackend};

use crate::arena::Arena;
use crate::error::{Error, Result};
use crate::list::TensorList;

pub(crate) struct CachedOp {
    handle: CachedOpHandle,
    model: Arc<Model>,
    backend: SharedBackend,
    closed: bool,
}

impl CachedOp {
    /// Build the cached op for `model` on the backend behind `arena`
    ///
    /// Failure is an engine construction error.
    pub(crate) fn create(arena: &Arena, model: Arc<Model>) -> Result<Self> {
        let backend = Arc::clone(arena.backend());
        let handle = backend
            .write()
            .create_cached_op(&model)
            .map_err(Error::EngineConstruction)?;

        Ok(Self {
            handle,
            model,
            backend,
            closed: false,
        })
    }

    pub(crate) fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Launch the graph on `inputs`; outputs are adopted into `outputs`
    ///
    /// Returns once the work is launched. The returned tensors carry the
    /// launch's completion signal and are listed in declared output order.
    pub(crate) fn forward(&self, inputs: &TensorList, outputs: &Arena) -> Result<TensorList> {
        let start = std::time::Instant::now();
        let bound: Vec<ForwardInput> = inputs.iter().map(|(name, tensor)| tensor.bind(name)).collect();

        let launched = self.backend.write().forward(self.handle, &bound)?;

        // Adopt every output even after a failure so none is left unowned.
        let mut list = TensorList::with_capacity(launched.len());
        let mut failure = None;
        for output in launched {
            let name = output.name.clone();
            match outputs.adopt(output) {
                Ok(tensor) => list.push(name, tensor),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        tracing::debug!(
            model = self.model.name(),
            op = %self.handle,
            inputs = bound.len(),
            outputs = list.len(),
            duration_us = start.elapsed().as_micros() as u64,
            "forward_launched"
        );
        Ok(list)
    }

    /// Destroy the native op; later calls are no-ops
    pub(crate) fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.backend.write().free_cached_op(self.handle) {
            tracing::warn!(op = %self.handle, error = %e, "failed to free cached op");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for CachedOp {
    fn drop(&mut self) {
        self.close();
    }
}
