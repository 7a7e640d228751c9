//! Per-stage context handed to translators

use infera_backends::{Device, Model};

use crate::arena::Arena;
use crate::metrics::MetricsSink;

/// What a translator stage may use during one call
///
/// The arena is a fresh child of the engine's top-level arena, opened for
/// this stage of this call. Tensors allocated through it stay valid until the
/// call returns.
pub struct StageContext<'a> {
    model: &'a Model,
    device: Device,
    arena: &'a Arena,
    metrics: Option<&'a dyn MetricsSink>,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(
        model: &'a Model,
        device: Device,
        arena: &'a Arena,
        metrics: Option<&'a dyn MetricsSink>,
    ) -> Self {
        Self {
            model,
            device,
            arena,
            metrics,
        }
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Arena scoped to this stage of this call
    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    /// Sink currently attached to the engine, if any
    pub fn metrics(&self) -> Option<&'a dyn MetricsSink> {
        self.metrics
    }
}
