//! Predictor: runs one inference call through translator, graph and back
//!
//! # Call Flow
//!
//! ```text
//! predict(input)
//!   │  t0
//!   ├─▶ arena A ── translator.process_input ──▶ TensorList
//!   │  t1                                        Preprocess = t1 - t0
//!   ├─▶ arena F ── cached_op.forward ──▶ outputs (pending)
//!   │             await every output
//!   │  t2                                        Inference = t2 - t1
//!   ├─▶ arena B ── translator.process_output ──▶ Output
//!   │  t3                                        Postprocess = t3 - t2
//!   └─▶ release B, F, A
//! ```
//!
//! All three per-call arenas are children of the top-level arena. They are
//! released when `predict` returns, on every path, and only after every
//! launched output has completed, so no buffer is freed under running device
//! work. The top-level arena and the cached op live until [`Predictor::close`].

use std::sync::Arc;
use std::time::Instant;

use infera_backends::{BackendError, Device, Model, SharedBackend};

use crate::arena::{Arena, ArenaId, ArenaStats, ArenaStore};
use crate::cached_op::CachedOp;
use crate::config::PredictorConfig;
use crate::context::StageContext;
use crate::error::{Error, Phase, Result};
use crate::metrics::{MetricUnit, MetricsSink, INFERENCE, POSTPROCESS, PREPROCESS};
use crate::translator::Translator;

/// Inference engine for one model and one translator
///
/// At most one call is in flight per predictor (`predict` takes `&mut self`).
/// Separate predictors may run on separate threads over the same shared
/// backend.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use infera_backends::{shared, CpuBackend, DType, Model};
/// use infera_core::{Predictor, PredictorConfig, StageContext, TensorList, TranslateResult, Translator};
///
/// struct Scalar;
///
/// impl Translator for Scalar {
///     type Input = f32;
///     type Output = f32;
///
///     fn process_input(&self, ctx: &StageContext<'_>, input: f32) -> TranslateResult<TensorList> {
///         Ok(TensorList::new().with("x", ctx.arena().create_tensor(vec![1], &[input])?))
///     }
///
///     fn process_output(&self, _ctx: &StageContext<'_>, outputs: TensorList) -> TranslateResult<f32> {
///         Ok(outputs.require("x")?.to_vec::<f32>()?[0])
///     }
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let model = Model::builder("identity")
///     .input("x", DType::F32, vec![1])
///     .output("x", DType::F32, vec![1])
///     .graph(|inputs| Ok(inputs.to_vec()))
///     .build()?;
///
/// let backend = shared(CpuBackend::new()?);
/// let mut predictor = Predictor::new(backend, Arc::new(model), Scalar, PredictorConfig::default())?;
/// assert_eq!(predictor.predict(2.5)?, 2.5);
/// predictor.close();
/// # Ok(())
/// # }
/// ```
pub struct Predictor<T: Translator> {
    translator: T,
    device: Device,
    config: PredictorConfig,
    metrics: Option<Arc<dyn MetricsSink>>,
    cached_op: CachedOp,
    root: Option<Arena>,
    root_id: ArenaId,
    // Outlives `root` so counters stay readable after close.
    arenas: Arc<ArenaStore>,
}

impl<T: Translator> Predictor<T> {
    /// Build a predictor: open the top-level arena and bind the cached op
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineConstruction`] if the backend serves a
    /// different device than `config.device` or rejects the model.
    #[tracing::instrument(skip_all, fields(model = model.name(), device = %config.device))]
    pub fn new(backend: SharedBackend, model: Arc<Model>, translator: T, config: PredictorConfig) -> Result<Self> {
        let start = Instant::now();

        let device = backend.read().device();
        if device != config.device {
            return Err(Error::EngineConstruction(BackendError::DeviceMismatch {
                backend: device.to_string(),
                requested: config.device.to_string(),
            }));
        }

        let root = Arena::root(backend);
        let cached_op = CachedOp::create(&root, model)?;

        tracing::debug!(
            arena = %root.id(),
            duration_us = start.elapsed().as_micros() as u64,
            "predictor_created"
        );

        Ok(Self {
            translator,
            device,
            config,
            metrics: None,
            cached_op,
            root_id: root.id(),
            arenas: root.store(),
            root: Some(root),
        })
    }

    pub fn model(&self) -> &Model {
        self.cached_op.model()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn translator(&self) -> &T {
        &self.translator
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Attach a sink; later calls report phase durations to it
    pub fn set_metrics(&mut self, metrics: Arc<dyn MetricsSink>) {
        self.metrics = Some(metrics);
    }

    /// Detach the sink; later calls record nothing
    pub fn clear_metrics(&mut self) {
        self.metrics = None;
    }

    pub fn is_closed(&self) -> bool {
        self.root.is_none()
    }

    /// Counters of the arena tree rooted at this predictor
    pub fn arena_stats(&self) -> ArenaStats {
        self.arenas.stats()
    }

    /// Run one inference call
    ///
    /// # Errors
    ///
    /// - [`Error::Conversion`] if a translator stage fails
    /// - [`Error::Inference`] if the launch or the device work fails
    /// - [`Error::ArenaClosed`] if the predictor was closed
    ///
    /// Any error ends this call only; the predictor stays usable.
    #[tracing::instrument(skip_all, fields(model = self.cached_op.model().name()))]
    pub fn predict(&mut self, input: T::Input) -> Result<T::Output> {
        let result = self.run(input);
        if let Err(e) = &result {
            tracing::debug!(error = %e, per_call = e.is_per_call(), "predict_failed");
        }
        result
    }

    fn run(&mut self, input: T::Input) -> Result<T::Output> {
        let root = self.root.as_ref().ok_or(Error::ArenaClosed(self.root_id))?;
        let model = self.cached_op.model();
        let metrics = self.metrics.as_deref();
        let mut clock = PhaseClock::start(metrics);

        // Arenas drop in reverse order on every exit: output, forward, input.
        let input_arena = root.create_child()?;
        let inputs = {
            let ctx = StageContext::new(model, self.device, &input_arena, metrics);
            self.translator
                .process_input(&ctx, input)
                .map_err(|source| Error::conversion(Phase::Input, source))?
        };
        clock.lap(PREPROCESS);

        let forward_arena = root.create_child()?;
        let outputs = self.cached_op.forward(&inputs, &forward_arena)?;
        outputs.await_all()?;
        clock.lap(INFERENCE);

        let output_arena = root.create_child()?;
        let output = {
            let ctx = StageContext::new(model, self.device, &output_arena, metrics);
            self.translator
                .process_output(&ctx, outputs)
                .map_err(|source| Error::conversion(Phase::Output, source))?
        };
        clock.lap(POSTPROCESS);

        tracing::debug!(
            duration_us = clock.total().as_micros() as u64,
            "predict_completed"
        );
        Ok(output)
    }

    /// Run `predict` over each input in order, stopping at the first error
    pub fn batch_predict<I>(&mut self, inputs: I) -> Result<Vec<T::Output>>
    where
        I: IntoIterator<Item = T::Input>,
    {
        inputs.into_iter().map(|input| self.predict(input)).collect()
    }

    /// Release the cached op and the top-level arena
    ///
    /// Idempotent; safe after a failed call.
    pub fn close(&mut self) {
        let Some(root) = self.root.take() else {
            return;
        };
        self.cached_op.close();
        root.release();
        tracing::debug!(arena = %self.root_id, "predictor_closed");
    }
}

impl<T: Translator> Drop for Predictor<T> {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }
        if self.config.leak_warning {
            tracing::warn!(
                model = self.cached_op.model().name(),
                "predictor dropped without close(); releasing its resources"
            );
        }
        self.close();
    }
}

// ================================================================================================
// Helpers
// ================================================================================================

/// Local sequence of phase instants for one call
struct PhaseClock<'a> {
    started: Instant,
    last: Instant,
    sink: Option<&'a dyn MetricsSink>,
}

impl<'a> PhaseClock<'a> {
    fn start(sink: Option<&'a dyn MetricsSink>) -> Self {
        let now = Instant::now();
        Self {
            started: now,
            last: now,
            sink,
        }
    }

    /// Close the current phase and report its duration
    fn lap(&mut self, name: &str) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        if let Some(sink) = self.sink {
            let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
            sink.add_metric(name, nanos, MetricUnit::Nanoseconds);
        }
    }

    fn total(&self) -> std::time::Duration {
        self.last.duration_since(self.started)
    }
}
