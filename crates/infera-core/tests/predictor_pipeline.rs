//! End-to-end tests for the predictor over the CPU backend
//!
//! The model is an identity graph with a simulated device delay; the
//! translator wraps an integer in a one-element tensor and adds one on the
//! way out.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use infera_backends::{
    shared, Backend, BackendError, BufferHandle, CachedOpHandle, CompletionSignal, CpuBackend, DType, Device,
    ForwardInput, ForwardOutput, Model, SharedBackend,
};
use infera_core::{
    Error, Metrics, Phase, Predictor, PredictorConfig, StageContext, TensorList, TranslateResult, Translator,
};

const DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
enum StageFailure {
    #[error("input rejected")]
    Input,
    #[error("output rejected")]
    Output,
}

#[derive(Default)]
struct Increment {
    fail_input: AtomicBool,
    fail_output: AtomicBool,
    misname_input: AtomicBool,
    outputs_ready: AtomicBool,
}

impl Translator for Increment {
    type Input = i64;
    type Output = i64;

    fn process_input(&self, ctx: &StageContext<'_>, input: i64) -> TranslateResult<TensorList> {
        if self.fail_input.load(Ordering::SeqCst) {
            return Err(StageFailure::Input.into());
        }
        let name = if self.misname_input.load(Ordering::SeqCst) { "bogus" } else { "value" };
        let tensor = ctx.arena().create_tensor(vec![1], &[input])?;
        Ok(TensorList::new().with(name, tensor))
    }

    fn process_output(&self, _ctx: &StageContext<'_>, outputs: TensorList) -> TranslateResult<i64> {
        self.outputs_ready
            .store(outputs.iter().all(|(_, tensor)| tensor.is_ready()), Ordering::SeqCst);
        if self.fail_output.load(Ordering::SeqCst) {
            return Err(StageFailure::Output.into());
        }
        let value = outputs.require("value")?.to_vec::<i64>()?;
        Ok(value[0] + 1)
    }
}

struct Harness {
    predictor: Predictor<Increment>,
    backend: SharedBackend,
    launches: Arc<AtomicUsize>,
}

impl Harness {
    fn new(delay: Duration) -> Self {
        infera_tracing::init_test_tracing();

        let launches = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&launches);
        let model = Model::builder("delayed_identity")
            .input("value", DType::I64, vec![1])
            .output("value", DType::I64, vec![1])
            .graph(move |inputs| {
                counter.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(delay);
                if inputs[0].to_vec::<i64>()?[0] < 0 {
                    return Err(BackendError::execution_error("negative input"));
                }
                Ok(inputs.to_vec())
            })
            .build()
            .unwrap();

        let backend = shared(CpuBackend::new().unwrap());
        let predictor = Predictor::new(
            backend.clone(),
            Arc::new(model),
            Increment::default(),
            PredictorConfig::default(),
        )
        .unwrap();

        Self {
            predictor,
            backend,
            launches,
        }
    }

    fn live_buffers(&self) -> usize {
        self.backend.read().live_buffers()
    }

    fn translator(&self) -> &Increment {
        self.predictor.translator()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.predictor.close();
    }
}

#[test]
fn test_predict_scenario() -> infera_core::Result<()> {
    let mut harness = Harness::new(DELAY);
    let metrics = Arc::new(Metrics::new());
    harness.predictor.set_metrics(metrics.clone());

    assert_eq!(harness.predictor.predict(41)?, 42);

    assert_eq!(metrics.names(), vec!["Preprocess", "Inference", "Postprocess"]);
    let inference = metrics.metric("Inference")[0];
    assert!(inference >= DELAY.as_nanos() as u64);
    assert!(metrics.metric("Preprocess")[0] < DELAY.as_nanos() as u64);
    assert!(harness.translator().outputs_ready.load(Ordering::SeqCst));
    assert_eq!(harness.launches.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_predict_without_sink_records_nothing() -> infera_core::Result<()> {
    let mut harness = Harness::new(Duration::ZERO);
    let metrics = Arc::new(Metrics::new());
    harness.predictor.set_metrics(metrics.clone());
    harness.predictor.clear_metrics();

    assert_eq!(harness.predictor.predict(1)?, 2);
    assert!(metrics.is_empty());
    Ok(())
}

#[test]
fn test_input_failure_skips_forward() -> infera_core::Result<()> {
    let mut harness = Harness::new(Duration::ZERO);
    let metrics = Arc::new(Metrics::new());
    harness.predictor.set_metrics(metrics.clone());

    harness.translator().fail_input.store(true, Ordering::SeqCst);
    let err = harness.predictor.predict(41).unwrap_err();
    match &err {
        Error::Conversion {
            phase: Phase::Input,
            source,
        } => assert!(matches!(source.downcast_ref::<StageFailure>(), Some(StageFailure::Input))),
        other => panic!("expected input conversion error, got {other:?}"),
    }
    assert!(metrics.is_empty());
    assert_eq!(harness.launches.load(Ordering::SeqCst), 0);

    harness.translator().fail_input.store(false, Ordering::SeqCst);
    assert_eq!(harness.predictor.predict(41)?, 42);
    assert_eq!(metrics.names(), vec!["Preprocess", "Inference", "Postprocess"]);
    Ok(())
}

#[test]
fn test_output_failure_keeps_earlier_metrics() -> infera_core::Result<()> {
    let mut harness = Harness::new(Duration::ZERO);
    let metrics = Arc::new(Metrics::new());
    harness.predictor.set_metrics(metrics.clone());

    harness.translator().fail_output.store(true, Ordering::SeqCst);
    let err = harness.predictor.predict(5).unwrap_err();
    assert!(matches!(err, Error::Conversion { phase: Phase::Output, .. }));
    assert_eq!(metrics.names(), vec!["Preprocess", "Inference"]);
    assert_eq!(harness.live_buffers(), 0);
    Ok(())
}

#[test]
fn test_device_failure_surfaces_at_completion() -> infera_core::Result<()> {
    let mut harness = Harness::new(Duration::from_millis(5));
    let metrics = Arc::new(Metrics::new());
    harness.predictor.set_metrics(metrics.clone());

    let err = harness.predictor.predict(-1).unwrap_err();
    match err {
        Error::Inference(BackendError::DeviceFailure(reason)) => assert!(reason.contains("negative input")),
        other => panic!("expected device failure, got {other:?}"),
    }
    assert_eq!(metrics.names(), vec!["Preprocess"]);
    assert_eq!(harness.live_buffers(), 0);

    assert_eq!(harness.predictor.predict(9)?, 10);
    Ok(())
}

#[test]
fn test_launch_failure_is_inference_error() {
    let mut harness = Harness::new(Duration::ZERO);
    harness.translator().misname_input.store(true, Ordering::SeqCst);

    let err = harness.predictor.predict(3).unwrap_err();
    assert!(matches!(err, Error::Inference(BackendError::UnknownInput(name)) if name == "bogus"));
    assert_eq!(harness.launches.load(Ordering::SeqCst), 0);
    assert_eq!(harness.live_buffers(), 0);
}

#[test]
fn test_every_call_arena_released_exactly_once() -> infera_core::Result<()> {
    let mut harness = Harness::new(Duration::ZERO);

    // (fail_input, fail_output, value, per-call arenas created)
    let calls = [
        (false, false, 1, 3),
        (true, false, 1, 1),
        (false, true, 1, 3),
        (false, false, -1, 2),
        (false, false, 7, 3),
    ];
    let mut expected_created = 1;
    for (fail_input, fail_output, value, arenas) in calls {
        harness.translator().fail_input.store(fail_input, Ordering::SeqCst);
        harness.translator().fail_output.store(fail_output, Ordering::SeqCst);
        let _ = harness.predictor.predict(value);
        expected_created += arenas;

        let stats = harness.predictor.arena_stats();
        assert_eq!(stats.created, expected_created);
        assert_eq!(stats.released, expected_created - 1);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.handles, 0);
        assert_eq!(harness.live_buffers(), 0);
    }

    harness.predictor.close();
    let stats = harness.predictor.arena_stats();
    assert_eq!(stats.released, stats.created);

    let backend = harness.backend.read();
    let cpu = backend.as_any().downcast_ref::<CpuBackend>().unwrap();
    let (allocated, freed) = cpu.buffer_totals();
    assert_eq!(allocated, freed);
    Ok(())
}

#[test]
fn test_close_is_idempotent() {
    let mut harness = Harness::new(Duration::ZERO);
    harness.predictor.predict(1).unwrap();

    harness.predictor.close();
    harness.predictor.close();
    assert!(harness.predictor.is_closed());

    let backend = harness.backend.read();
    let cpu = backend.as_any().downcast_ref::<CpuBackend>().unwrap();
    assert_eq!(cpu.cached_op_count(), 0);
    assert_eq!(cpu.live_buffers(), 0);
}

#[test]
fn test_predict_after_close_fails() {
    let mut harness = Harness::new(Duration::ZERO);
    harness.predictor.close();
    assert!(matches!(harness.predictor.predict(1), Err(Error::ArenaClosed(_))));
}

#[test]
fn test_close_after_failed_predict() {
    let mut harness = Harness::new(Duration::ZERO);
    harness.translator().fail_output.store(true, Ordering::SeqCst);
    assert!(harness.predictor.predict(1).is_err());

    harness.predictor.close();
    assert_eq!(harness.live_buffers(), 0);
}

#[test]
fn test_batch_predict_stops_at_first_error() -> infera_core::Result<()> {
    let mut harness = Harness::new(Duration::ZERO);
    assert_eq!(harness.predictor.batch_predict([1, 2, 3])?, vec![2, 3, 4]);

    let result = harness.predictor.batch_predict([4, -1, 6]);
    assert!(matches!(result, Err(Error::Inference(_))));
    assert_eq!(harness.launches.load(Ordering::SeqCst), 5);
    Ok(())
}

#[test]
fn test_device_mismatch_rejected() {
    let model = Model::builder("identity")
        .input("value", DType::I64, vec![1])
        .output("value", DType::I64, vec![1])
        .graph(|inputs| Ok(inputs.to_vec()))
        .build()
        .unwrap();
    let backend = shared(CpuBackend::new().unwrap());

    let result = Predictor::new(
        backend.clone(),
        Arc::new(model),
        Increment::default(),
        PredictorConfig::new(Device::gpu(0)),
    );
    assert!(matches!(
        result,
        Err(Error::EngineConstruction(BackendError::DeviceMismatch { .. }))
    ));
    assert_eq!(backend.read().live_buffers(), 0);
}

#[test]
fn test_engines_share_a_backend_across_threads() {
    let backend = shared(CpuBackend::new().unwrap());
    let model = Arc::new(
        Model::builder("identity")
            .input("value", DType::I64, vec![1])
            .output("value", DType::I64, vec![1])
            .graph(|inputs| Ok(inputs.to_vec()))
            .build()
            .unwrap(),
    );

    let workers: Vec<_> = (0..4i64)
        .map(|worker| {
            let backend = backend.clone();
            let model = Arc::clone(&model);
            std::thread::spawn(move || {
                let mut predictor =
                    Predictor::new(backend, model, Increment::default(), PredictorConfig::default()).unwrap();
                let results: Vec<i64> = (0..10).map(|i| predictor.predict(worker * 100 + i).unwrap()).collect();
                predictor.close();
                results
            })
        })
        .collect();

    for (worker, handle) in workers.into_iter().enumerate() {
        let expected: Vec<i64> = (0..10).map(|i| worker as i64 * 100 + i + 1).collect();
        assert_eq!(handle.join().unwrap(), expected);
    }
    assert_eq!(backend.read().live_buffers(), 0);
}

/// Backend whose forward hands its input buffers straight back, completing
/// `delay` after launch on a separate thread
struct ReturnInputs {
    inner: CpuBackend,
    delay: Duration,
}

impl Backend for ReturnInputs {
    fn device(&self) -> Device {
        self.inner.device()
    }

    fn allocate_buffer(&mut self, size: usize) -> infera_backends::Result<BufferHandle> {
        self.inner.allocate_buffer(size)
    }

    fn free_buffer(&mut self, handle: BufferHandle) -> infera_backends::Result<()> {
        self.inner.free_buffer(handle)
    }

    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> infera_backends::Result<()> {
        self.inner.copy_to_buffer(handle, data)
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, data: &mut [u8]) -> infera_backends::Result<()> {
        self.inner.copy_from_buffer(handle, data)
    }

    fn buffer_size(&self, handle: BufferHandle) -> infera_backends::Result<usize> {
        self.inner.buffer_size(handle)
    }

    fn live_buffers(&self) -> usize {
        self.inner.live_buffers()
    }

    fn create_cached_op(&mut self, model: &Model) -> infera_backends::Result<CachedOpHandle> {
        self.inner.create_cached_op(model)
    }

    fn forward(
        &mut self,
        _op: CachedOpHandle,
        inputs: &[ForwardInput],
    ) -> infera_backends::Result<Vec<ForwardOutput>> {
        let (signal, notifier) = CompletionSignal::pending();
        let waits: Vec<CompletionSignal> = inputs.iter().map(|input| input.signal.clone()).collect();
        let delay = self.delay;
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            match waits.iter().try_for_each(|signal| signal.await_readable()) {
                Ok(()) => notifier.complete(),
                Err(e) => notifier.fail(e.to_string()),
            }
        });

        Ok(inputs
            .iter()
            .map(|input| ForwardOutput {
                name: input.name.clone(),
                handle: input.handle,
                dtype: input.dtype,
                shape: input.shape.clone(),
                signal: signal.clone(),
            })
            .collect())
    }

    fn free_cached_op(&mut self, op: CachedOpHandle) -> infera_backends::Result<()> {
        self.inner.free_cached_op(op)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn test_returned_input_buffers_keep_their_owner() -> infera_core::Result<()> {
    infera_tracing::init_test_tracing();

    let model = Model::builder("return_inputs")
        .input("value", DType::I64, vec![1])
        .output("value", DType::I64, vec![1])
        .graph(|inputs| Ok(inputs.to_vec()))
        .build()
        .unwrap();
    let backend = shared(ReturnInputs {
        inner: CpuBackend::new().unwrap(),
        delay: DELAY,
    });
    let mut predictor = Predictor::new(
        backend.clone(),
        Arc::new(model),
        Increment::default(),
        PredictorConfig::default(),
    )?;
    let metrics = Arc::new(Metrics::new());
    predictor.set_metrics(metrics.clone());

    for _ in 0..3 {
        assert_eq!(predictor.predict(41)?, 42);
        assert!(predictor.translator().outputs_ready.load(Ordering::SeqCst));
        assert_eq!(backend.read().live_buffers(), 0);
    }
    let inference = metrics.metric("Inference");
    assert_eq!(inference.len(), 3);
    assert!(inference.iter().all(|&nanos| nanos >= DELAY.as_nanos() as u64));

    let stats = predictor.arena_stats();
    assert_eq!(stats.open, 1);
    assert_eq!(stats.handles, 0);

    predictor.close();
    let stats = predictor.arena_stats();
    assert_eq!(stats.created, 10);
    assert_eq!(stats.released, 10);
    assert_eq!(stats.open, 0);

    let backend = backend.read();
    let double = backend.as_any().downcast_ref::<ReturnInputs>().unwrap();
    assert_eq!(double.inner.buffer_totals(), (3, 3));
    assert_eq!(double.inner.cached_op_count(), 0);
    Ok(())
}
