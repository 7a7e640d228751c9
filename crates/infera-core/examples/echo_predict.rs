//! Runs a small predictor end to end with tracing and metrics enabled
//!
//! ```text
//! INFERA_TRACING_DIRECTIVES=infera_core=debug cargo run -p infera-core --example echo_predict
//! ```

use std::sync::Arc;
use std::time::Duration;

use infera_backends::HostTensor;
use infera_core::{
    shared, CpuBackend, DType, Metrics, Model, Predictor, PredictorConfig, StageContext, TensorList,
    TracingMetrics, TranslateResult, Translator,
};
use infera_tracing::{init_global_tracing, TracingConfig};

/// Scales a batch of readings and reports the largest one
struct MaxReading;

impl Translator for MaxReading {
    type Input = Vec<f32>;
    type Output = f32;

    fn process_input(&self, ctx: &StageContext<'_>, input: Vec<f32>) -> TranslateResult<TensorList> {
        let tensor = ctx.arena().create_tensor(vec![input.len()], &input)?;
        Ok(TensorList::new().with("readings", tensor))
    }

    fn process_output(&self, _ctx: &StageContext<'_>, outputs: TensorList) -> TranslateResult<f32> {
        Ok(outputs.require("peak")?.to_vec::<f32>()?[0])
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_global_tracing(&TracingConfig::from_env())?;

    let model = Model::builder("scale")
        .input("readings", DType::F32, vec![4])
        .output("scaled", DType::F32, vec![4])
        .output("peak", DType::F32, Vec::<usize>::new())
        .graph(|inputs| {
            // Stand-in for device latency
            std::thread::sleep(Duration::from_millis(2));
            let scaled: Vec<f32> = inputs[0].to_vec::<f32>()?.iter().map(|v| v * 1.5).collect();
            let peak = scaled.iter().copied().fold(f32::MIN, f32::max);
            Ok(vec![HostTensor::from_slice(vec![4], &scaled)?, HostTensor::scalar(peak)])
        })
        .build()?;

    let backend = shared(CpuBackend::new()?);
    let mut predictor = Predictor::new(backend, Arc::new(model), MaxReading, PredictorConfig::from_env()?)?;

    predictor.set_metrics(Arc::new(TracingMetrics));
    let first = predictor.predict(vec![1.0, 4.0, 2.0, 3.0])?;
    println!("max scaled reading: {first}");

    let metrics = Arc::new(Metrics::new());
    predictor.set_metrics(metrics.clone());
    let batch = predictor.batch_predict((0..20).map(|i| vec![i as f32, 0.0, 1.0, 2.0]))?;
    println!("batch results: {batch:?}");

    for name in ["Preprocess", "Inference", "Postprocess"] {
        println!(
            "{name:<12} mean {:>10.0} ns  p95 {:>10} ns",
            metrics.mean(name).unwrap_or_default(),
            metrics.percentile(name, 95.0).unwrap_or_default()
        );
    }

    predictor.close();
    Ok(())
}
