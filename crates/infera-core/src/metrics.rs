//! Metrics sinks for per-phase timing
//!
//! The predictor reports one value per completed phase through a
//! [`MetricsSink`]. Two sinks ship with the crate:
//!
//! - [`Metrics`]: in-memory recorder with per-name aggregation, for tests and
//!   benchmarks
//! - [`TracingMetrics`]: forwards every metric as a `tracing` event
//!
//! ```rust
//! use infera_core::{MetricUnit, Metrics, MetricsSink};
//!
//! let metrics = Metrics::new();
//! metrics.add_metric("Inference", 1_500, MetricUnit::Nanoseconds);
//! metrics.add_metric("Inference", 2_500, MetricUnit::Nanoseconds);
//! assert_eq!(metrics.mean("Inference"), Some(2_000.0));
//! ```

use std::fmt;

use parking_lot::Mutex;

/// Input conversion duration
pub const PREPROCESS: &str = "Preprocess";
/// Forward execution duration, up to completion of every output
pub const INFERENCE: &str = "Inference";
/// Output conversion duration
pub const POSTPROCESS: &str = "Postprocess";

/// Unit attached to a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Count,
    Bytes,
}

impl fmt::Display for MetricUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            MetricUnit::Nanoseconds => "ns",
            MetricUnit::Microseconds => "us",
            MetricUnit::Milliseconds => "ms",
            MetricUnit::Count => "count",
            MetricUnit::Bytes => "bytes",
        };
        f.write_str(unit)
    }
}

/// Receiver of named measurements
///
/// Calls arrive in emission order on the predicting thread and must return
/// quickly; the predictor does not buffer them.
pub trait MetricsSink: Send + Sync {
    fn add_metric(&self, name: &str, value: u64, unit: MetricUnit);
}

/// One recorded measurement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    pub value: u64,
    pub unit: MetricUnit,
}

/// Thread-safe in-memory metrics recorder
#[derive(Debug, Default)]
pub struct Metrics {
    records: Mutex<Vec<Metric>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every metric received so far, in arrival order
    pub fn records(&self) -> Vec<Metric> {
        self.records.lock().clone()
    }

    /// Names in arrival order
    pub fn names(&self) -> Vec<String> {
        self.records.lock().iter().map(|m| m.name.clone()).collect()
    }

    /// Values recorded under `name`, in arrival order
    pub fn metric(&self, name: &str) -> Vec<u64> {
        self.records
            .lock()
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.value)
            .collect()
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        let values = self.metric(name);
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().map(|&v| v as f64).sum();
        Some(sum / values.len() as f64)
    }

    /// Nearest-rank percentile of the values under `name`
    ///
    /// `percentile` is clamped to `0.0..=100.0`.
    pub fn percentile(&self, name: &str, percentile: f64) -> Option<u64> {
        let mut values = self.metric(name);
        if values.is_empty() {
            return None;
        }
        values.sort_unstable();

        let p = percentile.clamp(0.0, 100.0) / 100.0;
        let rank = (p * values.len() as f64).ceil() as usize;
        Some(values[rank.clamp(1, values.len()) - 1])
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl MetricsSink for Metrics {
    fn add_metric(&self, name: &str, value: u64, unit: MetricUnit) {
        self.records.lock().push(Metric {
            name: name.to_string(),
            value,
            unit,
        });
    }
}

/// Sink that emits each metric as a `tracing` event at INFO
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn add_metric(&self, name: &str, value: u64, unit: MetricUnit) {
        tracing::info!(metric = name, value, unit = %unit, "metric");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_keep_order() {
        let metrics = Metrics::new();
        metrics.add_metric(PREPROCESS, 3, MetricUnit::Nanoseconds);
        metrics.add_metric(INFERENCE, 1, MetricUnit::Nanoseconds);
        metrics.add_metric(POSTPROCESS, 2, MetricUnit::Nanoseconds);

        assert_eq!(metrics.names(), vec!["Preprocess", "Inference", "Postprocess"]);
        assert_eq!(metrics.metric(INFERENCE), vec![1]);
        assert_eq!(metrics.len(), 3);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let metrics = Metrics::new();
        for value in [15, 20, 35, 40, 50] {
            metrics.add_metric("latency", value, MetricUnit::Microseconds);
        }

        assert_eq!(metrics.percentile("latency", 0.0), Some(15));
        assert_eq!(metrics.percentile("latency", 30.0), Some(20));
        assert_eq!(metrics.percentile("latency", 50.0), Some(35));
        assert_eq!(metrics.percentile("latency", 100.0), Some(50));
        assert_eq!(metrics.percentile("latency", 250.0), Some(50));
        assert_eq!(metrics.percentile("missing", 50.0), None);
    }

    #[test]
    fn test_mean_and_clear() {
        let metrics = Metrics::new();
        assert_eq!(metrics.mean("x"), None);
        metrics.add_metric("x", 1, MetricUnit::Count);
        metrics.add_metric("x", 4, MetricUnit::Count);
        assert_eq!(metrics.mean("x"), Some(2.5));

        metrics.clear();
        assert!(metrics.is_empty());
    }

    #[test]
    fn test_unit_display() {
        assert_eq!(MetricUnit::Nanoseconds.to_string(), "ns");
        assert_eq!(MetricUnit::Bytes.to_string(), "bytes");
    }
}
