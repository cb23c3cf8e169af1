//! Metrics emission port.
//!
//! The executor reports counters and gauges through [`MetricsSink`]; the
//! backing system (Prometheus, logs, a test recorder) is chosen by the caller.

use std::sync::{Mutex, PoisonError};

pub const UNITS_DISPATCHED: &str = "hlp_units_dispatched_total";
pub const UNIT_FAILURES: &str = "hlp_unit_failures_total";
pub const RETRIES: &str = "hlp_retries_total";
pub const UNITS_IN_FLIGHT: &str = "hlp_units_in_flight";
pub const CIRCUIT_TRIPS: &str = "hlp_circuit_trips_total";
pub const CIRCUIT_REJECTIONS: &str = "hlp_circuit_rejections_total";
pub const ROLLBACK_ARTIFACTS: &str = "hlp_rollback_artifacts_total";
pub const CHECKPOINTS_WRITTEN: &str = "hlp_checkpoints_written_total";
pub const PLANS_FINISHED: &str = "hlp_plans_finished_total";

/// Receives metric samples. Implementations must be cheap and non-blocking.
pub trait MetricsSink: Send + Sync {
    fn emit(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn emit(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// One recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

/// Keeps every sample in memory. Useful for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    samples: Mutex<Vec<MetricSample>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of all samples with the given name.
    pub fn total(&self, name: &str) -> f64 {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.name == name)
            .map(|s| s.value)
            .sum()
    }
}

impl MetricsSink for RecordingMetrics {
    fn emit(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let sample = MetricSample {
            name: name.to_string(),
            value,
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_metrics_sums_by_name() {
        let metrics = RecordingMetrics::new();
        metrics.emit(RETRIES, 1.0, &[("unit_id", "a")]);
        metrics.emit(RETRIES, 1.0, &[("unit_id", "b")]);
        metrics.emit(UNIT_FAILURES, 1.0, &[]);
        assert_eq!(metrics.total(RETRIES), 2.0);
        assert_eq!(metrics.samples().len(), 3);
        assert_eq!(metrics.samples()[0].labels[0], ("unit_id".into(), "a".into()));
    }

    #[test]
    fn noop_metrics_accepts_anything() {
        NoopMetrics.emit(PLANS_FINISHED, 1.0, &[("status", "completed")]);
    }
}
