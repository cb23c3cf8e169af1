//! `MetricsSink` backed by `tracing`.
//!
//! Every sample becomes an event on target `hlp::metrics`, so metrics can be
//! filtered (`RUST_LOG=hlp::metrics=info`) or shipped by whatever collects
//! the logs.

use hlp_core::metrics::MetricsSink;

/// Log target for metric samples.
pub const METRICS_TARGET: &str = "hlp::metrics";

/// Writes metric samples as `info` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl TracingMetricsSink {
    pub fn new() -> Self {
        Self
    }
}

impl MetricsSink for TracingMetricsSink {
    fn emit(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::info!(
            target: "hlp::metrics",
            metric = name,
            value,
            labels = %format_labels(labels),
            "metric"
        );
    }
}

/// Prometheus-style label set, e.g. `{outcome="failed",tier="critical"}`.
/// Empty for no labels.
pub fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "\\\"")))
        .collect();
    format!("{{{}}}", body.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_format_like_prometheus() {
        assert_eq!(format_labels(&[]), "");
        assert_eq!(
            format_labels(&[("outcome", "failed"), ("risk_tier", "critical")]),
            r#"{outcome="failed",risk_tier="critical"}"#
        );
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(format_labels(&[("reason", "a\"b")]), r#"{reason="a\"b"}"#);
    }

    #[test]
    fn emit_without_subscriber_is_harmless() {
        let sink = TracingMetricsSink::new();
        sink.emit(hlp_core::metrics::RETRIES, 1.0, &[("unit", "a")]);
    }
}
