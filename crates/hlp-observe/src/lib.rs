//! Observability for the HLP executor: subscriber setup with optional
//! OpenTelemetry export, and a `MetricsSink` that writes samples to the log.

pub mod metrics;
pub mod tracing_setup;
