//! Self-telemetry for the instrumentation pipeline
//!
//! Prometheus-compatible health metrics for the layer itself:
//! - Points handed to each sink and transport failures
//! - Buffered batch flushes and drops
//! - In-flight instrumented requests

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Metric names as constants for consistency
pub mod names {
    pub const POINTS_EMITTED_TOTAL: &str = "instrumentation_points_emitted_total";
    pub const EMIT_ERRORS_TOTAL: &str = "instrumentation_emit_errors_total";
    pub const BATCHES_FLUSHED_TOTAL: &str = "instrumentation_batches_flushed_total";
    pub const BATCHES_DROPPED_TOTAL: &str = "instrumentation_batches_dropped_total";
    pub const BATCH_SIZE: &str = "instrumentation_batch_size";
    pub const REQUESTS_IN_FLIGHT: &str = "instrumentation_requests_in_flight";
}

/// Label keys
pub mod labels {
    pub const SINK: &str = "sink";
    pub const REASON: &str = "reason";
}

/// Install the Prometheus recorder and return a handle for rendering.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::BATCH_SIZE.to_string()),
            &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0],
        )?
        .install_recorder()
}

pub fn record_points_emitted(sink: &'static str, count: usize) {
    counter!(names::POINTS_EMITTED_TOTAL, labels::SINK => sink).increment(count as u64);
}

pub fn record_emit_error(sink: &'static str) {
    counter!(names::EMIT_ERRORS_TOTAL, labels::SINK => sink).increment(1);
}

pub fn record_batch_flushed(reason: &'static str, size: usize) {
    counter!(names::BATCHES_FLUSHED_TOTAL, labels::REASON => reason).increment(1);
    histogram!(names::BATCH_SIZE).record(size as f64);
}

pub fn record_batch_dropped(size: usize) {
    counter!(names::BATCHES_DROPPED_TOTAL).increment(1);
    histogram!(names::BATCH_SIZE).record(size as f64);
}

pub fn request_started() {
    gauge!(names::REQUESTS_IN_FLIGHT).increment(1.0);
}

pub fn request_finished(terminal: &'static str) {
    gauge!(names::REQUESTS_IN_FLIGHT).decrement(1.0);
    tracing::trace!("Instrumented request finished: {}", terminal);
}
