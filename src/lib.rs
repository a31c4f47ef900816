//! Request metrics for HTTP gateways
//!
//! A tower middleware that times every request, normalises its path, and
//! reports one set of points per request to a metrics backend:
//! - tagged statsd timings (datadog or graphite tag syntax)
//! - hierarchical statsd counters and timings keyed by path and status
//! - batched line-protocol points written over HTTP

pub mod config;
pub mod error;
pub mod instrumentation;
pub mod sink;
pub mod telemetry;

pub use config::{AppConfig, BackendConfig, BackendStyle, InstrumentationConfig, TagScheme};
pub use error::{ConfigError, SinkError};
pub use instrumentation::{InstrumentationLayer, MetricPoint};
pub use sink::MetricSink;
