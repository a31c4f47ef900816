//! Metric sinks
//!
//! Every backend style sits behind the same [`MetricSink`] contract:
//! - [`StatsdSink`] sends tagged or hierarchical points immediately over UDP
//! - [`BufferedSink`] batches points and flushes them by size or age
//! - [`MemorySink`] keeps everything in memory
//!
//! `emit` never fails from the caller's point of view. Transport errors are
//! logged together with the payload and dropped.

pub mod buffered;
pub mod line;
pub mod memory;
pub mod statsd;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::config::{BackendConfig, BackendStyle};
use crate::error::ConfigError;
use crate::instrumentation::MetricPoint;

pub use buffered::{BatchWriter, BufferedSink};
pub use line::HttpLineWriter;
pub use memory::MemorySink;
pub use statsd::{DatagramTransport, StatsdSink, UdpTransport};

/// Destination for the points of finished requests.
pub trait MetricSink: Send + Sync {
    /// Hand off points; must not block the caller.
    fn emit(&self, points: Vec<MetricPoint>);

    /// Stop background work and flush anything pending.
    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Build the sink selected by `backend.style`.
///
/// The line style spawns its flush task, so this must run inside a Tokio
/// runtime.
pub fn from_config(backend: &BackendConfig) -> Result<Arc<dyn MetricSink>, ConfigError> {
    let sink: Arc<dyn MetricSink> = match backend.style {
        BackendStyle::Tagged | BackendStyle::Hierarchical => {
            let transport = UdpTransport::connect(&backend.host, backend.port())
                .map_err(ConfigError::Transport)?;
            tracing::info!(
                "Statsd sink ({:?}) sending to {}:{}",
                backend.style,
                backend.host,
                backend.port()
            );
            Arc::new(StatsdSink::new(transport, backend.prefix(), backend.scheme))
        }
        BackendStyle::Line => {
            let writer = HttpLineWriter::from_config(backend).map_err(ConfigError::Transport)?;
            tracing::info!(
                "Buffered line sink writing to {} (buffer_size: {}, delay: {}ms)",
                writer.url(),
                backend.buffer_size,
                backend.delay
            );
            Arc::new(BufferedSink::spawn(writer, backend.buffer_size, backend.delay()))
        }
    };

    Ok(sink)
}
