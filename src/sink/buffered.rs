//! Buffered emission
//!
//! Points accumulate in a shared batch. A batch is flushed when either:
//! - it reaches `max_size` points (handed to the flush task immediately)
//! - its oldest point is `max_delay` old
//!
//! A single background task performs every write, so writes to the backend
//! never overlap. Failed writes are logged and the batch is discarded; the
//! buffer never grows past one batch plus the flush queue.
//!
//! The `max_delay` bound holds only while the writer keeps up. A batch that
//! comes due during a slow write (the HTTP writer allows up to 10s) is
//! flushed as soon as that write returns.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::MetricSink;
use crate::error::SinkError;
use crate::instrumentation::MetricPoint;
use crate::telemetry;

/// Full batches waiting for the flush task. Beyond this, batches are dropped.
const FLUSH_QUEUE_CAPACITY: usize = 16;

/// Writes one batch to the backend.
pub trait BatchWriter: Send + Sync + 'static {
    fn write_batch<'a>(&'a self, batch: &'a [MetricPoint]) -> BoxFuture<'a, Result<(), SinkError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    Size,
    Delay,
    Shutdown,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Size => "size",
            FlushReason::Delay => "delay",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Default)]
struct Batch {
    points: Vec<MetricPoint>,
    oldest: Option<Instant>,
}

impl Batch {
    fn take(&mut self) -> Vec<MetricPoint> {
        self.oldest = None;
        std::mem::take(&mut self.points)
    }

    fn take_if_older_than(&mut self, max_delay: Duration, now: Instant) -> Option<Vec<MetricPoint>> {
        match self.oldest {
            Some(oldest) if now.saturating_duration_since(oldest) >= max_delay => Some(self.take()),
            _ => None,
        }
    }
}

/// Sink that batches points and flushes them through a [`BatchWriter`].
pub struct BufferedSink {
    batch: Arc<Mutex<Batch>>,
    max_size: usize,
    full_tx: mpsc::Sender<Vec<MetricPoint>>,
    wake: Arc<Notify>,
    stop: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BufferedSink {
    /// Start the flush task on the current Tokio runtime.
    pub fn spawn<W: BatchWriter>(writer: W, max_size: usize, max_delay: Duration) -> Self {
        let max_size = max_size.max(1);
        let batch = Arc::new(Mutex::new(Batch::default()));
        let (full_tx, full_rx) = mpsc::channel(FLUSH_QUEUE_CAPACITY);
        let wake = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());

        let flusher = Flusher {
            writer,
            batch: batch.clone(),
            max_delay,
            full_rx,
            wake: wake.clone(),
            stop: stop.clone(),
        };
        let worker = tokio::spawn(flusher.run());

        Self {
            batch,
            max_size,
            full_tx,
            wake,
            stop,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Points waiting in the current batch.
    pub fn pending(&self) -> usize {
        self.batch.lock().points.len()
    }

    /// Stop the flush task after writing everything still buffered.
    pub async fn close(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            self.stop.notify_one();
            if let Err(e) = worker.await {
                tracing::warn!("Buffered sink flush task ended abnormally: {}", e);
            }
        }
    }
}

impl MetricSink for BufferedSink {
    fn emit(&self, points: Vec<MetricPoint>) {
        let mut full = Vec::new();
        let mut started = false;

        {
            let mut batch = self.batch.lock();
            for point in points {
                if batch.points.is_empty() {
                    batch.oldest = Some(Instant::now());
                    started = true;
                }
                batch.points.push(point);
                if batch.points.len() >= self.max_size {
                    full.push(batch.take());
                }
            }
        }

        for points in full {
            if let Err(e) = self.full_tx.try_send(points) {
                let dropped = match e {
                    mpsc::error::TrySendError::Full(p) | mpsc::error::TrySendError::Closed(p) => p,
                };
                tracing::warn!("Flush queue unavailable, dropping batch of {} point(s)", dropped.len());
                telemetry::record_batch_dropped(dropped.len());
            }
        }

        if started {
            self.wake.notify_one();
        }
    }

    fn shutdown(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.close())
    }
}

impl Drop for BufferedSink {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.abort();
        }
    }
}

struct Flusher<W> {
    writer: W,
    batch: Arc<Mutex<Batch>>,
    max_delay: Duration,
    full_rx: mpsc::Receiver<Vec<MetricPoint>>,
    wake: Arc<Notify>,
    stop: Arc<Notify>,
}

impl<W: BatchWriter> Flusher<W> {
    async fn run(mut self) {
        tracing::debug!("Buffered sink flush task started");

        loop {
            let deadline = self.batch.lock().oldest.map(|oldest| oldest + self.max_delay);

            tokio::select! {
                biased;
                _ = self.stop.notified() => break,
                Some(points) = self.full_rx.recv() => {
                    self.flush(points, FlushReason::Size).await;
                }
                _ = self.wake.notified() => {}
                _ = sleep_until(deadline) => {
                    let due = self.batch.lock().take_if_older_than(self.max_delay, Instant::now());
                    if let Some(points) = due {
                        self.flush(points, FlushReason::Delay).await;
                    }
                }
            }
        }

        self.full_rx.close();
        while let Some(points) = self.full_rx.recv().await {
            self.flush(points, FlushReason::Shutdown).await;
        }
        let rest = self.batch.lock().take();
        self.flush(rest, FlushReason::Shutdown).await;

        tracing::debug!("Buffered sink flush task stopped");
    }

    async fn flush(&self, points: Vec<MetricPoint>, reason: FlushReason) {
        if points.is_empty() {
            return;
        }

        let size = points.len();
        match self.writer.write_batch(&points).await {
            Ok(()) => {
                tracing::debug!("Flushed {} point(s) ({})", size, reason.as_str());
                telemetry::record_batch_flushed(reason.as_str(), size);
                telemetry::record_points_emitted("line", size);
            }
            Err(e) => {
                let data = serde_json::to_string(&points).unwrap_or_default();
                tracing::error!("{} - data : {}", e, data);
                telemetry::record_emit_error("line");
                telemetry::record_batch_dropped(size);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
