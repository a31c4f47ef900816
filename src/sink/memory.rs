//! In-memory sink. Records every emission as-is; used by tests and by hosts
//! that want to inspect points themselves.

use parking_lot::Mutex;

use super::MetricSink;
use crate::instrumentation::MetricPoint;

#[derive(Debug, Default)]
pub struct MemorySink {
    emissions: Mutex<Vec<Vec<MetricPoint>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `emit` calls, including empty ones.
    pub fn emission_count(&self) -> usize {
        self.emissions.lock().len()
    }

    pub fn emissions(&self) -> Vec<Vec<MetricPoint>> {
        self.emissions.lock().clone()
    }

    /// All points, flattened in emission order.
    pub fn points(&self) -> Vec<MetricPoint> {
        self.emissions.lock().iter().flatten().cloned().collect()
    }

    pub fn clear(&self) {
        self.emissions.lock().clear();
    }
}

impl MetricSink for MemorySink {
    fn emit(&self, points: Vec<MetricPoint>) {
        self.emissions.lock().push(points);
    }
}
