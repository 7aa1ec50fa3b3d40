//! In-memory metrics sink, mostly for tests and for running without an
//! exporter.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::ports::MetricsSink;

/// One recorded counter increment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub name: String,
    pub value: u64,
}

/// Metrics sink that keeps every increment in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: RwLock<Vec<Recorded>>,
    closed: RwLock<bool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All increments in arrival order
    pub fn records(&self) -> Vec<Recorded> {
        self.records.read().clone()
    }

    /// Sum of every increment of `name`
    pub fn total(&self, name: &str) -> u64 {
        self.records
            .read()
            .iter()
            .filter(|r| r.name == name)
            .map(|r| r.value)
            .sum()
    }

    /// How many times `name` was reported
    pub fn reports(&self, name: &str) -> usize {
        self.records.read().iter().filter(|r| r.name == name).count()
    }

    /// Latest value per counter
    pub fn latest(&self) -> HashMap<String, u64> {
        self.records
            .read()
            .iter()
            .map(|r| (r.name.clone(), r.value))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }
}

impl MetricsSink for RecordingSink {
    fn count(&self, name: &str, value: u64) {
        self.records.write().push(Recorded {
            name: name.to_string(),
            value,
        });
    }

    fn close(&self) {
        *self.closed.write() = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_latest() {
        let sink = RecordingSink::new();
        sink.count("heap.count", 10);
        sink.count("heap.count", 30);
        sink.count("cpu.count", 1);

        assert_eq!(sink.total("heap.count"), 40);
        assert_eq!(sink.reports("heap.count"), 2);
        assert_eq!(sink.latest().get("heap.count"), Some(&30));

        sink.clear();
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_close() {
        let sink = RecordingSink::new();
        assert!(!sink.is_closed());
        sink.close();
        assert!(sink.is_closed());
    }
}
