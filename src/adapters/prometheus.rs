//! Prometheus Metrics Sink
//!
//! Implements the `MetricsSink` port on top of a Prometheus registry. Each
//! counter name reported by the service becomes one `IntCounter`, registered
//! the first time it is seen.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::{IntCounter, Opts, Registry};
use tracing::{debug, warn};

use crate::domain::ports::MetricsSink;

/// Metric name prefix
const NAMESPACE: &str = "buildcache";

/// Metrics sink backed by an injected Prometheus registry
pub struct PrometheusSink {
    registry: Registry,
    counters: DashMap<String, IntCounter>,
    closed: AtomicBool,
}

impl PrometheusSink {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            counters: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Registry the counters are registered in
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Prometheus name for a dotted counter name, e.g. `cpu.count` ->
    /// `buildcache_cpu_count`
    pub fn metric_name(name: &str) -> String {
        let sanitized: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_{}", NAMESPACE, sanitized)
    }

    fn counter(&self, name: &str) -> Option<IntCounter> {
        if let Some(counter) = self.counters.get(name) {
            return Some(counter.clone());
        }

        match self.counters.entry(name.to_string()) {
            Entry::Occupied(entry) => Some(entry.get().clone()),
            Entry::Vacant(entry) => {
                let metric = Self::metric_name(name);
                let opts = Opts::new(metric.clone(), format!("Reported {}", name));
                let counter = match IntCounter::with_opts(opts) {
                    Ok(counter) => counter,
                    Err(e) => {
                        warn!(metric = %metric, "Failed to create counter: {}", e);
                        return None;
                    }
                };
                if let Err(e) = self.registry.register(Box::new(counter.clone())) {
                    warn!(metric = %metric, "Failed to register counter: {}", e);
                    return None;
                }

                debug!(metric = %metric, "Registered counter");
                Some(entry.insert(counter).clone())
            }
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn count(&self, name: &str, value: u64) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }
        if let Some(counter) = self.counter(name) {
            counter.inc_by(value);
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PrometheusSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusSink")
            .field("counters", &self.counters.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
