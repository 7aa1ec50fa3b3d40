//! Observability
//!
//! Health probe results and the periodic node resource reporter.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   every period   ┌──────────────────┐
//! │  MetricsReporter   │ ───────────────► │   MetricsSink    │
//! │  (cancellable)     │                  │  (Prometheus)    │
//! └────────────────────┘                  └──────────────────┘
//!           │ local_node_metrics()
//!           ▼
//! ┌────────────────────┐
//! │     Substrate      │ ◄──── ping() ──── CacheService::check()
//! └────────────────────┘
//! ```

mod health;
mod reporter;

pub use health::{HealthCheckResult, HealthResponse, HealthStatus};
pub use reporter::{
    emit, MetricsReporter, ReporterHandle, CPU_COUNT, CPU_TIME, HEAP_COUNT, OFF_HEAP_COUNT,
    OFF_HEAP_TIME,
};
