//! Node Resource Reporter
//!
//! Samples local node usage on a fixed period and forwards it to the
//! metrics sink. Runs as a cancellable task; [`ReporterHandle::stop`] must
//! complete before the substrate connection is closed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::ports::{MetricsSink, NodeMetrics, Substrate};

pub const CPU_COUNT: &str = "cpu.count";
pub const CPU_TIME: &str = "cpu.time";
pub const HEAP_COUNT: &str = "heap.count";
pub const OFF_HEAP_COUNT: &str = "offheap.count";
pub const OFF_HEAP_TIME: &str = "offheap.time";

/// Periodic resource reporter
pub struct MetricsReporter {
    substrate: Arc<dyn Substrate>,
    sink: Arc<dyn MetricsSink>,
    period: Duration,
}

impl MetricsReporter {
    pub fn new(substrate: Arc<dyn Substrate>, sink: Arc<dyn MetricsSink>, period: Duration) -> Self {
        Self {
            substrate,
            sink,
            period,
        }
    }

    /// Sample once and emit every counter
    pub fn report_once(&self) {
        match self.substrate.local_node_metrics() {
            Ok(metrics) => emit(self.sink.as_ref(), &metrics),
            Err(e) => warn!("Skipping metrics report: {}", e),
        }
    }

    /// Start reporting. The first report happens one period after start.
    pub fn start(self) -> ReporterHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(period_secs = period.as_secs_f64(), "Metrics reporter started");
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => self.report_once(),
                }
            }
            info!("Metrics reporter stopped");
        });

        ReporterHandle { token, task }
    }
}

/// Emit one sample. CPU load is reported as a whole percentage.
pub fn emit(sink: &dyn MetricsSink, metrics: &NodeMetrics) {
    let cpu_percent = (metrics.cpu_load.clamp(0.0, 1.0) * 100.0).round() as u64;

    sink.count(CPU_COUNT, cpu_percent);
    sink.count(CPU_TIME, cpu_percent);
    sink.count(HEAP_COUNT, metrics.heap_used_bytes);
    sink.count(OFF_HEAP_COUNT, metrics.off_heap_used_bytes);
    sink.count(OFF_HEAP_TIME, metrics.off_heap_used_bytes);

    debug!(
        cpu_percent,
        heap = metrics.heap_used_bytes,
        off_heap = metrics.off_heap_used_bytes,
        "Reported node metrics"
    );
}

/// Handle to a running reporter
pub struct ReporterHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ReporterHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancel the reporter and wait until no report is in flight
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Metrics reporter terminated abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{LocalCluster, RecordingSink};
    use crate::cluster::discovery::tests::ScriptedLookup;
    use crate::cluster::{CacheConfig, ClusterTopology, InstanceMode, RetainingResolver};
    use crate::domain::ports::SubstrateConnector;

    async fn substrate() -> Arc<dyn Substrate> {
        let resolver = RetainingResolver::new(Arc::new(ScriptedLookup::default()));
        let topology = ClusterTopology::from_config(&CacheConfig::default(), &resolver)
            .await
            .unwrap();
        LocalCluster::new()
            .connect(&topology, InstanceMode::Server)
            .await
            .unwrap()
    }

    #[test]
    fn test_emit_all_counters() {
        let sink = RecordingSink::new();
        emit(
            &sink,
            &NodeMetrics {
                cpu_load: 0.256,
                heap_used_bytes: 1024,
                off_heap_used_bytes: 4096,
            },
        );

        assert_eq!(sink.total(CPU_COUNT), 26);
        assert_eq!(sink.total(CPU_TIME), 26);
        assert_eq!(sink.total(HEAP_COUNT), 1024);
        assert_eq!(sink.total(OFF_HEAP_COUNT), 4096);
        assert_eq!(sink.total(OFF_HEAP_TIME), 4096);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_report_after_one_period() {
        let sink = Arc::new(RecordingSink::new());
        let substrate = substrate().await;
        let handle = MetricsReporter::new(substrate.clone(), sink.clone(), Duration::from_secs(10)).start();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.reports(OFF_HEAP_COUNT), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(sink.reports(OFF_HEAP_COUNT), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.reports(OFF_HEAP_COUNT), 2);

        handle.stop().await;
        substrate.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_future_reports() {
        let sink = Arc::new(RecordingSink::new());
        let substrate = substrate().await;
        let handle = MetricsReporter::new(substrate.clone(), sink.clone(), Duration::from_secs(1)).start();

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.stop().await;
        let reported = sink.reports(CPU_COUNT);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.reports(CPU_COUNT), reported);
        substrate.shutdown().await;
    }

    #[tokio::test]
    async fn test_report_skipped_when_unreachable() {
        let sink = Arc::new(RecordingSink::new());
        let substrate = substrate().await;
        let reporter = MetricsReporter::new(substrate.clone(), sink.clone(), Duration::from_secs(1));

        substrate.shutdown().await;
        reporter.report_once();
        assert_eq!(sink.reports(CPU_COUNT), 0);
    }
}
