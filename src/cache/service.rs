//! Cache Service
//!
//! Public contract of the build-artifact cache: `init`, `get_data`,
//! `put_data`, key/value counts and the health check. Composes the ID
//! allocator, artifact store, both indexes and the eviction cascade on top
//! of one substrate connection.
//!
//! # Lifecycle
//!
//! ```text
//! new() ──► init() ──► start() ──► ... ──► stop()
//!            │           │                   │
//!            │           └ metrics reporter  ├ reporter cancelled
//!            └ substrate joined,             ├ cascade listener stopped
//!              cascade listener running      ├ substrate left
//!                                            └ metrics sink closed
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use super::allocator::IdAllocator;
use super::cascade::{CascadeHandle, CascadeStatsSnapshot, EvictionCascade};
use super::entry::{Artifact, CanonicalId, KeySet, TimeUnit, MAX_TTL};
use super::index::{ForwardIndex, ReverseIndex};
use super::store::ArtifactStore;
use crate::adapters::{LocalCluster, SystemDnsLookup};
use crate::cluster::{CacheConfig, ClusterTopology, InstanceMode, RetainingResolver, SharedResolver};
use crate::domain::ports::{MetricsSink, Substrate, SubstrateConnector};
use crate::error::{Error, Result};
use crate::monitoring::{HealthCheckResult, HealthResponse, MetricsReporter, ReporterHandle};
use crate::throttle::BytesRateLimiter;

const HEALTH_CHECK_NAME: &str = "substrate";

/// Everything that exists once `init` succeeded
struct Running {
    substrate: Arc<dyn Substrate>,
    mode: InstanceMode,
    allocator: IdAllocator,
    store: ArtifactStore,
    forward: ForwardIndex,
    reverse: ReverseIndex,
    cascade: Arc<EvictionCascade>,
    limiter: Option<BytesRateLimiter>,
    report_interval: Duration,
    backups: u32,
}

#[derive(Default)]
struct Tasks {
    cascade: Option<CascadeHandle>,
    reporter: Option<ReporterHandle>,
}

/// Build-artifact cache facade.
pub struct CacheService {
    connector: Arc<dyn SubstrateConnector>,
    resolver: SharedResolver,
    sink: Arc<dyn MetricsSink>,
    initializing: AtomicBool,
    stopped: AtomicBool,
    running: OnceCell<Running>,
    tasks: Mutex<Tasks>,
    created_at: Instant,
}

impl CacheService {
    pub fn new(
        connector: Arc<dyn SubstrateConnector>,
        resolver: SharedResolver,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            connector,
            resolver,
            sink,
            initializing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            running: OnceCell::new(),
            tasks: Mutex::new(Tasks::default()),
            created_at: Instant::now(),
        }
    }

    /// Service joining an in-process cluster, resolving through system DNS
    pub fn local(cluster: LocalCluster, sink: Arc<dyn MetricsSink>) -> Self {
        Self::new(
            Arc::new(cluster),
            Arc::new(RetainingResolver::new(Arc::new(SystemDnsLookup::new()))),
            sink,
        )
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Join the cluster. Succeeds at most once per service.
    #[instrument(skip(self, config, mode), fields(mode = %mode))]
    pub async fn init(&self, config: &CacheConfig, mode: InstanceMode) -> Result<()> {
        if self.initializing.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyInitialized);
        }

        match self.connect(config, mode).await {
            Ok(running) => {
                let handle = Arc::clone(&running.cascade)
                    .spawn(running.substrate.subscribe_artifact_events());
                self.tasks.lock().cascade = Some(handle);

                info!(node_id = %running.substrate.node_id(), "Cache service initialized");
                if self.running.set(running).is_err() {
                    return Err(Error::Internal("service state set twice".to_string()));
                }
                Ok(())
            }
            Err(e) => {
                // A failed start may be retried
                self.initializing.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn connect(&self, config: &CacheConfig, mode: InstanceMode) -> Result<Running> {
        let topology = ClusterTopology::from_config(config, &self.resolver).await?;
        let limiter = config.write_rate_bytes()?.map(BytesRateLimiter::new);

        let substrate = self
            .connector
            .connect(&topology, mode)
            .await
            .map_err(|e| match e {
                e @ Error::Startup(_) => e,
                other => Error::Startup(other.to_string()),
            })?;

        let forward = ForwardIndex::new(substrate.forward_index());
        let reverse = ReverseIndex::new(substrate.reverse_index());
        let store = ArtifactStore::new(substrate.artifacts());
        let cascade = Arc::new(EvictionCascade::new(
            forward.clone(),
            reverse.clone(),
            store.clone(),
            config.cascade_max_attempts,
        ));

        Ok(Running {
            allocator: IdAllocator::new(substrate.sequence(), topology.sequence().reserve_size),
            store,
            forward,
            reverse,
            cascade,
            limiter,
            report_interval: config.report_interval(),
            backups: config.backup_count,
            mode,
            substrate,
        })
    }

    /// Start periodic metrics reporting
    pub fn start(&self) -> Result<()> {
        let running = self.running()?;
        let mut tasks = self.tasks.lock();
        if tasks.reporter.is_some() {
            return Ok(());
        }

        let reporter = MetricsReporter::new(
            Arc::clone(&running.substrate),
            Arc::clone(&self.sink),
            running.report_interval,
        );
        tasks.reporter = Some(reporter.start());
        Ok(())
    }

    /// Stop background work, leave the cluster and close the metrics sink.
    ///
    /// The reporter is cancelled before the substrate is disconnected.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let (reporter, cascade) = {
            let mut tasks = self.tasks.lock();
            (tasks.reporter.take(), tasks.cascade.take())
        };

        if let Some(reporter) = reporter {
            reporter.stop().await;
        }
        if let Some(cascade) = cascade {
            cascade.stop().await;
        }
        if let Some(running) = self.running.get() {
            running.substrate.shutdown().await;
        }
        self.sink.close();

        info!("Cache service stopped");
    }

    fn running(&self) -> Result<&Running> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::NotInitialized);
        }
        self.running.get().ok_or(Error::NotInitialized)
    }

    // =========================================================================
    // Data Path
    // =========================================================================

    /// Artifact stored under `key`, or `None`.
    ///
    /// A key whose artifact is already gone is reported as not found.
    #[instrument(skip(self))]
    pub async fn get_data(&self, key: &str) -> Result<Option<Artifact>> {
        let running = self.running()?;

        let Some(id) = running.forward.resolve(key).await? else {
            return Ok(None);
        };

        let artifact = running.store.fetch(id).await?;
        if artifact.is_none() {
            debug!(id = %id, "Key resolved to a destroyed artifact");
        }
        Ok(artifact)
    }

    /// Store `artifact` under every key, with the default time-to-live
    pub async fn put_data<I, S>(&self, keys: I, artifact: Artifact) -> Result<CanonicalId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.put(KeySet::from_keys(keys), artifact, None).await
    }

    /// Store `artifact` under every key, expiring `ttl_value` `ttl_unit`s
    /// after its last access
    pub async fn put_data_with_ttl<I, S>(
        &self,
        keys: I,
        artifact: Artifact,
        ttl_unit: TimeUnit,
        ttl_value: u64,
    ) -> Result<CanonicalId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ttl = ttl_unit.duration(ttl_value);
        if ttl.is_zero() {
            return Err(Error::Write(format!(
                "time-to-live of {} {} is not positive",
                ttl_value, ttl_unit
            )));
        }
        if ttl > MAX_TTL {
            return Err(Error::Write(format!(
                "time-to-live of {} {} exceeds {} days",
                ttl_value,
                ttl_unit,
                MAX_TTL.as_secs() / 86_400
            )));
        }
        self.put(KeySet::from_keys(keys), artifact, Some(ttl)).await
    }

    #[instrument(skip(self, keys, artifact), fields(keys = keys.len(), bytes = artifact.len()))]
    async fn put(&self, keys: KeySet, artifact: Artifact, ttl: Option<Duration>) -> Result<CanonicalId> {
        if keys.is_empty() {
            return Err(Error::EmptyKeySet);
        }
        let running = self.running()?;

        if let Some(limiter) = &running.limiter {
            limiter.acquire(artifact.len() as u64).await;
        }

        let id = running.allocator.next_id().await.map_err(Error::into_write)?;

        running
            .store
            .store(id, artifact, ttl)
            .await
            .map_err(Error::into_write)?;

        let indexed = async {
            running.forward.bind_all(&keys, id).await?;
            running.reverse.record(id, keys.clone()).await
        }
        .await;

        if let Err(e) = indexed {
            warn!(id = %id, "Index write failed, rolling back artifact: {}", e);
            Self::roll_back(running, &keys, id).await;
            return Err(e.into_write());
        }

        Self::reclaim_if_destroyed(running, id).await;

        debug!(id = %id, "Artifact stored");
        Ok(id)
    }

    /// The artifact may have expired or been evicted before its reverse
    /// entry existed, in which case its notification found nothing to clean.
    async fn reclaim_if_destroyed(running: &Running, id: CanonicalId) {
        match running.store.contains(id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(id = %id, "Artifact destroyed while indexing, reclaiming keys");
                if let Err(e) = running.cascade.reclaim(id).await {
                    warn!(id = %id, "Could not reclaim keys of destroyed artifact: {}", e);
                }
            }
            Err(e) => warn!(id = %id, "Could not confirm stored artifact: {}", e),
        }
    }

    /// Best-effort removal of a partially written artifact
    async fn roll_back(running: &Running, keys: &KeySet, id: CanonicalId) {
        for key in keys {
            if let Err(e) = running.forward.unbind_if_current(key, id).await {
                warn!(id = %id, "Rollback could not unbind key: {}", e);
            }
        }
        if let Err(e) = running.reverse.forget(id).await {
            warn!(id = %id, "Rollback could not remove reverse entry: {}", e);
        }
        if let Err(e) = running.store.discard(id).await {
            warn!(id = %id, "Rollback could not remove artifact: {}", e);
        }
    }

    /// Live forward index entries
    pub async fn number_of_keys(&self) -> Result<usize> {
        self.running()?.forward.len().await
    }

    /// Live artifact store entries
    pub async fn number_of_values(&self) -> Result<usize> {
        self.running()?.store.len().await
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probe the substrate. Never fails; problems are reported in the result.
    pub async fn check(&self) -> HealthCheckResult {
        let started = Instant::now();

        let running = match self.running() {
            Ok(running) => running,
            Err(e) => return HealthCheckResult::unhealthy(HEALTH_CHECK_NAME, e.to_string()),
        };

        let result = match running.substrate.ping().await {
            Ok(status) if status.server_nodes == 0 => {
                HealthCheckResult::unhealthy(HEALTH_CHECK_NAME, "no server nodes in cluster")
            }
            Ok(status) => {
                let message = format!(
                    "{} server, {} client nodes",
                    status.server_nodes, status.client_nodes
                );
                if running.backups > 0 && status.server_nodes <= running.backups as usize {
                    HealthCheckResult::degraded(
                        HEALTH_CHECK_NAME,
                        format!("{}; {} backups configured", message, running.backups),
                    )
                } else {
                    HealthCheckResult::healthy(HEALTH_CHECK_NAME, message)
                }
            }
            Err(e) => HealthCheckResult::unhealthy(HEALTH_CHECK_NAME, e.to_string()),
        };

        result.with_duration(started.elapsed())
    }

    /// Health response for the HTTP probe endpoint
    pub async fn health(&self) -> HealthResponse {
        HealthResponse::new(vec![self.check().await], self.created_at.elapsed())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn mode(&self) -> Option<InstanceMode> {
        self.running.get().map(|r| r.mode)
    }

    pub fn node_id(&self) -> Option<&str> {
        self.running.get().map(|r| r.substrate.node_id())
    }

    pub fn cascade_stats(&self) -> Option<CascadeStatsSnapshot> {
        self.running.get().map(|r| r.cascade.stats())
    }

    /// Keys recorded for `id` in the reverse index
    pub async fn keys_of(&self, id: CanonicalId) -> Result<Option<KeySet>> {
        self.running()?.reverse.keys_of(id).await
    }

    /// Canonical ID `key` currently resolves to
    pub async fn resolve(&self, key: &str) -> Result<Option<CanonicalId>> {
        self.running()?.forward.resolve(key).await
    }

    /// Run the substrate's expiry sweep now instead of waiting for its timer
    pub async fn sweep_expired(&self) -> Result<usize> {
        self.running()?.substrate.sweep_expired().await
    }

    pub fn is_reporting(&self) -> bool {
        self.tasks
            .lock()
            .reporter
            .as_ref()
            .map(ReporterHandle::is_running)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("initialized", &self.running.get().is_some())
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .field("resolver", &self.resolver)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
