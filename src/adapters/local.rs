//! Local Substrate Adapter
//!
//! In-process implementation of the substrate ports. A [`LocalCluster`] is
//! shared by every service instance in the process; server members hold the
//! data, client members route to it.
//!
//! # Design
//!
//! - DashMap-backed maps with per-entry touch-based expiry
//! - Byte capacity with least-recently-touched eviction
//! - Expired/removed/evicted notifications on a broadcast channel
//! - Background expiry sweeper owned by the cluster, cancelled when the last
//!   server member leaves

use std::collections::BTreeMap;
use std::hash::Hash;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{Artifact, CanonicalId, KeySet};
use crate::cluster::{
    ClusterTopology, InstanceMode, MapSettings, ARTIFACTS_MAP, KEYS_MAP, KEYS_REVERSE_MAP,
};
use crate::domain::events::{EntryEvent, EntryEventKind};
use crate::domain::ports::{
    AtomicSequence, ClusterStatus, ClusteredMap, NodeMetrics, Substrate, SubstrateConnector,
};
use crate::error::{Error, Result};

/// Buffered notifications per subscriber before it starts lagging
const EVENT_CHANNEL_CAPACITY: usize = 4096;

// =============================================================================
// Entry Weight
// =============================================================================

/// Approximate in-memory footprint, used for capacity accounting
pub trait Weight {
    fn weight(&self) -> u64;
}

impl Weight for String {
    fn weight(&self) -> u64 {
        self.len() as u64
    }
}

impl Weight for CanonicalId {
    fn weight(&self) -> u64 {
        std::mem::size_of::<u64>() as u64
    }
}

impl Weight for Artifact {
    fn weight(&self) -> u64 {
        self.len() as u64
    }
}

impl Weight for KeySet {
    fn weight(&self) -> u64 {
        self.size_bytes()
    }
}

/// Key bound of a local map
pub trait MapKey: Eq + Hash + Clone + Weight + Send + Sync + 'static {}
impl<T: Eq + Hash + Clone + Weight + Send + Sync + 'static> MapKey for T {}

/// Value bound of a local map
pub trait MapValue: Clone + PartialEq + Weight + Send + Sync + 'static {}
impl<T: Clone + PartialEq + Weight + Send + Sync + 'static> MapValue for T {}

/// Callback fired when an entry leaves a map
pub type Notifier<K> = Arc<dyn Fn(&K, EntryEventKind) + Send + Sync>;

// =============================================================================
// Local Map
// =============================================================================

#[derive(Debug)]
struct Slot<V> {
    value: V,
    size: u64,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
    /// Position in the access order; larger is more recent
    tick: u64,
}

/// Expiry deadline for `ttl` from `now`. A deadline past the clock's range
/// means the entry never expires.
fn deadline(now: Instant, ttl: Option<Duration>) -> Option<Instant> {
    ttl.and_then(|ttl| now.checked_add(ttl))
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    fn touch(&mut self, now: Instant, tick: u64) -> u64 {
        self.expires_at = deadline(now, self.ttl);
        std::mem::replace(&mut self.tick, tick)
    }
}

/// Map statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapStats {
    pub entries: usize,
    pub used_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub removals: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Single-process clustered map
pub struct LocalMap<K, V> {
    name: String,
    entries: DashMap<K, Slot<V>>,
    /// Keys by last access tick, oldest first. May hold stale ticks of
    /// replaced entries; eviction skips them.
    access_order: Mutex<BTreeMap<u64, K>>,
    clock: AtomicU64,
    default_ttl: Option<Duration>,
    capacity: Option<u64>,
    statistics_enabled: bool,
    notifier: Option<Notifier<K>>,
    used_bytes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    removals: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K: MapKey, V: MapValue> LocalMap<K, V> {
    /// Create a map from its topology settings
    pub fn new(settings: &MapSettings) -> Self {
        Self {
            name: settings.name.clone(),
            entries: DashMap::new(),
            access_order: Mutex::new(BTreeMap::new()),
            clock: AtomicU64::new(0),
            default_ttl: settings.default_ttl,
            capacity: settings.off_heap_max_bytes,
            statistics_enabled: settings.statistics_enabled,
            notifier: None,
            used_bytes: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            removals: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Create an unbounded map without expiry
    pub fn unbounded(name: &str) -> Self {
        Self::new(&MapSettings {
            name: name.to_string(),
            mode: crate::cluster::CacheMode::Local,
            backups: 0,
            off_heap_max_bytes: None,
            default_ttl: None,
            statistics_enabled: true,
        })
    }

    /// Attach a removal callback
    pub fn with_notifier(mut self, notifier: Notifier<K>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    fn notify(&self, key: &K, kind: EntryEventKind) {
        if let Some(notifier) = &self.notifier {
            notifier(key, kind);
        }
    }

    fn record(&self, counter: &AtomicU64) {
        if self.statistics_enabled {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Account for a slot that left the map
    fn release(&self, slot: &Slot<V>) {
        self.used_bytes.fetch_sub(slot.size, Ordering::Relaxed);
        self.access_order.lock().remove(&slot.tick);
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let now = Instant::now();

        if let Some(mut slot) = self.entries.get_mut(key) {
            if !slot.is_expired(now) {
                let tick = self.next_tick();
                let previous = slot.touch(now, tick);
                {
                    let mut order = self.access_order.lock();
                    order.remove(&previous);
                    order.insert(tick, key.clone());
                }
                self.record(&self.hits);
                return Some(slot.value.clone());
            }
        } else {
            self.record(&self.misses);
            return None;
        }

        // Lazily expire the entry we just found elapsed
        self.expire_if_elapsed(key, now);
        self.record(&self.misses);
        None
    }

    fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Result<()> {
        let size = key.weight() + value.weight();
        if let Some(capacity) = self.capacity {
            if size > capacity {
                return Err(Error::Substrate(format!(
                    "entry of {} bytes exceeds capacity {} of map '{}'",
                    size, capacity, self.name
                )));
            }
        }

        let now = Instant::now();
        let tick = self.next_tick();
        let slot = Slot {
            value,
            size,
            ttl,
            expires_at: deadline(now, ttl),
            tick,
        };

        self.used_bytes.fetch_add(size, Ordering::Relaxed);
        if let Some(old) = self.entries.insert(key.clone(), slot) {
            self.release(&old);
        }
        self.access_order.lock().insert(tick, key.clone());
        self.record(&self.writes);

        self.evict_over_capacity(&key);
        Ok(())
    }

    fn expire_if_elapsed(&self, key: &K, now: Instant) -> bool {
        match self.entries.remove_if(key, |_, slot| slot.is_expired(now)) {
            Some((key, slot)) => {
                self.release(&slot);
                self.record(&self.expirations);
                self.notify(&key, EntryEventKind::Expired);
                true
            }
            None => false,
        }
    }

    /// Evict least recently touched entries until the map fits its capacity.
    /// `protect` is the entry that triggered eviction and is never chosen.
    /// Elapsed entries met on the way are reported as expired.
    fn evict_over_capacity(&self, protect: &K) {
        let Some(capacity) = self.capacity else {
            return;
        };

        let mut spared: Vec<(u64, K)> = Vec::new();
        while self.used_bytes() > capacity {
            let Some((tick, victim)) = self.access_order.lock().pop_first() else {
                break;
            };

            if &victim == protect {
                spared.push((tick, victim));
                continue;
            }

            let now = Instant::now();
            // A stale tick means the entry was touched or replaced since
            let Some((key, slot)) = self.entries.remove_if(&victim, |_, slot| slot.tick == tick)
            else {
                continue;
            };

            self.used_bytes.fetch_sub(slot.size, Ordering::Relaxed);
            if slot.is_expired(now) {
                self.record(&self.expirations);
                self.notify(&key, EntryEventKind::Expired);
            } else {
                self.record(&self.evictions);
                debug!(map = %self.name, bytes = slot.size, "Evicted entry under capacity pressure");
                self.notify(&key, EntryEventKind::Evicted);
            }
        }

        if !spared.is_empty() {
            self.access_order.lock().extend(spared);
        }
    }

    /// Expire every elapsed entry, returning how many were removed
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let elapsed: Vec<K> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        elapsed
            .iter()
            .filter(|key| self.expire_if_elapsed(key, now))
            .count()
    }

    /// Bytes currently accounted to this map
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Number of entries that have not expired
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .count()
    }

    pub fn stats(&self) -> MapStats {
        MapStats {
            entries: self.live_len(),
            used_bytes: self.used_bytes(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry without notifications
    pub fn clear(&self) {
        self.entries.clear();
        self.access_order.lock().clear();
        self.used_bytes.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl<K: MapKey, V: MapValue> ClusteredMap<K, V> for LocalMap<K, V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        Ok(self.lookup(key))
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|slot| !slot.is_expired(now))
            .unwrap_or(false))
    }

    async fn put(&self, key: K, value: V) -> Result<()> {
        self.insert(key, value, self.default_ttl)
    }

    async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<()> {
        self.insert(key, value, Some(ttl))
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        match self.entries.remove(key) {
            Some((key, slot)) => {
                self.release(&slot);
                self.record(&self.removals);
                self.notify(&key, EntryEventKind::Removed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool> {
        match self
            .entries
            .remove_if(key, |_, slot| slot.value == *expected)
        {
            Some((key, slot)) => {
                self.release(&slot);
                self.record(&self.removals);
                self.notify(&key, EntryEventKind::Removed);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self) -> Result<Vec<K>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.live_len())
    }
}

// =============================================================================
// Local Sequence
// =============================================================================

/// Single-process monotonic sequence. The first value handed out is 1.
pub struct LocalSequence {
    name: String,
    current: AtomicU64,
}

impl LocalSequence {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            current: AtomicU64::new(0),
        }
    }

    /// Last value reserved so far
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AtomicSequence for LocalSequence {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reserve(&self, count: u64) -> Result<Range<u64>> {
        if count == 0 {
            return Err(Error::SequenceUnavailable(
                "reservation size must be greater than 0".to_string(),
            ));
        }
        let start = self.current.fetch_add(count, Ordering::SeqCst) + 1;
        Ok(start..start + count)
    }
}

// =============================================================================
// Cluster
// =============================================================================

struct SharedData {
    artifacts: Arc<LocalMap<CanonicalId, Artifact>>,
    forward: Arc<LocalMap<String, CanonicalId>>,
    reverse: Arc<LocalMap<CanonicalId, KeySet>>,
    sequence: Arc<LocalSequence>,
    sweeper_token: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SharedData {
    fn create(topology: &ClusterTopology, events: broadcast::Sender<EntryEvent>) -> Result<Self> {
        let settings = |name: &str| {
            topology
                .map(name)
                .ok_or_else(|| Error::Startup(format!("topology has no '{}' map", name)))
        };

        let notifier: Notifier<CanonicalId> = Arc::new(move |id: &CanonicalId, kind| {
            // No subscribers is not an error
            let _ = events.send(EntryEvent::new(*id, kind));
        });

        let artifacts =
            Arc::new(LocalMap::new(settings(ARTIFACTS_MAP)?).with_notifier(notifier));
        let forward = Arc::new(LocalMap::new(settings(KEYS_MAP)?));
        let reverse = Arc::new(LocalMap::new(settings(KEYS_REVERSE_MAP)?));
        let sequence = Arc::new(LocalSequence::new(&topology.sequence().name));

        let sweeper_token = CancellationToken::new();
        let sweeper = spawn_sweeper(
            Arc::clone(&artifacts),
            topology.sweep_interval(),
            sweeper_token.clone(),
        );

        Ok(Self {
            artifacts,
            forward,
            reverse,
            sequence,
            sweeper_token,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    async fn stop_sweeper(&self) {
        self.sweeper_token.cancel();
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Expiry sweeper terminated abnormally: {}", e);
            }
        }
    }
}

fn spawn_sweeper(
    artifacts: Arc<LocalMap<CanonicalId, Artifact>>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tick.tick() => {
                    let expired = artifacts.sweep();
                    if expired > 0 {
                        debug!(expired, "Expiry sweep completed");
                    }
                }
            }
        }
    })
}

struct ClusterState {
    reachable: AtomicBool,
    members: DashMap<String, InstanceMode>,
    data: Mutex<Option<Arc<SharedData>>>,
    events: broadcast::Sender<EntryEvent>,
}

impl ClusterState {
    fn status(&self) -> ClusterStatus {
        let mut status = ClusterStatus::default();
        for member in self.members.iter() {
            match member.value() {
                InstanceMode::Server => status.server_nodes += 1,
                InstanceMode::Client => status.client_nodes += 1,
            }
        }
        status
    }
}

/// In-process cluster that substrate connections join.
#[derive(Clone)]
pub struct LocalCluster {
    state: Arc<ClusterState>,
}

impl LocalCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(ClusterState {
                reachable: AtomicBool::new(true),
                members: DashMap::new(),
                data: Mutex::new(None),
                events,
            }),
        }
    }

    /// Simulate a network partition between this process and the cluster
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current membership
    pub fn status(&self) -> ClusterStatus {
        self.state.status()
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCluster")
            .field("status", &self.status())
            .finish()
    }
}

#[async_trait]
impl SubstrateConnector for LocalCluster {
    #[instrument(skip(self, topology))]
    async fn connect(
        &self,
        topology: &ClusterTopology,
        mode: InstanceMode,
    ) -> Result<Arc<dyn Substrate>> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(Error::Startup("cluster is unreachable".to_string()));
        }

        let data = {
            let mut data = self.state.data.lock();
            let existing = data.as_ref().map(Arc::clone);
            match (existing, mode) {
                (Some(existing), _) => existing,
                (None, InstanceMode::Server) => {
                    let created = Arc::new(SharedData::create(topology, self.state.events.clone())?);
                    *data = Some(Arc::clone(&created));
                    created
                }
                (None, InstanceMode::Client) => {
                    return Err(Error::Startup(
                        "no server nodes available for client connection".to_string(),
                    ));
                }
            }
        };

        let node_id = uuid::Uuid::new_v4().to_string();
        self.state.members.insert(node_id.clone(), mode);

        info!(
            node_id = %node_id,
            mode = %mode,
            addresses = topology.discovery().addresses.len(),
            "Joined local cluster"
        );

        let node = Arc::new(NodeState {
            id: node_id,
            mode,
            online: AtomicBool::new(true),
            cluster: Arc::clone(&self.state),
        });

        Ok(Arc::new(LocalSubstrate { node, data }))
    }
}

// =============================================================================
// Node Connection
// =============================================================================

struct NodeState {
    id: String,
    mode: InstanceMode,
    online: AtomicBool,
    cluster: Arc<ClusterState>,
}

impl NodeState {
    fn ensure_reachable(&self) -> Result<()> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(Error::Substrate(format!(
                "node {} has left the cluster",
                self.id
            )));
        }
        if !self.cluster.reachable.load(Ordering::SeqCst) {
            return Err(Error::Substrate("cluster is unreachable".to_string()));
        }
        if self.cluster.status().server_nodes == 0 {
            return Err(Error::Substrate("no server nodes in cluster".to_string()));
        }
        Ok(())
    }
}

/// Port handle that checks node reachability before delegating
struct Guarded<T> {
    inner: Arc<T>,
    node: Arc<NodeState>,
}

#[async_trait]
impl<K: MapKey, V: MapValue> ClusteredMap<K, V> for Guarded<LocalMap<K, V>> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.node.ensure_reachable()?;
        self.inner.get(key).await
    }

    async fn contains_key(&self, key: &K) -> Result<bool> {
        self.node.ensure_reachable()?;
        self.inner.contains_key(key).await
    }

    async fn put(&self, key: K, value: V) -> Result<()> {
        self.node.ensure_reachable()?;
        self.inner.put(key, value).await
    }

    async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<()> {
        self.node.ensure_reachable()?;
        self.inner.put_with_ttl(key, value, ttl).await
    }

    async fn remove(&self, key: &K) -> Result<bool> {
        self.node.ensure_reachable()?;
        self.inner.remove(key).await
    }

    async fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool> {
        self.node.ensure_reachable()?;
        self.inner.remove_if_equals(key, expected).await
    }

    async fn keys(&self) -> Result<Vec<K>> {
        self.node.ensure_reachable()?;
        self.inner.keys().await
    }

    async fn len(&self) -> Result<usize> {
        self.node.ensure_reachable()?;
        self.inner.len().await
    }
}

#[async_trait]
impl AtomicSequence for Guarded<LocalSequence> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn reserve(&self, count: u64) -> Result<Range<u64>> {
        self.node
            .ensure_reachable()
            .map_err(|e| Error::SequenceUnavailable(e.to_string()))?;
        self.inner.reserve(count).await
    }
}

/// One node's connection to a [`LocalCluster`]
pub struct LocalSubstrate {
    node: Arc<NodeState>,
    data: Arc<SharedData>,
}

impl LocalSubstrate {
    fn guard<T>(&self, inner: &Arc<T>) -> Guarded<T> {
        Guarded {
            inner: Arc::clone(inner),
            node: Arc::clone(&self.node),
        }
    }

    /// Statistics of the artifact map
    pub fn artifact_stats(&self) -> MapStats {
        self.data.artifacts.stats()
    }
}

#[async_trait]
impl Substrate for LocalSubstrate {
    fn node_id(&self) -> &str {
        &self.node.id
    }

    fn mode(&self) -> InstanceMode {
        self.node.mode
    }

    fn artifacts(&self) -> Arc<dyn ClusteredMap<CanonicalId, Artifact>> {
        Arc::new(self.guard(&self.data.artifacts))
    }

    fn forward_index(&self) -> Arc<dyn ClusteredMap<String, CanonicalId>> {
        Arc::new(self.guard(&self.data.forward))
    }

    fn reverse_index(&self) -> Arc<dyn ClusteredMap<CanonicalId, KeySet>> {
        Arc::new(self.guard(&self.data.reverse))
    }

    fn sequence(&self) -> Arc<dyn AtomicSequence> {
        Arc::new(self.guard(&self.data.sequence))
    }

    fn subscribe_artifact_events(&self) -> broadcast::Receiver<EntryEvent> {
        self.node.cluster.events.subscribe()
    }

    async fn ping(&self) -> Result<ClusterStatus> {
        self.node.ensure_reachable()?;
        Ok(self.node.cluster.status())
    }

    fn local_node_metrics(&self) -> Result<NodeMetrics> {
        self.node.ensure_reachable()?;
        Ok(NodeMetrics {
            cpu_load: sample_cpu_load(),
            heap_used_bytes: self.data.forward.used_bytes() + self.data.reverse.used_bytes(),
            off_heap_used_bytes: self.data.artifacts.used_bytes(),
        })
    }

    async fn sweep_expired(&self) -> Result<usize> {
        self.node.ensure_reachable()?;
        Ok(self.data.artifacts.sweep())
    }

    async fn shutdown(&self) {
        if !self.node.online.swap(false, Ordering::SeqCst) {
            return;
        }

        let cluster = &self.node.cluster;
        cluster.members.remove(&self.node.id);
        info!(node_id = %self.node.id, "Left local cluster");

        if cluster.status().server_nodes == 0 {
            let data = cluster.data.lock().take();
            if let Some(data) = data {
                data.stop_sweeper().await;
                info!("Last server node left, cluster data released");
            }
        }
    }
}

/// One-minute load average normalized by core count, 0.0 when unavailable
fn sample_cpu_load() -> f64 {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1) as f64;

    std::fs::read_to_string("/proc/loadavg")
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse::<f64>().ok()))
        .map(|load| (load / cores).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

// =============================================================================
// Tests
// =============================================================================
