//! Domain Ports (Port/Adapter Pattern)
//!
//! Capabilities the cache core needs from the distributed map substrate and
//! from the outside world. Adapters implement these traits; the core only
//! talks to the traits, so the cascade protocol can be exercised against the
//! local substrate without a real cluster.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Cache Core                            │
//! │  Allocator │ ArtifactStore │ Forward/Reverse │ Cascade      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Ports (Traits)                          │
//! │  ClusteredMap │ AtomicSequence │ Substrate │ MetricsSink    │
//! │  SubstrateConnector │ DnsLookup                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Adapters (Impls)                         │
//! │  LocalSubstrate │ PrometheusSink │ SystemDnsLookup          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::events::EntryEvent;
use crate::cache::{Artifact, CanonicalId, KeySet};
use crate::cluster::{ClusterTopology, InstanceMode};
use crate::error::Result;

// =============================================================================
// Clustered Map Port
// =============================================================================

/// A partitioned, replicated mapping provided by the substrate.
///
/// Every method is atomic for the single entry it touches and nothing more.
/// Deletions are "delete if present": removing an absent key is not an error.
#[async_trait]
pub trait ClusteredMap<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    /// Map name within the cluster
    fn name(&self) -> &str;

    /// Read an entry. Touches the entry's expiry timer when one applies.
    async fn get(&self, key: &K) -> Result<Option<V>>;

    /// Whether a live entry exists. Does not touch the expiry timer.
    async fn contains_key(&self, key: &K) -> Result<bool>;

    /// Write an entry under the map's default expiry policy.
    async fn put(&self, key: K, value: V) -> Result<()>;

    /// Write an entry with an expiry overriding the default for this entry.
    async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<()>;

    /// Delete an entry. Returns whether one was present.
    async fn remove(&self, key: &K) -> Result<bool>;

    /// Delete an entry only if it currently equals `expected`.
    async fn remove_if_equals(&self, key: &K, expected: &V) -> Result<bool>;

    /// Keys of every live entry. A full scan; meant for reconciliation, not
    /// the request path.
    async fn keys(&self) -> Result<Vec<K>>;

    /// Number of live entries.
    async fn len(&self) -> Result<usize>;
}

// =============================================================================
// Sequence Port
// =============================================================================

/// Cluster-wide monotonic sequence.
#[async_trait]
pub trait AtomicSequence: Send + Sync {
    /// Sequence name within the cluster
    fn name(&self) -> &str;

    /// Reserve `count` consecutive values, returned as a half-open range.
    ///
    /// Ranges handed to different callers never overlap and each starts
    /// after every range reserved before it.
    async fn reserve(&self, count: u64) -> Result<Range<u64>>;
}

// =============================================================================
// Substrate Port
// =============================================================================

/// Resource usage of the local cluster node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    /// CPU load in the range 0.0 - 1.0
    pub cpu_load: f64,
    /// In-memory (heap) bytes in use
    pub heap_used_bytes: u64,
    /// Off-heap bytes in use
    pub off_heap_used_bytes: u64,
}

/// Cluster membership as seen from the local node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// Members holding a data partition
    pub server_nodes: usize,
    /// Members routing requests only
    pub client_nodes: usize,
}

/// A live connection to the distributed map substrate.
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Identifier of the local node
    fn node_id(&self) -> &str;

    /// Whether this node holds a partition
    fn mode(&self) -> InstanceMode;

    /// Canonical ID -> artifact bytes
    fn artifacts(&self) -> Arc<dyn ClusteredMap<CanonicalId, Artifact>>;

    /// External key -> canonical ID
    fn forward_index(&self) -> Arc<dyn ClusteredMap<String, CanonicalId>>;

    /// Canonical ID -> keys resolving to it
    fn reverse_index(&self) -> Arc<dyn ClusteredMap<CanonicalId, KeySet>>;

    /// Sequence backing canonical ID allocation
    fn sequence(&self) -> Arc<dyn AtomicSequence>;

    /// Subscribe to expired/removed/evicted notifications of the artifact map
    fn subscribe_artifact_events(&self) -> broadcast::Receiver<EntryEvent>;

    /// Round-trip to the cluster, returning its membership
    async fn ping(&self) -> Result<ClusterStatus>;

    /// Sample local node resource usage
    fn local_node_metrics(&self) -> Result<NodeMetrics>;

    /// Expire every entry whose time-to-live has elapsed, returning how many
    async fn sweep_expired(&self) -> Result<usize>;

    /// Leave the cluster. Further calls fail.
    async fn shutdown(&self);
}

// Test-only: lets `assert_matches!` format `Result<Arc<dyn Substrate>>`.
#[cfg(test)]
impl std::fmt::Debug for dyn Substrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Substrate")
            .field("node_id", &self.node_id())
            .finish()
    }
}

/// Establishes substrate connections from a cluster topology.
#[async_trait]
pub trait SubstrateConnector: Send + Sync {
    async fn connect(
        &self,
        topology: &ClusterTopology,
        mode: InstanceMode,
    ) -> Result<Arc<dyn Substrate>>;
}

// =============================================================================
// Metrics Sink Port
// =============================================================================

/// External metrics sink receiving named counters.
pub trait MetricsSink: Send + Sync {
    /// Add `value` to the counter `name`
    fn count(&self, name: &str, value: u64);

    /// Flush and release the sink
    fn close(&self) {}
}

// =============================================================================
// DNS Port
// =============================================================================

/// Resolves a service-discovery name into peer addresses.
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<Vec<String>>;
}

// =============================================================================
// Tests
// =============================================================================
