//! Eviction Cascade
//!
//! Propagates the destruction of an artifact back through both indexes.
//! Subscribed to the artifact store's expired/removed/evicted notifications.
//!
//! # Protocol
//!
//! For a destroyed canonical ID:
//!
//! 1. Read the reverse entry to find the keys written with it
//! 2. Remove each forward entry that still points at the ID
//! 3. Remove the reverse entry
//!
//! Every step is "delete if present", so redelivered or duplicated events
//! are no-ops and a partially applied cleanup can simply be run again.
//!
//! Notifications skipped by a lagging listener are recovered by
//! reconciliation: every reverse entry whose artifact is gone is cleaned up
//! as if its notification had arrived.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::entry::CanonicalId;
use super::index::{ForwardIndex, ReverseIndex};
use super::store::ArtifactStore;
use crate::domain::events::EntryEvent;
use crate::error::{Error, Result};

/// Base delay between cleanup attempts; grows linearly per attempt
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Result of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    /// Forward entries removed
    pub keys_released: usize,
    /// Forward entries left alone because they point at a newer ID
    pub keys_retained: usize,
    /// Whether a reverse entry existed and was removed
    pub reverse_removed: bool,
}

impl CascadeOutcome {
    /// Nothing was left to clean up
    pub fn is_noop(&self) -> bool {
        self.keys_released == 0 && !self.reverse_removed
    }
}

/// Cascade counters
#[derive(Debug, Default)]
pub struct CascadeStats {
    events: AtomicU64,
    keys_released: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
    lagged: AtomicU64,
    reconciled: AtomicU64,
}

/// Point-in-time copy of [`CascadeStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeStatsSnapshot {
    pub events: u64,
    pub keys_released: u64,
    pub retries: u64,
    pub failures: u64,
    pub lagged: u64,
    /// IDs cleaned up by reconciliation rather than by their notification
    pub reconciled: u64,
}

impl CascadeStats {
    pub fn snapshot(&self) -> CascadeStatsSnapshot {
        CascadeStatsSnapshot {
            events: self.events.load(Ordering::Relaxed),
            keys_released: self.keys_released.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            reconciled: self.reconciled.load(Ordering::Relaxed),
        }
    }
}

/// Cleans both indexes after an artifact is destroyed.
pub struct EvictionCascade {
    forward: ForwardIndex,
    reverse: ReverseIndex,
    store: ArtifactStore,
    max_attempts: u32,
    stats: CascadeStats,
}

impl EvictionCascade {
    pub fn new(
        forward: ForwardIndex,
        reverse: ReverseIndex,
        store: ArtifactStore,
        max_attempts: u32,
    ) -> Self {
        Self {
            forward,
            reverse,
            store,
            max_attempts: max_attempts.max(1),
            stats: CascadeStats::default(),
        }
    }

    pub fn stats(&self) -> CascadeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Apply one notification, retrying transient failures.
    #[instrument(skip(self, event), fields(id = %event.id, kind = %event.kind))]
    pub async fn handle_event(&self, event: &EntryEvent) -> Result<CascadeOutcome> {
        self.stats.events.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 1;
        loop {
            match self.reclaim(event.id).await {
                Ok(outcome) => {
                    self.stats
                        .keys_released
                        .fetch_add(outcome.keys_released as u64, Ordering::Relaxed);
                    if outcome.is_noop() {
                        debug!("Nothing to clean up");
                    } else {
                        debug!(
                            released = outcome.keys_released,
                            retained = outcome.keys_retained,
                            "Cascade cleanup completed"
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(attempt, max = self.max_attempts, "Cascade cleanup failed, retrying: {}", e);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(e);
                }
            }
        }
    }

    /// Single cleanup pass for `id`.
    pub async fn reclaim(&self, id: CanonicalId) -> Result<CascadeOutcome> {
        let wrap = |e: Error| Error::Cascade {
            id: id.get(),
            reason: e.to_string(),
        };

        let mut outcome = CascadeOutcome::default();

        let Some(keys) = self.reverse.keys_of(id).await.map_err(wrap)? else {
            return Ok(outcome);
        };

        for key in &keys {
            if self.forward.unbind_if_current(key, id).await.map_err(wrap)? {
                outcome.keys_released += 1;
            } else {
                outcome.keys_retained += 1;
            }
        }

        // Reverse entry goes last so a failed pass can be resumed from it
        outcome.reverse_removed = self.reverse.forget(id).await.map_err(wrap)?;
        Ok(outcome)
    }

    /// Clean up every indexed ID whose artifact no longer exists, returning
    /// how many were reclaimed.
    ///
    /// Safe to run alongside writes: a write stores its artifact before its
    /// reverse entry, so a reverse entry without an artifact is never one
    /// still being written.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize> {
        let ids = self.indexed_ids().await?;
        let scanned = ids.len();

        let mut reclaimed = 0;
        for id in ids {
            match self.store.contains(id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(id = %id, "Could not check artifact during reconciliation: {}", e);
                    continue;
                }
            }

            match self.reclaim(id).await {
                Ok(outcome) => {
                    self.stats
                        .keys_released
                        .fetch_add(outcome.keys_released as u64, Ordering::Relaxed);
                    if outcome.reverse_removed {
                        reclaimed += 1;
                    }
                }
                Err(e) => {
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Reconciliation cleanup failed: {}", e);
                }
            }
        }

        self.stats
            .reconciled
            .fetch_add(reclaimed as u64, Ordering::Relaxed);
        info!(scanned, reclaimed, "Reconciled indexes with the artifact store");
        Ok(reclaimed)
    }

    /// Reverse index scan, retried like a cleanup step
    async fn indexed_ids(&self) -> Result<Vec<CanonicalId>> {
        let mut attempt = 1;
        loop {
            match self.reverse.ids().await {
                Ok(ids) => return Ok(ids),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(attempt, "Reverse index scan failed, retrying: {}", e);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Start consuming notifications on a background task.
    pub fn spawn(self: Arc<Self>, mut events: broadcast::Receiver<EntryEvent>) -> CascadeHandle {
        let token = CancellationToken::new();
        let child = token.clone();
        let cascade = Arc::clone(&self);

        let task = tokio::spawn(async move {
            info!("Eviction cascade listener started");

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            if let Err(e) = cascade.handle_event(&event).await {
                                error!(id = %event.id, kind = %event.kind, "Cascade cleanup abandoned: {}", e);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            cascade.stats.lagged.fetch_add(skipped, Ordering::Relaxed);
                            warn!(skipped, "Cascade listener lagged, reconciling indexes");
                            if let Err(e) = cascade.reconcile().await {
                                error!("Index reconciliation abandoned: {}", e);
                            }
                        }
                        Err(RecvError::Closed) => {
                            debug!("Notification channel closed");
                            break;
                        }
                    },
                }
            }

            info!("Eviction cascade listener stopped");
        });

        CascadeHandle {
            cascade: self,
            token,
            task,
        }
    }
}

impl std::fmt::Debug for EvictionCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionCascade")
            .field("max_attempts", &self.max_attempts)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Running cascade listener
pub struct CascadeHandle {
    cascade: Arc<EvictionCascade>,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl CascadeHandle {
    pub fn cascade(&self) -> &Arc<EvictionCascade> {
        &self.cascade
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the listener and wait for the in-flight event to finish
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!("Cascade listener terminated abnormally: {}", e);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::LocalMap;
    use crate::cache::KeySet;
    use crate::cache::Artifact;
    use crate::cluster::{ARTIFACTS_MAP, KEYS_MAP, KEYS_REVERSE_MAP};
    use crate::domain::ports::ClusteredMap;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn indexes() -> (ForwardIndex, ReverseIndex) {
        (
            ForwardIndex::new(Arc::new(LocalMap::unbounded(KEYS_MAP))),
            ReverseIndex::new(Arc::new(LocalMap::unbounded(KEYS_REVERSE_MAP))),
        )
    }

    fn store() -> ArtifactStore {
        ArtifactStore::new(Arc::new(LocalMap::unbounded(ARTIFACTS_MAP)))
    }

    async fn seed(forward: &ForwardIndex, reverse: &ReverseIndex, id: u64, keys: &[&str]) {
        let keys = KeySet::from_keys(keys.iter().copied());
        forward.bind_all(&keys, CanonicalId::new(id)).await.unwrap();
        reverse.record(CanonicalId::new(id), keys).await.unwrap();
    }

    /// Forward map whose conditional removals fail a fixed number of times
    struct FlakyForward {
        inner: LocalMap<String, CanonicalId>,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ClusteredMap<String, CanonicalId> for FlakyForward {
        fn name(&self) -> &str {
            self.inner.name()
        }
        async fn get(&self, key: &String) -> Result<Option<CanonicalId>> {
            self.inner.get(key).await
        }
        async fn contains_key(&self, key: &String) -> Result<bool> {
            self.inner.contains_key(key).await
        }
        async fn put(&self, key: String, value: CanonicalId) -> Result<()> {
            self.inner.put(key, value).await
        }
        async fn put_with_ttl(&self, key: String, value: CanonicalId, ttl: Duration) -> Result<()> {
            self.inner.put_with_ttl(key, value, ttl).await
        }
        async fn remove(&self, key: &String) -> Result<bool> {
            self.inner.remove(key).await
        }
        async fn remove_if_equals(&self, key: &String, expected: &CanonicalId) -> Result<bool> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Substrate("primary partition moved".to_string()));
            }
            self.inner.remove_if_equals(key, expected).await
        }
        async fn keys(&self) -> Result<Vec<String>> {
            self.inner.keys().await
        }
        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }
    }

    fn flaky_cascade(failures: u32, max_attempts: u32) -> (EvictionCascade, ForwardIndex, ReverseIndex) {
        let forward = ForwardIndex::new(Arc::new(FlakyForward {
            inner: LocalMap::unbounded(KEYS_MAP),
            failures_left: AtomicU32::new(failures),
        }));
        let reverse = ReverseIndex::new(Arc::new(LocalMap::unbounded(KEYS_REVERSE_MAP)));
        (
            EvictionCascade::new(forward.clone(), reverse.clone(), store(), max_attempts),
            forward,
            reverse,
        )
    }

    #[tokio::test]
    async fn test_cleans_both_indexes() {
        let (forward, reverse) = indexes();
        seed(&forward, &reverse, 1, &["a", "b", "c"]).await;
        let cascade = EvictionCascade::new(forward.clone(), reverse.clone(), store(), 3);

        let outcome = cascade
            .handle_event(&EntryEvent::expired(CanonicalId::new(1)))
            .await
            .unwrap();

        assert_eq!(outcome.keys_released, 3);
        assert!(outcome.reverse_removed);
        assert_eq!(forward.len().await.unwrap(), 0);
        assert_eq!(reverse.keys_of(CanonicalId::new(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_noop() {
        let (forward, reverse) = indexes();
        seed(&forward, &reverse, 1, &["a"]).await;
        seed(&forward, &reverse, 2, &["z"]).await;
        let cascade = EvictionCascade::new(forward.clone(), reverse.clone(), store(), 3);
        let event = EntryEvent::evicted(CanonicalId::new(1));

        cascade.handle_event(&event).await.unwrap();
        let second = cascade.handle_event(&event).await.unwrap();

        assert!(second.is_noop());
        assert_eq!(forward.resolve("z").await.unwrap(), Some(CanonicalId::new(2)));
        assert_eq!(forward.len().await.unwrap(), 1);
        assert_eq!(reverse.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repointed_key_survives() {
        let (forward, reverse) = indexes();
        seed(&forward, &reverse, 1, &["k1", "k2"]).await;
        seed(&forward, &reverse, 2, &["k1"]).await;
        let cascade = EvictionCascade::new(forward.clone(), reverse.clone(), store(), 3);

        let outcome = cascade
            .handle_event(&EntryEvent::removed(CanonicalId::new(1)))
            .await
            .unwrap();

        assert_eq!(outcome.keys_released, 1);
        assert_eq!(outcome.keys_retained, 1);
        assert_eq!(forward.resolve("k1").await.unwrap(), Some(CanonicalId::new(2)));
        assert_eq!(forward.resolve("k2").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let (cascade, forward, reverse) = flaky_cascade(2, 3);
        seed(&forward, &reverse, 7, &["a", "b"]).await;

        let outcome = cascade
            .handle_event(&EntryEvent::expired(CanonicalId::new(7)))
            .await
            .unwrap();

        assert_eq!(outcome.keys_released, 2);
        assert_eq!(forward.len().await.unwrap(), 0);
        assert_eq!(cascade.stats().retries, 2);
        assert_eq!(cascade.stats().failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_leave_resumable_state() {
        let (cascade, forward, reverse) = flaky_cascade(5, 2);
        seed(&forward, &reverse, 7, &["a"]).await;
        let event = EntryEvent::expired(CanonicalId::new(7));

        assert_matches!(
            cascade.handle_event(&event).await,
            Err(Error::Cascade { id: 7, .. })
        );
        // Reverse entry kept so redelivery can finish the job
        assert!(reverse.keys_of(CanonicalId::new(7)).await.unwrap().is_some());
        assert_eq!(cascade.stats().failures, 1);

        // Three more failures are consumed by the next two deliveries
        assert!(cascade.handle_event(&event).await.is_err());
        let outcome = cascade.handle_event(&event).await.unwrap();
        assert_eq!(outcome.keys_released, 1);
        assert!(reverse.keys_of(CanonicalId::new(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listener_consumes_channel_until_stopped() {
        let (forward, reverse) = indexes();
        seed(&forward, &reverse, 1, &["a", "b"]).await;
        let cascade = Arc::new(EvictionCascade::new(forward.clone(), reverse.clone(), store(), 3));

        let (tx, rx) = broadcast::channel(16);
        let handle = Arc::clone(&cascade).spawn(rx);
        assert!(handle.is_running());

        tx.send(EntryEvent::evicted(CanonicalId::new(1))).unwrap();
        tx.send(EntryEvent::evicted(CanonicalId::new(1))).unwrap();

        for _ in 0..100 {
            if cascade.stats().events == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(cascade.stats().events, 2);
        assert_eq!(forward.len().await.unwrap(), 0);
        handle.stop().await;
    }
    #[tokio::test]
    async fn test_reconcile_reclaims_ids_without_artifact() {
        let (forward, reverse) = indexes();
        let artifacts = store();
        seed(&forward, &reverse, 1, &["a", "b"]).await;
        seed(&forward, &reverse, 2, &["c"]).await;
        artifacts
            .store(CanonicalId::new(2), Artifact::from(vec![2]), None)
            .await
            .unwrap();
        let cascade = EvictionCascade::new(forward.clone(), reverse.clone(), artifacts, 3);

        assert_eq!(cascade.reconcile().await.unwrap(), 1);
        assert_eq!(forward.resolve("a").await.unwrap(), None);
        assert_eq!(forward.resolve("b").await.unwrap(), None);
        assert_eq!(forward.resolve("c").await.unwrap(), Some(CanonicalId::new(2)));
        assert_eq!(reverse.ids().await.unwrap(), vec![CanonicalId::new(2)]);

        assert_eq!(cascade.reconcile().await.unwrap(), 0);
        assert_eq!(cascade.stats().reconciled, 1);
        assert_eq!(cascade.stats().keys_released, 2);
    }

    #[tokio::test]
    async fn test_lagged_listener_recovers_skipped_notifications() {
        let (forward, reverse) = indexes();
        for id in 1..=5 {
            let key = format!("key-{}", id);
            seed(&forward, &reverse, id, &[key.as_str()]).await;
        }
        let cascade = Arc::new(EvictionCascade::new(forward.clone(), reverse.clone(), store(), 3));

        // Capacity 2 with 5 queued notifications: the listener skips 3
        let (tx, rx) = broadcast::channel(2);
        for id in 1..=5 {
            tx.send(EntryEvent::expired(CanonicalId::new(id))).unwrap();
        }
        let handle = Arc::clone(&cascade).spawn(rx);

        for _ in 0..100 {
            if cascade.stats().events == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let stats = cascade.stats();
        assert_eq!(stats.lagged, 3);
        assert_eq!(stats.reconciled, 5);
        assert_eq!(stats.events, 2);
        assert_eq!(forward.len().await.unwrap(), 0);
        assert_eq!(reverse.len().await.unwrap(), 0);
        handle.stop().await;
    }
}
