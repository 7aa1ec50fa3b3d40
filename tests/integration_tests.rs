//! Buildcache Integration Tests
//!
//! End-to-end behavior of the cache service on an in-process cluster:
//! - Multi-key aliasing and canonical ID allocation
//! - Eviction cascade consistency and idempotence
//! - Time-to-live overrides and counts
//! - Degraded DNS discovery
//! - Service lifecycle and metrics reporting

use std::sync::Arc;
use std::time::Duration;

use buildcache::adapters::{LocalCluster, RecordingSink};
use buildcache::cluster::{CacheConfig, ClusterTopology, InstanceMode, RetainingResolver};
use buildcache::domain::ports::{DnsLookup, Substrate, SubstrateConnector};
use buildcache::{Artifact, CacheService, CanonicalId, Error, KeySet, TimeUnit};

// =============================================================================
// Helpers
// =============================================================================

mod support {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// DNS lookup replaying scripted answers, failing once they run out
    #[derive(Default)]
    pub struct ScriptedDns {
        answers: Mutex<VecDeque<buildcache::Result<Vec<String>>>>,
    }

    impl ScriptedDns {
        pub fn new(answers: Vec<buildcache::Result<Vec<String>>>) -> Self {
            Self {
                answers: Mutex::new(answers.into()),
            }
        }
    }

    #[async_trait]
    impl DnsLookup for ScriptedDns {
        async fn resolve(&self, name: &str) -> buildcache::Result<Vec<String>> {
            self.answers
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(Error::Internal(format!("{} timed out", name))))
        }
    }

    pub fn resolver() -> Arc<RetainingResolver> {
        Arc::new(RetainingResolver::new(Arc::new(ScriptedDns::default())))
    }

    pub fn service(cluster: &LocalCluster) -> CacheService {
        service_with_sink(cluster, Arc::new(RecordingSink::new()))
    }

    pub fn service_with_sink(cluster: &LocalCluster, sink: Arc<RecordingSink>) -> CacheService {
        CacheService::new(Arc::new(cluster.clone()), resolver(), sink)
    }

    pub async fn server(cluster: &LocalCluster, config: &CacheConfig) -> CacheService {
        let service = service(cluster);
        service.init(config, InstanceMode::Server).await.unwrap();
        service
    }

    /// Raw client connection for poking at the clustered maps directly
    pub async fn raw_substrate(cluster: &LocalCluster, config: &CacheConfig) -> Arc<dyn Substrate> {
        let topology = ClusterTopology::from_config(config, &resolver()).await.unwrap();
        cluster.connect(&topology, InstanceMode::Client).await.unwrap()
    }

    pub fn artifact(fill: u8, len: usize) -> Artifact {
        Artifact::from(vec![fill; len])
    }

    /// Poll until the cascade has caught up with `key` disappearing
    pub async fn until_gone(service: &CacheService, key: &str) {
        for _ in 0..200 {
            if service.resolve(key).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("key {} still indexed", key);
    }

    /// Poll until the reverse entry of `id` is gone
    pub async fn until_reclaimed(service: &CacheService, id: CanonicalId) {
        for _ in 0..200 {
            if service.keys_of(id).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("artifact {} still has a reverse entry", id);
    }
}

use support::*;

// =============================================================================
// Aliasing and Allocation
// =============================================================================

mod aliasing_tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_all_keys_resolve_to_same_artifact() {
        let service = server(&LocalCluster::new(), &CacheConfig::default()).await;
        let data = artifact(7, 256);

        service
            .put_data(["rule-key-1", "rule-key-2", "input-hash"], data.clone())
            .await
            .unwrap();

        for key in ["rule-key-1", "rule-key-2", "input-hash"] {
            assert_eq!(service.get_data(key).await.unwrap(), Some(data.clone()));
        }
        assert_eq!(service.number_of_values().await.unwrap(), 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let service = server(&LocalCluster::new(), &CacheConfig::default()).await;
        assert_eq!(service.get_data("never-written").await.unwrap(), None);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_concurrent_disjoint_puts_never_collide() {
        let service = Arc::new(server(&LocalCluster::new(), &CacheConfig::default()).await);

        let puts = (0..64).map(|i| {
            let service = Arc::clone(&service);
            async move {
                service
                    .put_data([format!("key-{}", i)], artifact(i as u8, 16))
                    .await
                    .unwrap()
            }
        });
        let ids: Vec<CanonicalId> = futures::future::join_all(puts).await;

        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), 64);
        for i in 0..64u8 {
            assert_eq!(
                service.get_data(&format!("key-{}", i)).await.unwrap(),
                Some(artifact(i, 16))
            );
        }
        service.stop().await;
    }

    #[tokio::test]
    async fn test_nodes_share_the_id_sequence() {
        let cluster = LocalCluster::new();
        let config = CacheConfig {
            atomic_sequence_reserve_size: 5,
            ..Default::default()
        };
        let first = server(&cluster, &config).await;
        let second = server(&cluster, &config).await;

        let mut ids = HashSet::new();
        for i in 0..20 {
            let node = if i % 2 == 0 { &first } else { &second };
            let id = node
                .put_data([format!("k{}", i)], artifact(1, 4))
                .await
                .unwrap();
            assert!(ids.insert(id));
        }

        // Either node sees what the other wrote
        assert_eq!(second.get_data("k0").await.unwrap(), Some(artifact(1, 4)));
        second.stop().await;
        first.stop().await;
    }
}

// =============================================================================
// Eviction Cascade
// =============================================================================

mod cascade_tests {
    use super::*;
    use buildcache::cache::{ArtifactStore, EvictionCascade, ForwardIndex, ReverseIndex};
    use buildcache::domain::events::EntryEvent;

    #[tokio::test]
    async fn test_removed_artifact_clears_both_indexes() {
        let cluster = LocalCluster::new();
        let config = CacheConfig::default();
        let service = server(&cluster, &config).await;
        let substrate = raw_substrate(&cluster, &config).await;

        let id = service
            .put_data(["a", "b"], artifact(1, 32))
            .await
            .unwrap();
        let keep = service.put_data(["c"], artifact(2, 32)).await.unwrap();

        assert!(substrate.artifacts().remove(&id).await.unwrap());
        until_gone(&service, "a").await;
        until_gone(&service, "b").await;
        until_reclaimed(&service, id).await;

        assert_eq!(service.get_data("a").await.unwrap(), None);
        assert_eq!(service.get_data("b").await.unwrap(), None);
        assert_eq!(service.keys_of(id).await.unwrap(), None);
        assert_eq!(service.resolve("c").await.unwrap(), Some(keep));

        substrate.shutdown().await;
        service.stop().await;
    }

    #[tokio::test]
    async fn test_capacity_eviction_cascades() {
        let cluster = LocalCluster::new();
        let config = CacheConfig {
            off_heap_max_size: "1k".to_string(),
            ..Default::default()
        };
        let service = server(&cluster, &config).await;

        let oldest = service
            .put_data(["old-1", "old-2"], artifact(1, 600))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        service.put_data(["new"], artifact(2, 600)).await.unwrap();

        until_gone(&service, "old-1").await;
        until_gone(&service, "old-2").await;
        until_reclaimed(&service, oldest).await;

        assert_eq!(service.keys_of(oldest).await.unwrap(), None);
        assert_eq!(service.get_data("new").await.unwrap(), Some(artifact(2, 600)));
        assert_eq!(service.number_of_values().await.unwrap(), 1);
        assert_eq!(service.number_of_keys().await.unwrap(), 1);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_event_matches_single_delivery() {
        let cluster = LocalCluster::new();
        let config = CacheConfig::default();
        let service = server(&cluster, &config).await;
        let substrate = raw_substrate(&cluster, &config).await;

        let gone = service.put_data(["x", "y"], artifact(1, 8)).await.unwrap();
        let kept = service.put_data(["z"], artifact(2, 8)).await.unwrap();

        let cascade = EvictionCascade::new(
            ForwardIndex::new(substrate.forward_index()),
            ReverseIndex::new(substrate.reverse_index()),
            ArtifactStore::new(substrate.artifacts()),
            3,
        );
        let event = EntryEvent::expired(gone);

        let first = cascade.handle_event(&event).await.unwrap();
        let keys_after_first = service.number_of_keys().await.unwrap();
        let second = cascade.handle_event(&event).await.unwrap();

        assert_eq!(first.keys_released, 2);
        assert!(second.is_noop());
        assert_eq!(service.number_of_keys().await.unwrap(), keys_after_first);
        assert_eq!(service.resolve("z").await.unwrap(), Some(kept));

        substrate.shutdown().await;
        service.stop().await;
    }

    #[tokio::test]
    async fn test_cascade_spares_repointed_key() {
        let cluster = LocalCluster::new();
        let config = CacheConfig::default();
        let service = server(&cluster, &config).await;
        let substrate = raw_substrate(&cluster, &config).await;

        let old = service.put_data(["k1", "k2"], artifact(1, 8)).await.unwrap();
        service.put_data(["k1"], artifact(2, 8)).await.unwrap();

        substrate.artifacts().remove(&old).await.unwrap();
        until_gone(&service, "k2").await;

        assert_eq!(service.get_data("k1").await.unwrap(), Some(artifact(2, 8)));
        substrate.shutdown().await;
        service.stop().await;
    }
}

// =============================================================================
// Time-to-live
// =============================================================================

mod ttl_tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_override_expires_all_keys() {
        let service = server(&LocalCluster::new(), &CacheConfig::default()).await;

        service
            .put_data_with_ttl(["t1", "t2"], artifact(1, 8), TimeUnit::Seconds, 1)
            .await
            .unwrap();
        service.put_data(["d"], artifact(2, 8)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        service.sweep_expired().await.unwrap();

        until_gone(&service, "t1").await;
        until_gone(&service, "t2").await;
        assert_eq!(service.get_data("t1").await.unwrap(), None);
        assert_eq!(service.get_data("t2").await.unwrap(), None);

        // Default TTL is seven days
        assert_eq!(service.get_data("d").await.unwrap(), Some(artifact(2, 8)));
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_ttl_from_config() {
        let config = CacheConfig {
            expiration_time_unit: TimeUnit::Seconds,
            expiration_time_value: 30,
            ..Default::default()
        };
        let service = server(&LocalCluster::new(), &config).await;
        service.put_data(["k"], artifact(1, 8)).await.unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(service.get_data("k").await.unwrap().is_some());

        // Each read pushes expiry another 30s out
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(service.get_data("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        service.sweep_expired().await.unwrap();
        until_gone(&service, "k").await;
        assert_eq!(service.number_of_values().await.unwrap(), 0);
        service.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mass_expiry_clears_every_key() {
        let service = server(&LocalCluster::new(), &CacheConfig::default()).await;

        // More artifacts than the notification channel buffers
        for n in 0..5000 {
            service
                .put_data_with_ttl([format!("rule-{}", n)], artifact(1, 8), TimeUnit::Seconds, 1)
                .await
                .unwrap();
        }
        assert_eq!(service.number_of_keys().await.unwrap(), 5000);

        tokio::time::sleep(Duration::from_secs(2)).await;
        service.sweep_expired().await.unwrap();
        assert_eq!(service.number_of_values().await.unwrap(), 0);

        for _ in 0..500 {
            if service.number_of_keys().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(service.number_of_keys().await.unwrap(), 0);
        assert_eq!(service.get_data("rule-4999").await.unwrap(), None);
        let stats = service.cascade_stats().unwrap();
        assert!(stats.lagged > 0);
        assert!(stats.reconciled > 0);
        service.stop().await;
    }
}

// =============================================================================
// Counts
// =============================================================================

mod count_tests {
    use super::*;

    #[tokio::test]
    async fn test_keys_and_values_diverge_for_aliases() {
        let service = server(&LocalCluster::new(), &CacheConfig::default()).await;

        service
            .put_data(["a", "b", "c"], artifact(1, 8))
            .await
            .unwrap();
        assert_eq!(service.number_of_keys().await.unwrap(), 3);
        assert_eq!(service.number_of_values().await.unwrap(), 1);

        service.put_data(["d"], artifact(2, 8)).await.unwrap();
        assert_eq!(service.number_of_keys().await.unwrap(), 4);
        assert_eq!(service.number_of_values().await.unwrap(), 2);
        service.stop().await;
    }
}

// =============================================================================
// Discovery
// =============================================================================

mod discovery_tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_lookup_keeps_last_good_hosts() {
        let resolver = RetainingResolver::new(Arc::new(ScriptedDns::new(vec![Ok(vec![
            "10.1.0.1".to_string(),
            "10.1.0.2".to_string(),
        ])])));
        let config = CacheConfig {
            static_hosts: vec!["10.0.0.1".to_string(), "10.1.0.2".to_string()],
            dns_lookup_address: Some("cache.service.internal".to_string()),
            ..Default::default()
        };

        let first = ClusterTopology::from_config(&config, &resolver).await.unwrap();
        let second = ClusterTopology::from_config(&config, &resolver).await.unwrap();

        let expected = vec!["10.0.0.1", "10.1.0.2", "10.1.0.1"];
        assert_eq!(first.discovery().addresses, expected);
        assert_eq!(second.discovery().addresses, expected);
    }

    #[tokio::test]
    async fn test_failed_lookup_without_history_uses_static_hosts() {
        let config = CacheConfig {
            static_hosts: vec!["10.0.0.1".to_string()],
            dns_lookup_address: Some("cache.service.internal".to_string()),
            ..Default::default()
        };

        let topology = ClusterTopology::from_config(&config, &resolver()).await.unwrap();
        assert_eq!(topology.discovery().addresses, vec!["10.0.0.1"]);
    }

    #[tokio::test]
    async fn test_degraded_dns_does_not_block_init() {
        let service = server(
            &LocalCluster::new(),
            &CacheConfig {
                dns_lookup_address: Some("unresolvable.internal".to_string()),
                ..Default::default()
            },
        )
        .await;
        assert!(service.check().await.is_healthy());
        service.stop().await;
    }
}

// =============================================================================
// Stale Alias Gap
// =============================================================================

mod stale_alias_tests {
    use super::*;

    #[tokio::test]
    async fn test_rewritten_key_stays_in_old_reverse_entry() {
        let service = server(&LocalCluster::new(), &CacheConfig::default()).await;

        let old = service
            .put_data(["k1", "k2"], artifact(1, 8))
            .await
            .unwrap();
        let new = service.put_data(["k1"], artifact(2, 8)).await.unwrap();

        assert_eq!(service.get_data("k1").await.unwrap(), Some(artifact(2, 8)));
        assert_eq!(service.resolve("k1").await.unwrap(), Some(new));

        // The old reverse entry still lists k1 until the old artifact goes
        let stale = service.keys_of(old).await.unwrap().unwrap();
        assert_eq!(stale, KeySet::from_keys(["k1", "k2"]));
        assert!(service.keys_of(new).await.unwrap().unwrap().contains("k1"));
        service.stop().await;
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

mod lifecycle_tests {
    use super::*;
    use buildcache::monitoring::{CPU_COUNT, HEAP_COUNT, OFF_HEAP_COUNT};
    use buildcache::HealthStatus;

    #[tokio::test]
    async fn test_client_node_routes_to_server() {
        let cluster = LocalCluster::new();
        let server = server(&cluster, &CacheConfig::default()).await;

        let client = service(&cluster);
        client
            .init(&CacheConfig::default(), InstanceMode::Client)
            .await
            .unwrap();

        client.put_data(["via-client"], artifact(3, 8)).await.unwrap();
        assert_eq!(
            server.get_data("via-client").await.unwrap(),
            Some(artifact(3, 8))
        );
        assert_eq!(client.mode(), Some(InstanceMode::Client));

        client.stop().await;
        server.stop().await;
    }

    #[tokio::test]
    async fn test_client_without_server_fails_startup() {
        let client = service(&LocalCluster::new());
        let result = client
            .init(&CacheConfig::default(), InstanceMode::Client)
            .await;
        assert!(matches!(result, Err(Error::Startup(_))));
        assert_eq!(client.check().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_emits_each_period_until_stopped() {
        let sink = Arc::new(RecordingSink::new());
        let cluster = LocalCluster::new();
        let service = service_with_sink(&cluster, sink.clone());
        service
            .init(&CacheConfig::default(), InstanceMode::Server)
            .await
            .unwrap();
        service.put_data(["k"], artifact(0, 1000)).await.unwrap();
        service.start().unwrap();

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(sink.reports(CPU_COUNT), 3);
        assert_eq!(sink.reports(HEAP_COUNT), 3);
        assert!(sink.latest()[OFF_HEAP_COUNT] >= 1000);

        service.stop().await;
        assert!(sink.is_closed());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sink.reports(CPU_COUNT), 3);
    }

    #[tokio::test]
    async fn test_unreachable_cluster_reports_unhealthy_without_error() {
        let cluster = LocalCluster::new();
        let service = server(&cluster, &CacheConfig::default()).await;

        cluster.set_reachable(false);
        let health = service.check().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(!health.message.is_empty());

        let write = service.put_data(["k"], artifact(1, 1)).await;
        assert!(matches!(write, Err(Error::Write(_))));

        cluster.set_reachable(true);
        tokio_test::assert_ok!(service.put_data(["k"], artifact(1, 1)).await);
        service.stop().await;
    }
}
