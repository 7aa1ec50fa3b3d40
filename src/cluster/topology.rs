//! Cluster Topology Builder
//!
//! Assembles discovery, partitioning, capacity, expiry and sequence settings
//! into one immutable [`ClusterTopology`] consumed by the substrate connector.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::config::{CacheConfig, CacheMode};
use super::discovery::RetainingResolver;
use super::size::parse_size;
use super::{ARTIFACTS_MAP, KEYS_MAP, KEYS_REVERSE_MAP, SEQUENCE_NAME};
use crate::error::{Error, Result};

// =============================================================================
// Topology
// =============================================================================

/// Peer discovery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoverySettings {
    /// Multicast group for local-network discovery
    pub multicast_group: String,
    /// Multicast port
    pub multicast_port: u16,
    /// Static hosts merged with DNS-resolved hosts, without duplicates
    pub addresses: Vec<String>,
}

/// Settings of one clustered map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MapSettings {
    /// Map name
    pub name: String,
    /// Partitioning mode
    pub mode: CacheMode,
    /// Redundant copies per partition
    pub backups: u32,
    /// Byte ceiling; exceeding it evicts least recently touched entries
    pub off_heap_max_bytes: Option<u64>,
    /// Touch-based time-to-live applied to every write without an override
    pub default_ttl: Option<Duration>,
    /// Whether per-map statistics are collected
    pub statistics_enabled: bool,
}

/// Cluster-wide sequence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SequenceSettings {
    /// Sequence name
    pub name: String,
    /// IDs reserved per round-trip
    pub reserve_size: u64,
}

/// Immutable substrate configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterTopology {
    discovery: DiscoverySettings,
    maps: Vec<MapSettings>,
    sequence: SequenceSettings,
    sweep_interval: Duration,
}

impl ClusterTopology {
    pub fn discovery(&self) -> &DiscoverySettings {
        &self.discovery
    }

    pub fn maps(&self) -> &[MapSettings] {
        &self.maps
    }

    /// Settings of the named map
    pub fn map(&self, name: &str) -> Option<&MapSettings> {
        self.maps.iter().find(|m| m.name == name)
    }

    pub fn sequence(&self) -> &SequenceSettings {
        &self.sequence
    }

    /// Interval of the substrate's expiry sweeper
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Build the topology described by a service configuration
    pub async fn from_config(config: &CacheConfig, resolver: &RetainingResolver) -> Result<Self> {
        config.validate()?;

        let dns_lookup = config
            .dns_lookup_address
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .map(str::trim);

        TopologyBuilder::new()
            .multicast_discovery(
                &config.multicast_address,
                config.multicast_port,
                &config.static_hosts,
                dns_lookup,
                resolver,
            )
            .await
            .artifact_map(
                config.cache_mode,
                config.backup_count,
                config.default_ttl(),
                &config.off_heap_max_size,
            )?
            .index_map(KEYS_MAP, config.cache_mode, config.backup_count)
            .index_map(KEYS_REVERSE_MAP, config.cache_mode, config.backup_count)
            .sequence_reserve(config.atomic_sequence_reserve_size)
            .sweep_interval(config.sweep_interval())
            .build()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Step-wise builder for [`ClusterTopology`]
#[derive(Debug, Default)]
pub struct TopologyBuilder {
    discovery: Option<DiscoverySettings>,
    maps: Vec<MapSettings>,
    sequence: Option<SequenceSettings>,
    sweep_interval: Option<Duration>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure multicast discovery, merging DNS-resolved peers into the
    /// static host list. DNS failures fall back to the resolver's last good
    /// answer and never fail the build.
    pub async fn multicast_discovery(
        mut self,
        multicast_group: &str,
        multicast_port: u16,
        static_hosts: &[String],
        dns_lookup: Option<&str>,
        resolver: &RetainingResolver,
    ) -> Self {
        let mut addresses: Vec<String> = Vec::new();
        let mut push = |addr: String| {
            if !addresses.contains(&addr) {
                addresses.push(addr);
            }
        };

        static_hosts.iter().cloned().for_each(&mut push);

        if let Some(name) = dns_lookup {
            resolver.resolve(name).await.into_iter().for_each(&mut push);
        }

        debug!(
            group = %multicast_group,
            port = multicast_port,
            addresses = ?addresses,
            "Configured multicast discovery"
        );

        self.discovery = Some(DiscoverySettings {
            multicast_group: multicast_group.to_string(),
            multicast_port,
            addresses,
        });
        self
    }

    /// Configure the artifact store map
    pub fn artifact_map(
        mut self,
        mode: CacheMode,
        backups: u32,
        default_ttl: Duration,
        off_heap_max_size: &str,
    ) -> Result<Self> {
        let off_heap_max_bytes = parse_size(off_heap_max_size)?;
        if default_ttl.is_zero() {
            return Err(Error::Config(
                "artifact time-to-live must be greater than 0".to_string(),
            ));
        }

        self.maps.push(MapSettings {
            name: ARTIFACTS_MAP.to_string(),
            mode,
            backups,
            off_heap_max_bytes: Some(off_heap_max_bytes),
            default_ttl: Some(default_ttl),
            statistics_enabled: true,
        });
        Ok(self)
    }

    /// Configure an index map. Index entries never expire on their own; the
    /// eviction cascade reclaims them.
    pub fn index_map(mut self, name: &str, mode: CacheMode, backups: u32) -> Self {
        self.maps.push(MapSettings {
            name: name.to_string(),
            mode,
            backups,
            off_heap_max_bytes: None,
            default_ttl: None,
            statistics_enabled: true,
        });
        self
    }

    /// Configure canonical ID block reservation
    pub fn sequence_reserve(mut self, reserve_size: u64) -> Self {
        self.sequence = Some(SequenceSettings {
            name: SEQUENCE_NAME.to_string(),
            reserve_size,
        });
        self
    }

    /// Configure the expiry sweeper interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<ClusterTopology> {
        let discovery = self
            .discovery
            .ok_or_else(|| Error::Config("discovery is not configured".to_string()))?;

        let sequence = self.sequence.unwrap_or_else(|| SequenceSettings {
            name: SEQUENCE_NAME.to_string(),
            reserve_size: 1000,
        });
        if sequence.reserve_size == 0 {
            return Err(Error::Config(
                "sequence reserve size must be greater than 0".to_string(),
            ));
        }

        for required in [ARTIFACTS_MAP, KEYS_MAP, KEYS_REVERSE_MAP] {
            if !self.maps.iter().any(|m| m.name == required) {
                return Err(Error::Config(format!("map '{}' is not configured", required)));
            }
        }

        let topology = ClusterTopology {
            discovery,
            maps: self.maps,
            sequence,
            sweep_interval: self.sweep_interval.unwrap_or(Duration::from_secs(1)),
        };

        info!(
            addresses = topology.discovery.addresses.len(),
            maps = topology.maps.len(),
            reserve = topology.sequence.reserve_size,
            "Cluster topology built"
        );

        Ok(topology)
    }
}

/// Shared resolver handle used by the service across re-initializations
pub type SharedResolver = Arc<RetainingResolver>;

// =============================================================================
// Tests
// =============================================================================
