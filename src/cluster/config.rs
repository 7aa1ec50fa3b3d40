//! Cache Configuration
//!
//! The configuration surface consumed by the service at `init`. Field names
//! follow the camelCase option names of the YAML configuration file.

use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::size::parse_size;
use crate::cache::{TimeUnit, MAX_TTL};
use crate::error::{Error, Result};

/// Default multicast discovery group
pub const DEFAULT_MULTICAST_ADDRESS: &str = "228.10.10.157";

/// Default multicast discovery port
pub const DEFAULT_MULTICAST_PORT: u16 = 47400;

// =============================================================================
// Modes
// =============================================================================

/// Whether this node holds a data partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceMode {
    /// Full participant, holds a partition
    #[serde(alias = "SERVER", alias = "server")]
    Server,
    /// Routes requests, holds no partition
    #[serde(alias = "CLIENT", alias = "client")]
    Client,
}

impl std::fmt::Display for InstanceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceMode::Server => write!(f, "server"),
            InstanceMode::Client => write!(f, "client"),
        }
    }
}

impl FromStr for InstanceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "server" => Ok(InstanceMode::Server),
            "client" => Ok(InstanceMode::Client),
            other => Err(Error::Config(format!("unknown instance mode: {}", other))),
        }
    }
}

/// How clustered maps distribute their entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheMode {
    /// Entries are split across server nodes, with `backupCount` copies
    Partitioned,
    /// Every server node holds every entry
    Replicated,
    /// Entries stay on the node that wrote them
    Local,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheMode::Partitioned => write!(f, "PARTITIONED"),
            CacheMode::Replicated => write!(f, "REPLICATED"),
            CacheMode::Local => write!(f, "LOCAL"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Multicast group used for local-network peer discovery
    pub multicast_address: String,

    /// Multicast port
    pub multicast_port: u16,

    /// Statically known peer addresses
    pub static_hosts: Vec<String>,

    /// DNS SRV name whose target hosts are merged into the static hosts
    pub dns_lookup_address: Option<String>,

    /// Partitioning mode of the clustered maps
    pub cache_mode: CacheMode,

    /// Redundant copies per partition
    pub backup_count: u32,

    /// Unit of the default artifact time-to-live
    pub expiration_time_unit: TimeUnit,

    /// Magnitude of the default artifact time-to-live
    pub expiration_time_value: u64,

    /// Off-heap ceiling of the artifact store, e.g. `"4g"`
    pub off_heap_max_size: String,

    /// Canonical IDs reserved per sequence round-trip
    pub atomic_sequence_reserve_size: u64,

    /// Server or client participation
    pub mode: InstanceMode,

    /// Seconds between metrics reports
    pub metrics_report_interval: u64,

    /// Milliseconds between expiry sweeps of the artifact store
    pub expiry_sweep_interval_ms: u64,

    /// Optional cap on artifact bytes written per second, e.g. `"64m"`
    pub write_bytes_per_second: Option<String>,

    /// Attempts made by the cascade listener before giving up on an event
    pub cascade_max_attempts: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            multicast_address: DEFAULT_MULTICAST_ADDRESS.to_string(),
            multicast_port: DEFAULT_MULTICAST_PORT,
            static_hosts: Vec::new(),
            dns_lookup_address: None,
            cache_mode: CacheMode::Partitioned,
            backup_count: 1,
            expiration_time_unit: TimeUnit::Days,
            expiration_time_value: 7,
            off_heap_max_size: "4g".to_string(),
            atomic_sequence_reserve_size: 1000,
            mode: InstanceMode::Server,
            metrics_report_interval: 10,
            expiry_sweep_interval_ms: 1000,
            write_bytes_per_second: None,
            cascade_max_attempts: 3,
        }
    }
}

impl CacheConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: CacheConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub async fn from_yaml_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&content)
    }

    /// Default artifact time-to-live
    pub fn default_ttl(&self) -> Duration {
        self.expiration_time_unit
            .duration(self.expiration_time_value)
    }

    /// Off-heap ceiling in bytes
    pub fn off_heap_max_bytes(&self) -> Result<u64> {
        parse_size(&self.off_heap_max_size)
    }

    /// Write throughput cap in bytes per second, if configured
    pub fn write_rate_bytes(&self) -> Result<Option<u64>> {
        self.write_bytes_per_second
            .as_deref()
            .map(parse_size)
            .transpose()
    }

    /// Interval of the metrics reporter
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_report_interval)
    }

    /// Interval of the expiry sweeper
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_sweep_interval_ms)
    }

    /// Fail fast on values that cannot produce a usable cluster
    pub fn validate(&self) -> Result<()> {
        let group: IpAddr = self.multicast_address.parse().map_err(|_| {
            Error::Config(format!(
                "multicastAddress '{}' is not an IP address",
                self.multicast_address
            ))
        })?;
        if !group.is_multicast() {
            return Err(Error::Config(format!(
                "multicastAddress '{}' is not a multicast group",
                self.multicast_address
            )));
        }
        if self.multicast_port == 0 {
            return Err(Error::Config("multicastPort must be non-zero".to_string()));
        }
        if self.expiration_time_value == 0 {
            return Err(Error::Config(
                "expirationTimeValue must be greater than 0".to_string(),
            ));
        }
        if self.default_ttl() > MAX_TTL {
            return Err(Error::Config(format!(
                "expirationTimeValue {} {} exceeds {} days",
                self.expiration_time_value,
                self.expiration_time_unit,
                MAX_TTL.as_secs() / 86_400
            )));
        }
        if self.atomic_sequence_reserve_size == 0 {
            return Err(Error::Config(
                "atomicSequenceReserveSize must be greater than 0".to_string(),
            ));
        }
        if self.metrics_report_interval == 0 {
            return Err(Error::Config(
                "metricsReportInterval must be greater than 0".to_string(),
            ));
        }
        if self.expiry_sweep_interval_ms == 0 {
            return Err(Error::Config(
                "expirySweepIntervalMs must be greater than 0".to_string(),
            ));
        }
        if self.cascade_max_attempts == 0 {
            return Err(Error::Config(
                "cascadeMaxAttempts must be greater than 0".to_string(),
            ));
        }
        if self.off_heap_max_bytes()? == 0 {
            return Err(Error::Config("offHeapMaxSize must be non-zero".to_string()));
        }
        if let Some(0) = self.write_rate_bytes()? {
            return Err(Error::Config(
                "writeBytesPerSecond must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
