//! Cluster Topology
//!
//! Configuration surface, capacity parsing, DNS discovery and the builder
//! producing the immutable topology the substrate is started from.

pub mod config;
pub mod discovery;
pub mod size;
pub mod topology;

pub use config::{CacheConfig, CacheMode, InstanceMode};
pub use discovery::RetainingResolver;
pub use size::{parse_size, SizeUnit};
pub use topology::{
    ClusterTopology, DiscoverySettings, MapSettings, SequenceSettings, SharedResolver,
    TopologyBuilder,
};

/// Forward index map: external key -> canonical ID
pub const KEYS_MAP: &str = "keys";

/// Reverse index map: canonical ID -> keys
pub const KEYS_REVERSE_MAP: &str = "keys-reverse";

/// Artifact store map: canonical ID -> bytes
pub const ARTIFACTS_MAP: &str = "metadata";

/// Sequence backing canonical ID allocation
pub const SEQUENCE_NAME: &str = "underlyingArtifactKeys";
