//! Buildcache - Distributed Build-Artifact Cache
//!
//! A clustered cache for build outputs where many keys can alias one stored
//! artifact. Artifacts are kept once under a canonical ID; a forward index
//! maps keys to IDs and a reverse index maps IDs back to keys so that
//! expiring or evicting an artifact cascades into both indexes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         CacheService                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
//! │  │ IdAllocator │  │ ArtifactStore│  │ Forward/Reverse Index  │  │
//! │  └─────────────┘  └──────────────┘  └────────────────────────┘  │
//! │          │               │ events              ▲                │
//! │          │               ▼                     │                │
//! │          │        ┌──────────────────┐         │                │
//! │          │        │ EvictionCascade  │─────────┘                │
//! │          │        └──────────────────┘                          │
//! ├──────────┴──────────────────────────────────────────────────────┤
//! │              Substrate (clustered maps + sequence)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Port implementations (local substrate, Prometheus, DNS)
//! - [`cache`] - Allocator, indexes, artifact store, cascade and the service
//! - [`cluster`] - Configuration, capacity parsing, discovery and topology
//! - [`domain`] - Ports and artifact lifecycle events
//! - [`error`] - Error types
//! - [`monitoring`] - Health results and the node metrics reporter
//! - [`throttle`] - Byte-rate limiter for writes

pub mod adapters;
pub mod cache;
pub mod cluster;
pub mod domain;
pub mod error;
pub mod monitoring;
pub mod throttle;

// Re-export commonly used types
pub use cache::{Artifact, CacheService, CanonicalId, KeySet, TimeUnit};
pub use cluster::{CacheConfig, CacheMode, InstanceMode};
pub use error::{Error, Result};
pub use monitoring::{HealthCheckResult, HealthStatus};
