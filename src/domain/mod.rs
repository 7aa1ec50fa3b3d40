//! Domain Layer
//!
//! # Architecture
//!
//! The domain layer is organized into:
//!
//! - **Ports** (`ports.rs`) - Trait abstractions over the distributed map
//!   substrate, the metrics sink and DNS discovery
//! - **Events** (`events.rs`) - Artifact lifecycle notifications
//!
//! # Usage
//!
//! ```ignore
//! use buildcache::domain::ports::{ClusteredMap, Substrate};
//!
//! async fn count_artifacts(substrate: &dyn Substrate) -> Result<usize> {
//!     substrate.artifacts().len().await
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::{EntryEvent, EntryEventKind};
pub use ports::{
    AtomicSequence, ClusterStatus, ClusteredMap, DnsLookup, MetricsSink, NodeMetrics, Substrate,
    SubstrateConnector,
};
