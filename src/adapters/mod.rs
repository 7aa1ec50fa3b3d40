//! Infrastructure Adapters
//!
//! This module contains adapter implementations for the domain ports,
//! following the Port/Adapter (Hexagonal) architecture pattern.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │  SubstrateConnector │ Substrate │ MetricsSink │ DnsLookup  │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │ LocalCluster │ PrometheusSink │ RecordingSink             │ │
//! │  │ SystemDnsLookup                                            │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use buildcache::adapters::{LocalCluster, PrometheusSink, SystemDnsLookup};
//! use buildcache::cache::CacheService;
//!
//! let service = CacheService::new(
//!     Arc::new(LocalCluster::new()),
//!     Arc::new(RetainingResolver::new(Arc::new(SystemDnsLookup::new()))),
//!     Arc::new(PrometheusSink::new(prometheus::Registry::new())),
//! );
//! service.init(&config, InstanceMode::Server).await?;
//! ```

mod dns;
pub mod local;
mod prometheus;
mod recording;

pub use dns::SystemDnsLookup;
pub use local::{LocalCluster, LocalMap, LocalSequence, LocalSubstrate, MapStats};
pub use prometheus::PrometheusSink;
pub use recording::{Recorded, RecordingSink};
