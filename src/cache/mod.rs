//! Build-Artifact Cache Core
//!
//! Multi-key deduplicating store layered on three clustered maps.
//!
//! # Architecture
//!
//! ```text
//!  key ──► ForwardIndex ──► CanonicalId ──► ArtifactStore ──► bytes
//!                               │
//!                               └────► ReverseIndex ──► KeySet
//!
//!  ArtifactStore ── expired/removed/evicted ──► EvictionCascade
//!                                                 │
//!                     ForwardIndex ◄── remove ────┤
//!                     ReverseIndex ◄── remove ────┘
//! ```
//!
//! Several keys may alias one artifact; the artifact is stored once under a
//! canonical ID allocated from the cluster-wide sequence.

pub mod allocator;
pub mod cascade;
pub mod entry;
pub mod index;
pub mod service;
pub mod store;

pub use allocator::IdAllocator;
pub use cascade::{CascadeHandle, CascadeOutcome, CascadeStatsSnapshot, EvictionCascade};
pub use entry::{Artifact, CanonicalId, KeySet, TimeUnit, MAX_TTL};
pub use index::{ForwardIndex, ReverseIndex};
pub use service::CacheService;
pub use store::ArtifactStore;
