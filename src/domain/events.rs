//! Domain Events
//!
//! Lifecycle notifications published by the substrate for artifact-store
//! entries. Delivery is at-least-once: the same event may arrive more than
//! once, and events may be observed out of order relative to writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CanonicalId;

/// Why an artifact-store entry went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryEventKind {
    /// Time-to-live elapsed
    Expired,
    /// Explicitly deleted
    Removed,
    /// Dropped under capacity pressure
    Evicted,
}

impl EntryEventKind {
    /// Stable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            EntryEventKind::Expired => "EXPIRED",
            EntryEventKind::Removed => "REMOVED",
            EntryEventKind::Evicted => "EVICTED",
        }
    }
}

impl std::fmt::Display for EntryEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Removal notification for one artifact-store entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryEvent {
    pub id: CanonicalId,
    pub kind: EntryEventKind,
    pub timestamp: DateTime<Utc>,
}

impl EntryEvent {
    pub fn new(id: CanonicalId, kind: EntryEventKind) -> Self {
        Self {
            id,
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn expired(id: CanonicalId) -> Self {
        Self::new(id, EntryEventKind::Expired)
    }

    pub fn removed(id: CanonicalId) -> Self {
        Self::new(id, EntryEventKind::Removed)
    }

    pub fn evicted(id: CanonicalId) -> Self {
        Self::new(id, EntryEventKind::Evicted)
    }
}
