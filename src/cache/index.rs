//! Key Indexes
//!
//! The forward index resolves external keys to canonical IDs. The reverse
//! index records, per canonical ID, every key written with it so cleanup can
//! find them again. Neither index expires on its own; entries leave through
//! the eviction cascade.

use std::sync::Arc;

use tracing::trace;

use super::entry::{CanonicalId, KeySet};
use crate::domain::ports::ClusteredMap;
use crate::error::Result;

/// External key -> canonical ID
#[derive(Clone)]
pub struct ForwardIndex {
    map: Arc<dyn ClusteredMap<String, CanonicalId>>,
}

impl ForwardIndex {
    pub fn new(map: Arc<dyn ClusteredMap<String, CanonicalId>>) -> Self {
        Self { map }
    }

    pub async fn resolve(&self, key: &str) -> Result<Option<CanonicalId>> {
        self.map.get(&key.to_string()).await
    }

    /// Point every key at `id`, overwriting earlier mappings
    pub async fn bind_all(&self, keys: &KeySet, id: CanonicalId) -> Result<()> {
        for key in keys {
            self.map.put(key.clone(), id).await?;
        }
        trace!(id = %id, keys = keys.len(), "Bound forward keys");
        Ok(())
    }

    /// Remove `key` only if it still resolves to `id`.
    ///
    /// A key rebound to a newer ID by a later write is left alone.
    pub async fn unbind_if_current(&self, key: &str, id: CanonicalId) -> Result<bool> {
        self.map.remove_if_equals(&key.to_string(), &id).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.map.len().await
    }
}

/// Canonical ID -> keys written with it
#[derive(Clone)]
pub struct ReverseIndex {
    map: Arc<dyn ClusteredMap<CanonicalId, KeySet>>,
}

impl ReverseIndex {
    pub fn new(map: Arc<dyn ClusteredMap<CanonicalId, KeySet>>) -> Self {
        Self { map }
    }

    pub async fn record(&self, id: CanonicalId, keys: KeySet) -> Result<()> {
        self.map.put(id, keys).await
    }

    pub async fn keys_of(&self, id: CanonicalId) -> Result<Option<KeySet>> {
        self.map.get(&id).await
    }

    pub async fn forget(&self, id: CanonicalId) -> Result<bool> {
        self.map.remove(&id).await
    }

    /// Every ID with a reverse entry
    pub async fn ids(&self) -> Result<Vec<CanonicalId>> {
        self.map.keys().await
    }

    pub async fn len(&self) -> Result<usize> {
        self.map.len().await
    }
}
