//! Artifact Store
//!
//! Canonical ID -> artifact bytes. The only map with a time-to-live and a
//! byte ceiling; its removals drive the eviction cascade.

use std::sync::Arc;
use std::time::Duration;

use super::entry::{Artifact, CanonicalId};
use crate::domain::ports::ClusteredMap;
use crate::error::Result;

#[derive(Clone)]
pub struct ArtifactStore {
    map: Arc<dyn ClusteredMap<CanonicalId, Artifact>>,
}

impl ArtifactStore {
    pub fn new(map: Arc<dyn ClusteredMap<CanonicalId, Artifact>>) -> Self {
        Self { map }
    }

    /// Read an artifact, touching its expiry timer
    pub async fn fetch(&self, id: CanonicalId) -> Result<Option<Artifact>> {
        self.map.get(&id).await
    }

    /// Store an artifact under the default time-to-live, or `ttl` when given
    pub async fn store(&self, id: CanonicalId, artifact: Artifact, ttl: Option<Duration>) -> Result<()> {
        match ttl {
            Some(ttl) => self.map.put_with_ttl(id, artifact, ttl).await,
            None => self.map.put(id, artifact).await,
        }
    }

    /// Whether the artifact still exists, without touching its expiry timer
    pub async fn contains(&self, id: CanonicalId) -> Result<bool> {
        self.map.contains_key(&id).await
    }

    pub async fn discard(&self, id: CanonicalId) -> Result<bool> {
        self.map.remove(&id).await
    }

    pub async fn len(&self) -> Result<usize> {
        self.map.len().await
    }
}
