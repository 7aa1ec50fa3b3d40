//! DNS Peer Discovery
//!
//! Resolves a service-discovery name into peer addresses, retaining the last
//! successful answer per name. A failed or empty lookup never wipes out
//! addresses that resolved before.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::domain::ports::DnsLookup;
use crate::error::Error;

/// DNS resolver that keeps serving the last good result on failure.
pub struct RetainingResolver {
    lookup: Arc<dyn DnsLookup>,
    last_good: RwLock<HashMap<String, Vec<String>>>,
}

impl RetainingResolver {
    pub fn new(lookup: Arc<dyn DnsLookup>) -> Self {
        Self {
            lookup,
            last_good: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `name`, falling back to the last successful answer.
    ///
    /// Returns an empty list only when the name has never resolved.
    pub async fn resolve(&self, name: &str) -> Vec<String> {
        match self.lookup.resolve(name).await {
            Ok(addresses) if !addresses.is_empty() => {
                debug!(lookup = %name, count = addresses.len(), "DNS lookup succeeded");
                self.last_good
                    .write()
                    .insert(name.to_string(), addresses.clone());
                addresses
            }
            Ok(_) => self.degraded(name, "lookup returned no addresses".to_string()),
            Err(e) => self.degraded(name, e.to_string()),
        }
    }

    /// Last successful answer for `name`, if any
    pub fn cached(&self, name: &str) -> Option<Vec<String>> {
        self.last_good.read().get(name).cloned()
    }

    fn degraded(&self, name: &str, reason: String) -> Vec<String> {
        let retained = self.cached(name).unwrap_or_default();
        let err = Error::DiscoveryDegraded {
            lookup: name.to_string(),
            reason,
        };
        warn!(retained = retained.len(), "{}", err);
        retained
    }
}

impl std::fmt::Debug for RetainingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetainingResolver")
            .field("cached_names", &self.last_good.read().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
