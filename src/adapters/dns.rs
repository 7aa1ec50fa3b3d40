//! System DNS Lookup
//!
//! Resolves a service-discovery name through its SRV records and returns
//! the target hosts. Names without SRV records fall back to their A/AAAA
//! addresses so a plain headless-service name also works.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::rr::rdata::SRV;
use hickory_resolver::TokioAsyncResolver;
use tracing::{trace, warn};

use crate::domain::ports::DnsLookup;
use crate::error::{Error, Result};

/// DNS lookup backed by the system resolver configuration
#[derive(Clone)]
pub struct SystemDnsLookup {
    resolver: TokioAsyncResolver,
}

impl SystemDnsLookup {
    /// Resolver from `/etc/resolv.conf`, or the public defaults when that
    /// cannot be read
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!("System resolver configuration unavailable, using defaults: {}", e);
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    async fn lookup_addresses(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .lookup_ip(name)
            .await
            .map_err(|e| degraded(name, e))?;
        let mut addresses: Vec<String> = Vec::new();
        for ip in lookup.iter() {
            let ip = ip.to_string();
            if !addresses.contains(&ip) {
                addresses.push(ip);
            }
        }
        Ok(addresses)
    }
}

impl Default for SystemDnsLookup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemDnsLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDnsLookup").finish_non_exhaustive()
    }
}

fn degraded(name: &str, e: ResolveError) -> Error {
    Error::DiscoveryDegraded {
        lookup: name.to_string(),
        reason: e.to_string(),
    }
}

/// Target hosts of SRV records, without the root label, in record order
pub(crate) fn srv_targets<'a>(records: impl IntoIterator<Item = &'a SRV>) -> Vec<String> {
    let mut hosts: Vec<String> = Vec::new();
    for record in records {
        let target = record.target().to_utf8();
        let host = target.trim_end_matches('.');
        if host.is_empty() {
            // "." means the service is decidedly not available
            continue;
        }
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

#[async_trait]
impl DnsLookup for SystemDnsLookup {
    async fn resolve(&self, name: &str) -> Result<Vec<String>> {
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(vec![ip.to_string()]);
        }

        let hosts = match self.resolver.srv_lookup(name).await {
            Ok(lookup) => srv_targets(lookup.iter()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Vec::new(),
            Err(e) => return Err(degraded(name, e)),
        };

        let hosts = if hosts.is_empty() {
            trace!(lookup = %name, "No SRV records, resolving addresses");
            self.lookup_addresses(name).await?
        } else {
            hosts
        };

        trace!(lookup = %name, count = hosts.len(), "Resolved discovery name");
        Ok(hosts)
    }
}
