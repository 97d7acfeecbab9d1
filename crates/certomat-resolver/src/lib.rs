// # Public Resolver Probes
//
// Implements the core `TxtResolver` trait over hickory-resolver. Each
// instance queries a single upstream; the propagation checker composes
// several into a quorum. Well-known public upstreams get named
// constructors, and a system-config fallback exists for air-gapped setups.
//
// A fresh resolver is built per lookup so repeated polls observe real
// propagation instead of a cached answer.

use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use tracing::trace;

use certomat_core::traits::TxtResolver;
use certomat_core::{Error, Result};

/// A TXT probe against one upstream resolver
#[derive(Debug, Clone)]
pub struct PublicResolver {
    label: String,
    /// `None` means the system resolver configuration
    upstream: Option<IpAddr>,
}

impl PublicResolver {
    /// Probe a specific upstream
    pub fn new(label: impl Into<String>, upstream: IpAddr) -> Self {
        Self {
            label: label.into(),
            upstream: Some(upstream),
        }
    }

    /// Cloudflare public DNS (1.1.1.1)
    pub fn cloudflare() -> Self {
        Self::new("cloudflare-dns", IpAddr::from([1, 1, 1, 1]))
    }

    /// Google public DNS (8.8.8.8)
    pub fn google() -> Self {
        Self::new("google-dns", IpAddr::from([8, 8, 8, 8]))
    }

    /// Quad9 public DNS (9.9.9.9)
    pub fn quad9() -> Self {
        Self::new("quad9", IpAddr::from([9, 9, 9, 9]))
    }

    /// The system resolver configuration
    pub fn system() -> Self {
        Self {
            label: "system".to_string(),
            upstream: None,
        }
    }

    /// Parse a resolver spec: an IP address, or the literal `system`
    pub fn from_spec(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.eq_ignore_ascii_case("system") {
            return Ok(Self::system());
        }
        let ip: IpAddr = spec
            .parse()
            .map_err(|_| Error::config(format!("invalid resolver spec: '{spec}'")))?;
        Ok(Self::new(spec.to_string(), ip))
    }

    /// Build a fresh resolver for one lookup
    fn build(&self) -> Result<TokioAsyncResolver> {
        match self.upstream {
            Some(ip) => {
                let group = NameServerConfigGroup::from_ips_clear(&[ip], 53, true);
                let config = ResolverConfig::from_parts(None, Vec::new(), group);
                let mut opts = ResolverOpts::default();
                // No cache: every poll must hit the upstream.
                opts.cache_size = 0;
                Ok(TokioAsyncResolver::tokio(config, opts))
            }
            None => TokioAsyncResolver::tokio_from_system_conf().map_err(|e| {
                Error::other(format!("failed to build system resolver: {e}"))
            }),
        }
    }
}

#[async_trait]
impl TxtResolver for PublicResolver {
    async fn lookup_txt(&self, record_name: &str) -> Result<Vec<String>> {
        let resolver = self.build()?;
        match resolver.txt_lookup(record_name).await {
            Ok(lookup) => {
                let values: Vec<String> = lookup.iter().map(|txt| txt.to_string()).collect();
                trace!(
                    resolver = %self.label,
                    record = %record_name,
                    count = values.len(),
                    "TXT lookup answered"
                );
                Ok(values)
            }
            Err(err) => match err.kind() {
                // Not propagated yet; an empty answer, not a failure.
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                _ => Err(Error::timeout(format!(
                    "TXT lookup for {record_name} via {} failed: {err}",
                    self.label
                ))),
            },
        }
    }

    fn resolver_name(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_spec_parses_addresses_and_system() {
        assert_eq!(
            PublicResolver::from_spec("9.9.9.9").unwrap().upstream,
            Some(IpAddr::from([9, 9, 9, 9]))
        );
        assert!(PublicResolver::from_spec("system").unwrap().upstream.is_none());
        assert!(PublicResolver::from_spec("SYSTEM").unwrap().upstream.is_none());
        assert!(PublicResolver::from_spec("not-an-ip").is_err());
    }

    #[test]
    fn named_constructors() {
        assert_eq!(PublicResolver::cloudflare().resolver_name(), "cloudflare-dns");
        assert_eq!(PublicResolver::google().resolver_name(), "google-dns");
        assert_eq!(PublicResolver::quad9().resolver_name(), "quad9");
        assert_eq!(PublicResolver::system().resolver_name(), "system");
    }
}
