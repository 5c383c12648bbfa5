//! DNS resolution with a hard timeout.
//!
//! Resolution happens once per validation. The addresses it returns are
//! threaded through to the connection step so the target is never looked up
//! a second time.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::trace;

use super::address;

/// One resolved address.
///
/// `ip` is kept as returned by the resolver so callers can tell v4, v6 and
/// v4-mapped results apart; [`ResolvedAddress::canonical_ip`] gives the form
/// used for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl ResolvedAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The IP with IPv4-mapped IPv6 reduced to IPv4.
    pub fn canonical_ip(&self) -> IpAddr {
        address::canonicalize(self.ip)
    }

    /// Whether the resolver returned an IPv4-mapped IPv6 address.
    pub fn is_ipv4_mapped(&self) -> bool {
        matches!(self.ip, IpAddr::V6(v6) if v6.to_ipv4_mapped().is_some())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.canonical_ip(), self.port)
    }
}

/// Resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The lookup did not finish within its budget.
    #[error("DNS resolution for {host} timed out after {timeout:?}")]
    Timeout { host: String, timeout: Duration },

    /// NXDOMAIN, empty answer or any other lookup error.
    #[error("failed to resolve {host}: {reason}")]
    Failure { host: String, reason: String },
}

/// Name resolution backend.
#[async_trait]
pub trait Resolve: Send + Sync {
    /// Look up `host`. Implementations need not enforce a timeout.
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<ResolvedAddress>, ResolveError>;
}

/// Resolve `host` through `resolver`, bounded by `timeout`.
///
/// IP literals (in any accepted encoding) are returned directly without a
/// lookup.
pub async fn resolve(
    resolver: &dyn Resolve,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Vec<ResolvedAddress>, ResolveError> {
    if let Ok(ip) = address::parse_address(host) {
        return Ok(vec![ResolvedAddress::new(ip, port)]);
    }

    let addrs = match tokio::time::timeout(timeout, resolver.lookup(host, port)).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(ResolveError::Timeout {
                host: host.to_string(),
                timeout,
            });
        }
    };

    if addrs.is_empty() {
        return Err(ResolveError::Failure {
            host: host.to_string(),
            reason: "No addresses returned".to_string(),
        });
    }

    trace!(host, count = addrs.len(), "resolved host");
    Ok(addrs)
}

/// Resolver backed by the system's `getaddrinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolve for SystemResolver {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<ResolvedAddress>, ResolveError> {
        match tokio::net::lookup_host((host, port)).await {
            Ok(addrs) => Ok(addrs
                .map(|addr| ResolvedAddress::new(addr.ip(), addr.port()))
                .collect()),
            Err(e) => Err(ResolveError::Failure {
                host: host.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Fixed host table, for tests and for pinning names in controlled setups.
///
/// Hosts without a record fail to resolve.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    records: HashMap<String, Vec<IpAddr>>,
    delay: Option<Duration>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an address for `host`.
    pub fn with_record(mut self, host: impl Into<String>, ip: IpAddr) -> Self {
        self.records
            .entry(host.into().to_lowercase())
            .or_default()
            .push(ip);
        self
    }

    /// Delay every lookup, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Resolve for StaticResolver {
    async fn lookup(&self, host: &str, port: u16) -> Result<Vec<ResolvedAddress>, ResolveError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.records.get(&host.to_lowercase()) {
            Some(ips) => Ok(ips
                .iter()
                .map(|ip| ResolvedAddress::new(*ip, port))
                .collect()),
            None => Err(ResolveError::Failure {
                host: host.to_string(),
                reason: "no such host".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_literal_skips_lookup() {
        // An empty table would fail any real lookup.
        let resolver = StaticResolver::new();
        let addrs = resolve(&resolver, "0x7f.1", 80, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            addrs,
            vec![ResolvedAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 80)]
        );
    }

    #[tokio::test]
    async fn test_static_records() {
        let resolver =
            StaticResolver::new().with_record("Example.org", "93.184.216.34".parse().unwrap());
        let addrs = resolve(&resolver, "example.org", 443, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].port, 443);
        assert_eq!(addrs[0].ip, "93.184.216.34".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_host_fails() {
        let resolver = StaticResolver::new();
        let err = resolve(&resolver, "foobar.x", 80, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Failure { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let resolver = StaticResolver::new()
            .with_record("example.com", "93.184.216.34".parse().unwrap())
            .with_delay(Duration::from_millis(500));
        let err = resolve(&resolver, "example.com", 80, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Timeout { .. }));
    }

    #[test]
    fn test_mapped_result() {
        let mapped = ResolvedAddress::new("::ffff:10.0.0.1".parse().unwrap(), 80);
        assert!(mapped.is_ipv4_mapped());
        assert_eq!(
            mapped.canonical_ip(),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
        );
    }
}
