//! Static outbound allowlist.
//!
//! Entries are parsed fresh for every validation call from the policy's raw
//! strings. Supported forms:
//!
//! - `example.com`, `*.example.com`, `**.example.com` (optionally `:port`)
//! - `192.168.1.1`, `::1`, `[::1]:8080`, `127.0.0.1:2000`
//! - `10.0.0.0/8`, `fc00::/7`
//!
//! IP entries accept the same alternate encodings as target hosts, so
//! `0xffffffff` and `255.255.255.255` name the same address. Entries that
//! match none of these forms are skipped.

use std::net::IpAddr;

use ipnet::{IpNet, Ipv4Net};
use tracing::debug;

use super::{address, host, pattern::DomainPattern};
use super::host::Host;

/// One parsed allowlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistEntry {
    /// Domain or domain suffix pattern.
    Domain {
        pattern: DomainPattern,
        port: Option<u16>,
    },

    /// Single IP address.
    Ip { addr: IpAddr, port: Option<u16> },

    /// CIDR range, checked by containment.
    Range { net: IpNet, port: Option<u16> },
}

impl AllowlistEntry {
    /// Parse an entry, returning `None` for unusable input.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(entry) = Self::parse_range(raw) {
            return Some(entry);
        }

        // Bare IPv6 literals contain colons that are not port separators.
        if let Ok(addr) = address::parse_address(raw) {
            return Some(AllowlistEntry::Ip { addr, port: None });
        }

        let (host_part, port) = host::split_host_port(raw)?;

        if let Ok(addr) = address::parse_address(host_part) {
            return Some(AllowlistEntry::Ip { addr, port });
        }

        DomainPattern::parse(host_part)
            .ok()
            .map(|pattern| AllowlistEntry::Domain { pattern, port })
    }

    fn parse_range(raw: &str) -> Option<Self> {
        if !raw.contains('/') {
            return None;
        }

        if let Ok(net) = raw.parse::<IpNet>() {
            return Some(AllowlistEntry::Range {
                net: canonical_net(net),
                port: None,
            });
        }

        let (range, port) = raw.rsplit_once(':')?;
        let net = range.parse::<IpNet>().ok()?;
        let port = port.parse().ok()?;
        Some(AllowlistEntry::Range {
            net: canonical_net(net),
            port: Some(port),
        })
    }

    /// Check an IP against this entry.
    pub fn matches_ip(&self, ip: IpAddr, port: Option<u16>) -> bool {
        let ip = address::canonicalize(ip);
        match self {
            AllowlistEntry::Ip { addr, port: entry_port } => {
                *addr == ip && port_matches(*entry_port, port)
            }
            AllowlistEntry::Range { net, port: entry_port } => {
                net.contains(&ip) && port_matches(*entry_port, port)
            }
            AllowlistEntry::Domain { .. } => false,
        }
    }

    /// Check a normalized domain against this entry.
    pub fn matches_domain(&self, domain: &str, port: Option<u16>) -> bool {
        match self {
            AllowlistEntry::Domain {
                pattern,
                port: entry_port,
            } => pattern.matches(domain) && port_matches(*entry_port, port),
            _ => false,
        }
    }
}

/// Truncate `net` and rewrite IPv4-mapped IPv6 ranges as IPv4 ranges.
///
/// Candidates are canonicalised before containment checks, so a range left
/// in `::ffff:a.b.c.d/n` form would never match. Ranges wider than the
/// mapped block (prefix below 96) stay IPv6.
pub fn canonical_net(net: IpNet) -> IpNet {
    let net = net.trunc();
    let IpNet::V6(v6) = net else {
        return net;
    };
    if v6.prefix_len() < 96 {
        return net;
    }
    match v6.addr().to_ipv4_mapped() {
        Some(v4) => Ipv4Net::new(v4, v6.prefix_len() - 96)
            .map(IpNet::V4)
            .unwrap_or(net),
        None => net,
    }
}

/// An entry without a port matches any port. An entry with a port only
/// matches when the caller supplies the same port.
fn port_matches(entry_port: Option<u16>, port: Option<u16>) -> bool {
    match entry_port {
        None => true,
        Some(expected) => port == Some(expected),
    }
}

/// Parsed allowlist.
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<AllowlistEntry>,
}

impl Allowlist {
    /// Parse raw entries, skipping the ones that cannot be used.
    pub fn parse<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();
        for item in raw {
            let item = item.as_ref();
            match AllowlistEntry::parse(item) {
                Some(entry) => entries.push(entry),
                None => debug!(entry = item, "skipping unparseable allowlist entry"),
            }
        }
        Self { entries }
    }

    /// Parsed entries.
    pub fn entries(&self) -> &[AllowlistEntry] {
        &self.entries
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `domain` (any spelling; normalized here) is allowed.
    pub fn domain_allowed(&self, domain: &str, port: Option<u16>) -> bool {
        let Ok(host) = Host::parse(domain) else {
            return false;
        };
        if host.ip().is_some() {
            return false;
        }
        self.entries
            .iter()
            .any(|entry| entry.matches_domain(host.as_str(), port))
    }

    /// Whether `ip` is allowed.
    pub fn ip_allowed(&self, ip: IpAddr, port: Option<u16>) -> bool {
        self.entries.iter().any(|entry| entry.matches_ip(ip, port))
    }
}
