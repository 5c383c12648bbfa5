//! Host normalization and comparison.

use std::net::IpAddr;

use super::{BlockReason, Result, UrlBlockerError, address};

/// A normalized host string for allowlist and proxy matching.
///
/// Domains are lowercased and IDNA-encoded (`ğitlab.com` becomes
/// `xn--itlab-j1a.com`), IP literals are canonicalized and unbracketed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Host(String);

impl Host {
    /// Parse and normalize a host string.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_end_matches('.');
        if trimmed.is_empty() {
            return Err(UrlBlockerError::Blocked(BlockReason::InvalidHostname));
        }

        if let Ok(ip) = address::parse_address(trimmed) {
            return Ok(Self(ip.to_string()));
        }

        match url::Host::parse(&trimmed.to_lowercase()) {
            Ok(url::Host::Domain(domain)) => Ok(Self(domain)),
            Ok(url::Host::Ipv4(ip)) => Ok(Self(ip.to_string())),
            Ok(url::Host::Ipv6(ip)) => Ok(Self(ip.to_string())),
            Err(_) => Err(UrlBlockerError::Blocked(BlockReason::InvalidHostname)),
        }
    }

    /// Get the normalized host string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host as an IP address, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Host {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Host {
    type Err = UrlBlockerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Split `host[:port]` or `[v6]:port`.
///
/// Bare IPv6 addresses are returned whole. Returns `None` when a port is
/// present but is not a valid `u16`.
pub fn split_host_port(input: &str) -> Option<(&str, Option<u16>)> {
    let input = input.trim();

    if let Some(rest) = input.strip_prefix('[') {
        let (host, after) = rest.split_once(']')?;
        return match after.strip_prefix(':') {
            Some(port) => Some((host, Some(port.parse().ok()?))),
            None if after.is_empty() => Some((host, None)),
            None => None,
        };
    }

    if input.matches(':').count() == 1 {
        if let Some((host, port)) = input.rsplit_once(':') {
            if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) {
                return Some((host, Some(port.parse().ok()?)));
            }
        }
    }

    Some((input, None))
}

/// Whether the first character is a Unicode letter or digit.
pub fn starts_with_alphanumeric(value: &str) -> bool {
    value.chars().next().is_some_and(char::is_alphanumeric)
}

/// Check if one domain equals another (case-insensitive).
pub fn domain_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Check if candidate is a strict subdomain of domain (not equal).
pub fn is_strict_subdomain(candidate: &str, domain: &str) -> bool {
    let suffix = format!(".{}", domain.to_lowercase());
    candidate.to_lowercase().ends_with(&suffix)
}

/// Check if candidate is a subdomain or equal to domain.
pub fn is_subdomain_or_equal(candidate: &str, domain: &str) -> bool {
    domain_eq(candidate, domain) || is_strict_subdomain(candidate, domain)
}
