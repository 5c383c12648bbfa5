//! Proxy settings taken from the process environment.
//!
//! The environment is read once, at the call boundary, with
//! [`ProxyEnv::from_env`]. Everything below that works on the captured
//! values.

use std::net::IpAddr;

use ipnet::IpNet;

use super::{address, allowlist::canonical_net, host};

/// Captured `http_proxy`, `https_proxy` and `no_proxy` values.
///
/// Lowercase variables win over their uppercase forms. Empty values count as
/// unset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxyEnv {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .or_else(|| lookup(&name.to_uppercase()))
                .filter(|value| !value.trim().is_empty())
        };

        Self {
            http_proxy: read("http_proxy"),
            https_proxy: read("https_proxy"),
            no_proxy: read("no_proxy"),
        }
    }

    pub fn with_http_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.http_proxy = Some(proxy.into());
        self
    }

    pub fn with_https_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.https_proxy = Some(proxy.into());
        self
    }

    pub fn with_no_proxy(mut self, no_proxy: impl Into<String>) -> Self {
        self.no_proxy = Some(no_proxy.into());
        self
    }

    /// Whether any proxy is configured.
    pub fn is_configured(&self) -> bool {
        self.http_proxy.is_some() || self.https_proxy.is_some()
    }

    /// Proxy URI for a target scheme, falling back to the other variable.
    pub fn proxy_for_scheme(&self, scheme: &str) -> Option<&str> {
        let (primary, fallback) = if scheme.eq_ignore_ascii_case("https") {
            (&self.https_proxy, &self.http_proxy)
        } else {
            (&self.http_proxy, &self.https_proxy)
        };
        primary.as_deref().or(fallback.as_deref())
    }

    /// Whether the proxy should be used for `hostname:port`.
    pub fn applies_to(&self, hostname: &str, port: Option<u16>) -> bool {
        self.is_configured() && !self.bypasses(hostname, port)
    }

    /// Whether `no_proxy` exempts `hostname:port`.
    ///
    /// Each entry is `host[:port]`. A host entry matches the hostname itself
    /// and any subdomain; a leading dot matches subdomains only. IP and CIDR
    /// entries match IP literal targets.
    pub fn bypasses(&self, hostname: &str, port: Option<u16>) -> bool {
        let Some(no_proxy) = self.no_proxy.as_deref() else {
            return false;
        };

        let hostname = hostname
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_lowercase();
        let target_ip = address::parse_address(&hostname).ok();

        no_proxy
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|entry| !entry.is_empty())
            .any(|entry| no_proxy_entry_matches(entry, &hostname, target_ip, port))
    }
}

fn no_proxy_entry_matches(
    entry: &str,
    hostname: &str,
    target_ip: Option<IpAddr>,
    port: Option<u16>,
) -> bool {
    let (entry_host, entry_port) = if entry.contains('/') {
        (entry, None)
    } else {
        match host::split_host_port(entry) {
            Some(parts) => parts,
            None => return false,
        }
    };

    if let Some(expected) = entry_port {
        if port != Some(expected) {
            return false;
        }
    }

    let entry_host = entry_host.to_lowercase();

    if let Some(ip) = target_ip {
        if let Ok(net) = entry_host.parse::<IpNet>() {
            return canonical_net(net).contains(&address::canonicalize(ip));
        }
        if let Ok(entry_ip) = address::parse_address(&entry_host) {
            return entry_ip == address::canonicalize(ip);
        }
    }

    match entry_host.strip_prefix('.') {
        Some(suffix) => host::is_strict_subdomain(hostname, suffix),
        None => host::is_subdomain_or_equal(hostname, &entry_host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> ProxyEnv {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ProxyEnv::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_from_lookup() {
        let proxy = env(&[
            ("HTTP_PROXY", "http://upper.example.com"),
            ("https_proxy", "http://lower.example.com"),
            ("HTTPS_PROXY", "http://ignored.example.com"),
            ("no_proxy", ""),
        ]);
        assert_eq!(proxy.http_proxy.as_deref(), Some("http://upper.example.com"));
        assert_eq!(proxy.https_proxy.as_deref(), Some("http://lower.example.com"));
        assert_eq!(proxy.no_proxy, None);
        assert!(proxy.is_configured());
    }

    #[test]
    fn test_unconfigured() {
        let proxy = ProxyEnv::default().with_no_proxy("example.com");
        assert!(!proxy.is_configured());
        assert!(!proxy.applies_to("other.com", Some(80)));
    }

    #[test]
    fn test_no_proxy_domains() {
        let proxy = ProxyEnv::default()
            .with_http_proxy("http://proxy.example.com")
            .with_no_proxy("foobar.x, .internal.net internal.org:8080");

        assert!(!proxy.applies_to("foobar.x", Some(80)));
        assert!(!proxy.applies_to("api.foobar.x", Some(80)));
        assert!(proxy.applies_to("notfoobar.x", Some(80)));

        assert!(!proxy.applies_to("svc.internal.net", Some(80)));
        assert!(proxy.applies_to("internal.net", Some(80)));

        assert!(!proxy.applies_to("internal.org", Some(8080)));
        assert!(proxy.applies_to("internal.org", Some(80)));
    }

    #[test]
    fn test_no_proxy_ips() {
        let proxy = ProxyEnv::default()
            .with_https_proxy("http://proxy.example.com")
            .with_no_proxy("10.0.0.0/8,192.168.1.1,[::1]:443");

        assert!(!proxy.applies_to("10.1.2.3", Some(443)));
        assert!(!proxy.applies_to("192.168.1.1", None));
        assert!(!proxy.applies_to("[::1]", Some(443)));
        assert!(proxy.applies_to("::1", Some(80)));
        assert!(proxy.applies_to("192.168.1.2", None));
    }

    #[test]
    fn test_no_proxy_mapped_range() {
        let proxy = ProxyEnv::default()
            .with_http_proxy("http://proxy.example.com")
            .with_no_proxy("::ffff:10.0.0.0/104");

        assert!(!proxy.applies_to("10.9.8.7", Some(80)));
        assert!(!proxy.applies_to("[::ffff:10.9.8.7]", Some(80)));
        assert!(proxy.applies_to("11.0.0.1", Some(80)));
    }

    #[test]
    fn test_proxy_for_scheme() {
        let proxy = ProxyEnv::default().with_http_proxy("http://proxy:3128");
        assert_eq!(proxy.proxy_for_scheme("http"), Some("http://proxy:3128"));
        assert_eq!(proxy.proxy_for_scheme("https"), Some("http://proxy:3128"));

        let proxy = proxy.with_https_proxy("http://secure:3128");
        assert_eq!(proxy.proxy_for_scheme("https"), Some("http://secure:3128"));
    }
}
