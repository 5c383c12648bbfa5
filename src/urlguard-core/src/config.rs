//! Validation policy.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

use super::{DEFAULT_RESOLVE_TIMEOUT, proxy_env::ProxyEnv};

/// Policy loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Policy file could not be read.
    #[error("Failed to read policy file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Policy file is not valid TOML for a policy.
    #[error("Invalid policy: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Deny-all switch, either fixed or evaluated when a decision is made.
#[derive(Clone, Deserialize)]
#[serde(from = "bool")]
pub enum DenyAllRequests {
    /// Fixed value.
    Flag(bool),

    /// Evaluated at decision time, e.g. to follow a live instance setting.
    Deferred(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl DenyAllRequests {
    /// Wrap a predicate.
    pub fn deferred(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        DenyAllRequests::Deferred(Arc::new(predicate))
    }

    /// Current value.
    pub fn evaluate(&self) -> bool {
        match self {
            DenyAllRequests::Flag(value) => *value,
            DenyAllRequests::Deferred(predicate) => predicate(),
        }
    }
}

impl Default for DenyAllRequests {
    fn default() -> Self {
        DenyAllRequests::Flag(false)
    }
}

impl From<bool> for DenyAllRequests {
    fn from(value: bool) -> Self {
        DenyAllRequests::Flag(value)
    }
}

impl std::fmt::Debug for DenyAllRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyAllRequests::Flag(value) => f.debug_tuple("Flag").field(value).finish(),
            DenyAllRequests::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Per-call validation policy.
///
/// A plain value: build it once from instance settings plus call-site
/// overrides and pass it by reference into every validation.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationPolicy {
    /// Allowed URL schemes.
    #[serde(default = "default_schemes")]
    pub schemes: Vec<String>,

    /// Allowed ports. Empty allows any port.
    #[serde(default)]
    pub ports: Vec<u16>,

    /// Allow loopback and unspecified addresses.
    #[serde(default)]
    pub allow_localhost: bool,

    /// Allow private, link local, shared and documentation ranges.
    #[serde(default = "default_true")]
    pub allow_local_network: bool,

    /// Require user-info to start with an alphanumeric character.
    #[serde(default)]
    pub enforce_user: bool,

    /// Reject any non-ASCII character in the URL.
    #[serde(default)]
    pub ascii_only: bool,

    /// Substitute the resolved IP into the returned URI.
    #[serde(default = "default_true")]
    pub dns_rebind_protection: bool,

    /// Deny everything that is not explicitly allowed.
    #[serde(default)]
    pub deny_all_requests_except_allowed: DenyAllRequests,

    /// Trusted endpoints (e.g. object storage) exempt from IP checks.
    #[serde(default)]
    pub extra_allowed_uris: Vec<Url>,

    /// Domains, IPs and CIDR ranges, each with an optional port.
    #[serde(default)]
    pub outbound_allowlist: Vec<String>,

    /// The instance's own URLs (web and SSH).
    #[serde(default)]
    pub allowed_internal_uris: Vec<Url>,

    /// DNS resolution budget. Read as whole seconds from `resolve_timeout_secs`.
    #[serde(
        default = "default_resolve_timeout",
        rename = "resolve_timeout_secs",
        deserialize_with = "deserialize_secs"
    )]
    pub resolve_timeout: Duration,

    /// Proxy settings captured at the call boundary.
    #[serde(skip)]
    pub proxy_env: ProxyEnv,
}

fn default_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_resolve_timeout() -> Duration {
    DEFAULT_RESOLVE_TIMEOUT
}

fn deserialize_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            schemes: default_schemes(),
            ports: Vec::new(),
            allow_localhost: false,
            allow_local_network: true,
            enforce_user: false,
            ascii_only: false,
            dns_rebind_protection: true,
            deny_all_requests_except_allowed: DenyAllRequests::default(),
            extra_allowed_uris: Vec::new(),
            outbound_allowlist: Vec::new(),
            allowed_internal_uris: Vec::new(),
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            proxy_env: ProxyEnv::default(),
        }
    }
}

impl ValidationPolicy {
    /// Create a new default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for a policy.
    pub fn builder() -> ValidationPolicyBuilder {
        ValidationPolicyBuilder::new()
    }

    /// Parse a policy from TOML.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    /// Load a policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Whether any setting requires resolving and classifying the target.
    pub fn requires_ip_validation(&self) -> bool {
        self.deny_all_requests_except_allowed.evaluate()
            || self.dns_rebind_protection
            || !self.allow_local_network
            || !self.allow_localhost
    }
}

/// Builder for ValidationPolicy.
#[derive(Debug, Default)]
pub struct ValidationPolicyBuilder {
    policy: ValidationPolicy,
}

impl ValidationPolicyBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            policy: ValidationPolicy::new(),
        }
    }

    /// Replace the allowed schemes.
    pub fn schemes(mut self, schemes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.policy.schemes = schemes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the allowed ports.
    pub fn ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.policy.ports = ports.into_iter().collect();
        self
    }

    pub fn allow_localhost(mut self, allow: bool) -> Self {
        self.policy.allow_localhost = allow;
        self
    }

    pub fn allow_local_network(mut self, allow: bool) -> Self {
        self.policy.allow_local_network = allow;
        self
    }

    pub fn enforce_user(mut self, enforce: bool) -> Self {
        self.policy.enforce_user = enforce;
        self
    }

    pub fn ascii_only(mut self, ascii_only: bool) -> Self {
        self.policy.ascii_only = ascii_only;
        self
    }

    pub fn dns_rebind_protection(mut self, enabled: bool) -> Self {
        self.policy.dns_rebind_protection = enabled;
        self
    }

    /// Set deny-all from a bool or a [`DenyAllRequests::deferred`] predicate.
    pub fn deny_all_requests_except_allowed(mut self, deny: impl Into<DenyAllRequests>) -> Self {
        self.policy.deny_all_requests_except_allowed = deny.into();
        self
    }

    /// Add a trusted endpoint.
    pub fn extra_allowed_uri(mut self, uri: Url) -> Self {
        self.policy.extra_allowed_uris.push(uri);
        self
    }

    /// Add an allowlist entry.
    pub fn allow(mut self, entry: impl Into<String>) -> Self {
        self.policy.outbound_allowlist.push(entry.into());
        self
    }

    /// Add multiple allowlist entries.
    pub fn allow_all(mut self, entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        for entry in entries {
            self.policy.outbound_allowlist.push(entry.into());
        }
        self
    }

    /// Add one of the instance's own URLs.
    pub fn allowed_internal_uri(mut self, uri: Url) -> Self {
        self.policy.allowed_internal_uris.push(uri);
        self
    }

    /// Set the DNS budget.
    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.policy.resolve_timeout = timeout;
        self
    }

    pub fn proxy_env(mut self, proxy_env: ProxyEnv) -> Self {
        self.policy.proxy_env = proxy_env;
        self
    }

    /// Build the policy.
    pub fn build(self) -> ValidationPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_defaults() {
        let policy = ValidationPolicy::default();
        assert_eq!(policy.schemes, vec!["http", "https"]);
        assert!(policy.ports.is_empty());
        assert!(!policy.allow_localhost);
        assert!(policy.allow_local_network);
        assert!(policy.dns_rebind_protection);
        assert!(!policy.deny_all_requests_except_allowed.evaluate());
        assert_eq!(policy.resolve_timeout, Duration::from_secs(5));
        assert!(policy.requires_ip_validation());
    }

    #[test]
    fn test_requires_ip_validation() {
        let policy = ValidationPolicy::builder()
            .allow_localhost(true)
            .allow_local_network(true)
            .dns_rebind_protection(false)
            .build();
        assert!(!policy.requires_ip_validation());

        let policy = ValidationPolicy::builder()
            .allow_localhost(true)
            .dns_rebind_protection(false)
            .deny_all_requests_except_allowed(true)
            .build();
        assert!(policy.requires_ip_validation());
    }

    #[test]
    fn test_deferred_deny_all() {
        let flag = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&flag);
        let deny = DenyAllRequests::deferred(move || observed.load(Ordering::SeqCst));

        assert!(!deny.evaluate());
        flag.store(true, Ordering::SeqCst);
        assert!(deny.evaluate());
        assert_eq!(format!("{:?}", deny), "Deferred(..)");
    }

    #[test]
    fn test_from_toml() {
        let policy = ValidationPolicy::from_toml_str(
            r#"
            schemes = ["https"]
            ports = [443]
            allow_local_network = false
            deny_all_requests_except_allowed = true
            outbound_allowlist = ["10.0.0.0/8", "example.com:8443"]
            extra_allowed_uris = ["http://minio.svc:9000"]
            resolve_timeout_secs = 2
            "#,
        )
        .unwrap();

        assert_eq!(policy.schemes, vec!["https"]);
        assert_eq!(policy.ports, vec![443]);
        assert!(!policy.allow_local_network);
        assert!(!policy.allow_localhost);
        assert!(policy.dns_rebind_protection);
        assert!(policy.deny_all_requests_except_allowed.evaluate());
        assert_eq!(policy.outbound_allowlist.len(), 2);
        assert_eq!(policy.extra_allowed_uris[0].port(), Some(9000));
        assert_eq!(policy.resolve_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        let err = ValidationPolicy::from_toml_str("ports = [\"eighty\"]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_builder_timeout() {
        let policy = ValidationPolicy::builder()
            .resolve_timeout(Duration::from_millis(1500))
            .build();
        assert_eq!(policy.resolve_timeout, Duration::from_millis(1500));
    }
}
