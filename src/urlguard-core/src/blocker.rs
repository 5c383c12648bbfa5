//! Outbound URL validation pipeline.
//!
//! Stages, each of which may end validation early:
//!
//! 1. Parse, host length and `ascii_only`
//! 2. Scheme, user-info and hostname syntax (skipped for internal URIs)
//! 3. `extra_allowed_uris` short-circuit
//! 4. Proxy short-circuit
//! 5. Domain allowlist
//! 6. Resolution with a hard timeout
//! 7. Per-address allow/deny
//! 8. Port
//! 9. Rebinding: the returned URI carries the resolved IP

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, trace};
use url::Url;

use super::{
    BlockReason, MAX_HOSTNAME_LENGTH, Result, UrlBlockerError, address,
    allowlist::Allowlist,
    config::ValidationPolicy,
    host,
    resolver::{self, Resolve, ResolveError, SystemResolver},
};

/// Outcome of a successful validation.
///
/// When `hostname` is set, the host segment of `uri` is the resolved IP
/// literal and `hostname` is the name the caller asked for. Connect to the
/// literal; send `hostname` as `Host` and TLS SNI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub uri: Url,
    pub hostname: Option<String>,
    pub use_proxy: bool,
}

impl ValidationResult {
    fn unchanged(uri: Url, use_proxy: bool) -> Self {
        Self {
            uri,
            hostname: None,
            use_proxy,
        }
    }

    /// Split into the `(uri, hostname)` pair.
    pub fn into_parts(self) -> (Url, Option<String>) {
        (self.uri, self.hostname)
    }

    /// The URI with the original hostname put back, for building the request
    /// line and `Host` header.
    pub fn request_uri(&self) -> Url {
        let Some(hostname) = self.hostname.as_deref() else {
            return self.uri.clone();
        };
        let mut uri = self.uri.clone();
        match uri.set_host(Some(hostname)) {
            Ok(()) => uri,
            Err(_) => self.uri.clone(),
        }
    }
}

/// URL validator.
///
/// Stateless apart from the resolver: every call parses, resolves and
/// classifies from scratch, so one instance can serve concurrent callers.
#[derive(Clone)]
pub struct UrlBlocker {
    resolver: Arc<dyn Resolve>,
}

impl std::fmt::Debug for UrlBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlBlocker").finish_non_exhaustive()
    }
}

impl Default for UrlBlocker {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlBlocker {
    /// Validator using the system resolver.
    pub fn new() -> Self {
        Self::with_resolver(SystemResolver)
    }

    /// Validator using a custom resolver.
    pub fn with_resolver(resolver: impl Resolve + 'static) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    /// Validate and return `(uri, hostname)`.
    pub async fn validate(
        &self,
        url: &str,
        policy: &ValidationPolicy,
    ) -> Result<(Url, Option<String>)> {
        self.validate_url_with_proxy(url, policy)
            .await
            .map(ValidationResult::into_parts)
    }

    /// Whether `url` is refused under `policy`.
    pub async fn blocked_url(&self, url: &str, policy: &ValidationPolicy) -> bool {
        self.validate_url_with_proxy(url, policy).await.is_err()
    }

    /// Validate and return the full result, including the proxy decision.
    pub async fn validate_url_with_proxy(
        &self,
        url: &str,
        policy: &ValidationPolicy,
    ) -> Result<ValidationResult> {
        let uri = parse_uri(url, policy)?;
        let hostname = target_host(&uri).ok_or_else(|| deny("-", BlockReason::InvalidUri))?;
        let port = effective_port(&uri);
        let internal = matches_any(&policy.allowed_internal_uris, &uri, port);

        if !internal {
            validate_scheme(&uri, &hostname, policy)?;
            if policy.enforce_user {
                validate_user(&uri, &hostname)?;
            }
            validate_hostname(&uri, &hostname)?;
        }

        if matches_any(&policy.extra_allowed_uris, &uri, port) {
            return Ok(self.rebind_extra_allowed(uri, hostname, port, policy).await);
        }

        if policy.proxy_env.applies_to(&hostname, port) {
            validate_port(port, &hostname, policy, internal)?;
            trace!(host = %hostname, "proxy configured, skipping resolution");
            return Ok(ValidationResult::unchanged(uri, true));
        }

        if !policy.requires_ip_validation() {
            validate_port(port, &hostname, policy, internal)?;
            return Ok(ValidationResult::unchanged(uri, false));
        }

        let allowlist = Allowlist::parse(&policy.outbound_allowlist);
        if allowlist.domain_allowed(&hostname, port) {
            validate_port(port, &hostname, policy, internal)?;
            return Ok(ValidationResult::unchanged(uri, false));
        }

        let addrs = match resolver::resolve(
            self.resolver.as_ref(),
            &hostname,
            port.unwrap_or(0),
            policy.resolve_timeout,
        )
        .await
        {
            Ok(addrs) => addrs,
            Err(ResolveError::Timeout { host, timeout }) => {
                debug!(host = %host, ?timeout, "outbound request blocked: DNS timeout");
                return Err(UrlBlockerError::ResolutionTimeout { host, timeout });
            }
            Err(ResolveError::Failure { reason, .. }) => {
                debug!(host = %hostname, reason = %reason, "host did not resolve");
                let deny_all = policy.deny_all_requests_except_allowed.evaluate();
                if internal
                    || (!deny_all
                        && (policy.proxy_env.is_configured() || !policy.dns_rebind_protection))
                {
                    validate_port(port, &hostname, policy, internal)?;
                    return Ok(ValidationResult::unchanged(uri, false));
                }
                return Err(deny(&hostname, BlockReason::Unresolvable));
            }
        };

        let deny_all = policy.deny_all_requests_except_allowed.evaluate();
        for addr in &addrs {
            check_address(
                addr.canonical_ip(),
                port,
                &hostname,
                internal,
                deny_all,
                &allowlist,
                policy,
            )?;
        }

        validate_port(port, &hostname, policy, internal)?;

        if !policy.dns_rebind_protection || address::parse_address(&hostname).is_ok() {
            return Ok(ValidationResult::unchanged(uri, false));
        }

        let Some(first) = addrs.first() else {
            return Err(deny(&hostname, BlockReason::Unresolvable));
        };

        let rebound = with_ip_host(&uri, first.canonical_ip())
            .ok_or_else(|| deny(&hostname, BlockReason::InvalidUri))?;
        trace!(host = %hostname, ip = %first.canonical_ip(), "rebound URI to resolved address");

        Ok(ValidationResult {
            uri: rebound,
            hostname: Some(hostname),
            use_proxy: false,
        })
    }

    /// Trusted endpoints skip every IP check. Resolution is best effort and
    /// only used to pin the address.
    async fn rebind_extra_allowed(
        &self,
        uri: Url,
        hostname: String,
        port: Option<u16>,
        policy: &ValidationPolicy,
    ) -> ValidationResult {
        if !policy.dns_rebind_protection || address::parse_address(&hostname).is_ok() {
            return ValidationResult::unchanged(uri, false);
        }

        let resolved = resolver::resolve(
            self.resolver.as_ref(),
            &hostname,
            port.unwrap_or(0),
            policy.resolve_timeout,
        )
        .await;

        match resolved {
            Ok(addrs) => {
                let rebound = addrs
                    .first()
                    .and_then(|first| with_ip_host(&uri, first.canonical_ip()));
                match rebound {
                    Some(rebound) => ValidationResult {
                        uri: rebound,
                        hostname: Some(hostname),
                        use_proxy: false,
                    },
                    None => ValidationResult::unchanged(uri, false),
                }
            }
            Err(e) => {
                debug!(host = %hostname, error = %e, "trusted endpoint did not resolve");
                ValidationResult::unchanged(uri, false)
            }
        }
    }
}

/// Validate with the system resolver and return `(uri, hostname)`.
pub async fn validate(url: &str, policy: &ValidationPolicy) -> Result<(Url, Option<String>)> {
    UrlBlocker::new().validate(url, policy).await
}

/// Validate with the system resolver.
pub async fn validate_url_with_proxy(
    url: &str,
    policy: &ValidationPolicy,
) -> Result<ValidationResult> {
    UrlBlocker::new().validate_url_with_proxy(url, policy).await
}

/// Whether `url` is refused under `policy`, using the system resolver.
pub async fn blocked_url(url: &str, policy: &ValidationPolicy) -> bool {
    UrlBlocker::new().blocked_url(url, policy).await
}

fn deny(host: &str, reason: BlockReason) -> UrlBlockerError {
    debug!(host, %reason, "outbound request blocked");
    UrlBlockerError::Blocked(reason)
}

fn parse_uri(raw: &str, policy: &ValidationPolicy) -> Result<Url> {
    let uri = Url::parse(raw.trim()).map_err(|_| deny("-", BlockReason::InvalidUri))?;

    let host_len = uri.host_str().map(str::len).unwrap_or(0);
    if host_len == 0 {
        return Err(deny("-", BlockReason::InvalidUri));
    }
    if host_len > MAX_HOSTNAME_LENGTH {
        return Err(deny("-", BlockReason::HostTooLong));
    }

    if policy.ascii_only && !raw.is_ascii() {
        return Err(deny("-", BlockReason::NonAscii(raw.to_string())));
    }

    Ok(uri)
}

/// Host as used for resolution and matching: IPv6 without brackets.
fn target_host(uri: &Url) -> Option<String> {
    let host = match uri.host()? {
        url::Host::Domain(domain) => domain.to_string(),
        url::Host::Ipv4(ip) => ip.to_string(),
        url::Host::Ipv6(ip) => ip.to_string(),
    };
    (!host.is_empty()).then_some(host)
}

/// Explicit port, else the scheme's default. Knows `ssh` and `git` on top
/// of the schemes the URL parser has defaults for.
pub fn effective_port(uri: &Url) -> Option<u16> {
    uri.port_or_known_default().or(match uri.scheme() {
        "ssh" => Some(22),
        "git" => Some(9418),
        _ => None,
    })
}

/// Same scheme, host and effective port as one of `candidates`.
fn matches_any(candidates: &[Url], uri: &Url, port: Option<u16>) -> bool {
    candidates.iter().any(|candidate| {
        candidate.scheme().eq_ignore_ascii_case(uri.scheme())
            && candidate.host_str().is_some_and(|host| {
                uri.host_str()
                    .is_some_and(|target| target.eq_ignore_ascii_case(host))
            })
            && effective_port(candidate) == port
    })
}

fn validate_scheme(uri: &Url, hostname: &str, policy: &ValidationPolicy) -> Result<()> {
    if policy.schemes.is_empty()
        || policy
            .schemes
            .iter()
            .any(|scheme| scheme.eq_ignore_ascii_case(uri.scheme()))
    {
        return Ok(());
    }
    Err(deny(
        hostname,
        BlockReason::SchemeNotAllowed(policy.schemes.clone()),
    ))
}

fn validate_user(uri: &Url, hostname: &str) -> Result<()> {
    let username = uri.username();
    if username.is_empty() {
        return Ok(());
    }

    match urlencoding::decode(username) {
        Ok(decoded) if host::starts_with_alphanumeric(&decoded) => Ok(()),
        _ => Err(deny(hostname, BlockReason::InvalidUsername)),
    }
}

fn validate_hostname(uri: &Url, hostname: &str) -> Result<()> {
    match uri.host() {
        Some(url::Host::Ipv4(_)) | Some(url::Host::Ipv6(_)) => Ok(()),
        Some(url::Host::Domain(domain))
            if address::parse_address(domain).is_ok()
                || host::starts_with_alphanumeric(domain) =>
        {
            Ok(())
        }
        _ => Err(deny(hostname, BlockReason::InvalidHostname)),
    }
}

fn validate_port(
    port: Option<u16>,
    hostname: &str,
    policy: &ValidationPolicy,
    internal: bool,
) -> Result<()> {
    if internal || policy.ports.is_empty() {
        return Ok(());
    }
    if port.is_some_and(|port| policy.ports.contains(&port)) {
        return Ok(());
    }
    Err(deny(hostname, BlockReason::PortNotAllowed(policy.ports.clone())))
}

fn check_address(
    ip: IpAddr,
    port: Option<u16>,
    hostname: &str,
    internal: bool,
    deny_all: bool,
    allowlist: &Allowlist,
    policy: &ValidationPolicy,
) -> Result<()> {
    if internal || allowlist.ip_allowed(ip, port) {
        return Ok(());
    }

    if deny_all {
        return Err(deny(hostname, BlockReason::NotAllowlisted));
    }

    // Object storage endpoints are reached through the broadcast literal.
    if address::is_limited_broadcast(ip) {
        return Ok(());
    }

    if !policy.allow_localhost {
        if address::is_localhost(ip) {
            return Err(deny(hostname, BlockReason::Localhost));
        }
        if address::is_loopback(ip) {
            return Err(deny(hostname, BlockReason::Loopback));
        }
    }

    if !policy.allow_local_network {
        if address::is_unspecified(ip) || address::is_private_range(ip) {
            return Err(deny(hostname, BlockReason::LocalNetwork));
        }
        if address::is_link_local(ip) {
            return Err(deny(hostname, BlockReason::LinkLocal));
        }
        if address::is_shared_address_space(ip) {
            return Err(deny(hostname, BlockReason::SharedAddressSpace));
        }
        if address::is_documentation_range(ip) {
            return Err(deny(hostname, BlockReason::Documentation));
        }
    }

    Ok(())
}

fn with_ip_host(uri: &Url, ip: IpAddr) -> Option<Url> {
    let mut rebound = uri.clone();
    rebound.set_ip_host(ip).ok()?;
    Some(rebound)
}
