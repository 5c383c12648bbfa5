//! Outbound URL validation with SSRF and DNS rebinding protection.
//!
//! This crate decides whether a URL supplied on a caller's behalf (webhooks,
//! importers, mirrors, integrations) is safe to contact:
//! - Scheme, port, user-info and hostname syntax checks
//! - Canonical IP parsing (octal, hex, integer and IPv4-mapped IPv6 forms)
//! - Loopback / local network / link local / shared address space classification
//! - Static allowlist of domains, IPs and CIDR ranges with optional ports
//! - Proxy-aware short-circuiting driven by `http_proxy` / `no_proxy`
//! - DNS rebinding defense: the returned URI carries the resolved literal IP
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         UrlBlocker                           │
//! │  parse ─► scheme/user/host ─► extra URIs ─► proxy ─► resolve  │
//! │                                                    │         │
//! │  ┌────────────┐  ┌───────────┐  ┌──────────────────▼───────┐ │
//! │  │ Allowlist  │  │ ProxyEnv  │  │ Resolver (hard timeout)  │ │
//! │  └────────────┘  └───────────┘  └──────────────────────────┘ │
//! │                 ┌────────────────────┐                       │
//! │                 │ address predicates │ ─► port ─► rebind URI  │
//! │                 └────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use urlguard_core::{UrlBlocker, ValidationPolicy};
//!
//! let policy = ValidationPolicy::builder()
//!     .allow_local_network(false)
//!     .allow("10.0.0.0/8")
//!     .build();
//!
//! let result = UrlBlocker::new()
//!     .validate_url_with_proxy("https://example.org/hook", &policy)
//!     .await?;
//!
//! // Connect to `result.uri` (literal IP), send `result.hostname` as Host/SNI.
//! ```

pub mod address;
pub mod allowlist;
pub mod blocker;
pub mod config;
pub mod host;
pub mod pattern;
pub mod proxy_env;
pub mod resolver;

pub use address::{InvalidAddress, canonicalize, parse_address};
pub use allowlist::{Allowlist, AllowlistEntry};
pub use blocker::{
    UrlBlocker, ValidationResult, blocked_url, effective_port, validate, validate_url_with_proxy,
};
pub use config::{ConfigError, DenyAllRequests, ValidationPolicy, ValidationPolicyBuilder};
pub use host::Host;
pub use pattern::DomainPattern;
pub use proxy_env::ProxyEnv;
pub use resolver::{Resolve, ResolveError, ResolvedAddress, StaticResolver, SystemResolver};

use std::time::Duration;
use thiserror::Error;

/// Maximum accepted hostname length.
pub const MAX_HOSTNAME_LENGTH: usize = 1024;

/// Default budget for a single DNS resolution.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a URL was refused.
///
/// The `Display` text is shown verbatim to end users by calling layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    /// URL could not be parsed or has no host.
    InvalidUri,

    /// Host exceeds [`MAX_HOSTNAME_LENGTH`].
    HostTooLong,

    /// Non-ASCII input while `ascii_only` is set. Carries the raw input.
    NonAscii(String),

    /// Scheme not in the allowed list.
    SchemeNotAllowed(Vec<String>),

    /// Port not in the allowed list.
    PortNotAllowed(Vec<u16>),

    /// User-info does not start with an alphanumeric character.
    InvalidUsername,

    /// Host is neither an IP literal nor starts with an alphanumeric character.
    InvalidHostname,

    /// Host did not resolve.
    Unresolvable,

    /// Unspecified address or the primary loopback address.
    Localhost,

    /// Any other loopback address.
    Loopback,

    /// Private, unique-local or site-local range.
    LocalNetwork,

    /// Link local range (169.254.0.0/16, fe80::/10).
    LinkLocal,

    /// Carrier-grade NAT range (100.64.0.0/10).
    SharedAddressSpace,

    /// Documentation ranges (TEST-NET-1/2/3, 2001:db8::/32).
    Documentation,

    /// Deny-all mode and the target is not explicitly allowed.
    NotAllowlisted,
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::InvalidUri => write!(f, "URI is invalid"),
            BlockReason::HostTooLong => write!(
                f,
                "Host is too long (maximum is {} characters)",
                MAX_HOSTNAME_LENGTH
            ),
            BlockReason::NonAscii(input) => write!(f, "URI must be ascii only {:?}", input),
            BlockReason::SchemeNotAllowed(schemes) => {
                write!(f, "Only allowed schemes are {}", schemes.join(", "))
            }
            BlockReason::PortNotAllowed(ports) => {
                let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
                write!(f, "Only allowed ports are {}", ports.join(", "))
            }
            BlockReason::InvalidUsername => {
                write!(f, "Username needs to start with an alphanumeric character")
            }
            BlockReason::InvalidHostname => write!(f, "Hostname or IP address invalid"),
            BlockReason::Unresolvable => write!(f, "Host cannot be resolved or invalid"),
            BlockReason::Localhost => write!(f, "Requests to localhost are not allowed"),
            BlockReason::Loopback => write!(f, "Requests to loopback addresses are not allowed"),
            BlockReason::LocalNetwork => write!(f, "Requests to the local network are not allowed"),
            BlockReason::LinkLocal => {
                write!(f, "Requests to the link local network are not allowed")
            }
            BlockReason::SharedAddressSpace => {
                write!(f, "Requests to the shared address space are not allowed")
            }
            BlockReason::Documentation => {
                write!(f, "Requests to documentation address ranges are not allowed")
            }
            BlockReason::NotAllowlisted => write!(
                f,
                "Requests to hosts and IP addresses not on the Allow List are denied"
            ),
        }
    }
}

/// Errors returned by URL validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlBlockerError {
    /// Policy denial.
    #[error("URL is blocked: {0}")]
    Blocked(BlockReason),

    /// DNS resolution exceeded its budget.
    #[error("URL is blocked: DNS resolution for {host} timed out after {timeout:?}")]
    ResolutionTimeout { host: String, timeout: Duration },
}

impl UrlBlockerError {
    /// The reason text without the `URL is blocked: ` prefix.
    pub fn reason(&self) -> String {
        match self {
            UrlBlockerError::Blocked(reason) => reason.to_string(),
            UrlBlockerError::ResolutionTimeout { host, timeout } => {
                format!("DNS resolution for {} timed out after {:?}", host, timeout)
            }
        }
    }

    /// The policy reason, if this is a policy denial.
    pub fn block_reason(&self) -> Option<&BlockReason> {
        match self {
            UrlBlockerError::Blocked(reason) => Some(reason),
            UrlBlockerError::ResolutionTimeout { .. } => None,
        }
    }

    /// Both variants surface as a blocked request.
    pub fn is_blocked(&self) -> bool {
        true
    }

    /// Whether a caller may reasonably retry at a higher layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, UrlBlockerError::ResolutionTimeout { .. })
    }
}

impl From<BlockReason> for UrlBlockerError {
    fn from(reason: BlockReason) -> Self {
        UrlBlockerError::Blocked(reason)
    }
}

pub type Result<T> = std::result::Result<T, UrlBlockerError>;
