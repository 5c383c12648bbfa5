//! Domain patterns used by allowlist entries.

use super::host::{self, Host};
use super::{BlockReason, Result, UrlBlockerError};

/// A domain an allowlist entry refers to.
///
/// A plain entry covers that name only. Subdomains are covered when the entry
/// says so with a `*.` (subdomains) or `**.` (domain and subdomains) prefix.
/// The stored domain is lowercase punycode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainPattern {
    /// `example.com`
    Exact(String),

    /// `*.example.com`
    Subdomains(String),

    /// `**.example.com`
    DomainAndSubdomains(String),
}

impl DomainPattern {
    /// Parse an entry. Bare `*` and empty domains are rejected.
    pub fn parse(pattern: &str) -> Result<Self> {
        let pattern = pattern.trim();

        let (wrap, domain): (fn(String) -> Self, &str) =
            if let Some(rest) = pattern.strip_prefix("**.") {
                (DomainPattern::DomainAndSubdomains, rest)
            } else if let Some(rest) = pattern.strip_prefix("*.") {
                (DomainPattern::Subdomains, rest)
            } else {
                (DomainPattern::Exact, pattern)
            };

        if domain.trim().is_empty() || domain.contains('*') {
            return Err(UrlBlockerError::Blocked(BlockReason::InvalidHostname));
        }
        let domain = Host::parse(domain)?;
        Ok(wrap(domain.as_str().to_string()))
    }

    /// The domain without its wildcard prefix.
    pub fn domain(&self) -> &str {
        match self {
            DomainPattern::Exact(domain)
            | DomainPattern::Subdomains(domain)
            | DomainPattern::DomainAndSubdomains(domain) => domain,
        }
    }

    /// Whether `candidate`, already normalised, is covered.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            DomainPattern::Exact(domain) => host::domain_eq(candidate, domain),
            DomainPattern::Subdomains(domain) => host::is_strict_subdomain(candidate, domain),
            DomainPattern::DomainAndSubdomains(domain) => {
                host::is_subdomain_or_equal(candidate, domain)
            }
        }
    }
}

impl std::fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self {
            DomainPattern::Exact(_) => "",
            DomainPattern::Subdomains(_) => "*.",
            DomainPattern::DomainAndSubdomains(_) => "**.",
        };
        write!(f, "{}{}", prefix, self.domain())
    }
}

impl std::str::FromStr for DomainPattern {
    type Err = UrlBlockerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!(
            DomainPattern::parse("**.gitlab.com").unwrap(),
            DomainPattern::DomainAndSubdomains("gitlab.com".into())
        );
        assert_eq!(
            DomainPattern::parse("*.gitlab.com").unwrap(),
            DomainPattern::Subdomains("gitlab.com".into())
        );
        assert_eq!(
            DomainPattern::parse(" GitLab.com ").unwrap(),
            DomainPattern::Exact("gitlab.com".into())
        );
    }

    #[test]
    fn test_parse_rejects() {
        assert!(DomainPattern::parse("*").is_err());
        assert!(DomainPattern::parse("*.").is_err());
        assert!(DomainPattern::parse("**.*.example.com").is_err());
        assert!(DomainPattern::parse("garbage$^$%#$^&$").is_err());
    }

    #[test]
    fn test_matches() {
        let exact = DomainPattern::parse("example.com").unwrap();
        assert!(exact.matches("example.com"));
        assert!(!exact.matches("www.example.com"));

        let subdomains = DomainPattern::parse("*.example.com").unwrap();
        assert!(!subdomains.matches("example.com"));
        assert!(subdomains.matches("a.b.example.com"));

        let both = DomainPattern::parse("**.example.com").unwrap();
        assert!(both.matches("example.com"));
        assert!(both.matches("www.example.com"));
        assert!(!both.matches("badexample.com"));
    }

    #[test]
    fn test_idna_and_display() {
        let pattern = DomainPattern::parse("*.ğitlab.com").unwrap();
        assert_eq!(pattern.domain(), "xn--itlab-j1a.com");
        assert_eq!(pattern.to_string(), "*.xn--itlab-j1a.com");
        assert!(pattern.matches("api.xn--itlab-j1a.com"));
    }
}
