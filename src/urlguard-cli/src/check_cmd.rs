//! `urlguard check`.

use anyhow::Result;
use serde::Serialize;
use urlguard_core::{ProxyEnv, UrlBlocker, UrlBlockerError, ValidationPolicy, ValidationResult};

use super::args::CheckArgs;

/// Outcome for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckOutcome {
    pub url: String,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub use_proxy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CheckOutcome {
    fn new(url: &str, result: std::result::Result<ValidationResult, UrlBlockerError>) -> Self {
        match result {
            Ok(result) => Self {
                url: url.to_string(),
                allowed: true,
                uri: Some(result.uri.to_string()),
                hostname: result.hostname,
                use_proxy: result.use_proxy,
                reason: None,
            },
            Err(e) => Self {
                url: url.to_string(),
                allowed: false,
                uri: None,
                hostname: None,
                use_proxy: false,
                reason: Some(e.reason()),
            },
        }
    }

    /// One line of text output.
    pub fn render(&self) -> String {
        if self.allowed {
            format!(
                "allowed {} (hostname={}, use_proxy={})",
                self.uri.as_deref().unwrap_or(&self.url),
                self.hostname.as_deref().unwrap_or("-"),
                self.use_proxy
            )
        } else {
            format!(
                "blocked {}: {}",
                self.url,
                self.reason.as_deref().unwrap_or("unknown")
            )
        }
    }
}

/// Validate every URL in turn.
pub async fn check_urls(
    blocker: &UrlBlocker,
    urls: &[String],
    policy: &ValidationPolicy,
) -> Vec<CheckOutcome> {
    let mut outcomes = Vec::with_capacity(urls.len());
    for url in urls {
        let result = blocker.validate_url_with_proxy(url, policy).await;
        outcomes.push(CheckOutcome::new(url, result));
    }
    outcomes
}

/// Run the command. Returns whether every URL was allowed.
pub async fn run(args: CheckArgs, proxy_env: ProxyEnv) -> Result<bool> {
    let policy = args.policy.to_policy(proxy_env)?;
    let outcomes = check_urls(&UrlBlocker::new(), &args.urls, &policy).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            println!("{}", outcome.render());
        }
    }

    Ok(outcomes.iter().all(|outcome| outcome.allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use urlguard_core::StaticResolver;

    fn blocker() -> UrlBlocker {
        UrlBlocker::with_resolver(
            StaticResolver::new().with_record("example.org", "93.184.216.34".parse().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_outcomes() {
        let urls = vec![
            "https://example.org/a".to_string(),
            "http://127.0.0.1/".to_string(),
        ];
        let outcomes = check_urls(&blocker(), &urls, &ValidationPolicy::default()).await;

        assert_eq!(
            outcomes[0].render(),
            "allowed https://93.184.216.34/a (hostname=example.org, use_proxy=false)"
        );
        assert_eq!(
            outcomes[1].render(),
            "blocked http://127.0.0.1/: Requests to localhost are not allowed"
        );
    }

    #[tokio::test]
    async fn test_json_shape() {
        let urls = vec!["http://127.0.0.2/".to_string()];
        let outcomes = check_urls(&blocker(), &urls, &ValidationPolicy::default()).await;

        let value = serde_json::to_value(&outcomes).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{
                "url": "http://127.0.0.2/",
                "allowed": false,
                "use_proxy": false,
                "reason": "Requests to loopback addresses are not allowed"
            }])
        );
    }
}
