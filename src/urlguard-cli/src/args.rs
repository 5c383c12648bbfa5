//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use urlguard_core::{ProxyEnv, ValidationPolicy};

/// Check outbound URLs for SSRF and DNS rebinding risks.
#[derive(Debug, Parser)]
#[command(name = "urlguard", version, about)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Validate one or more URLs
    Check(CheckArgs),

    /// Validate a URL, connect and read response headers
    Probe(ProbeArgs),
}

/// Arguments for `urlguard check`.
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// URLs to validate
    #[arg(required = true)]
    pub urls: Vec<String>,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `urlguard probe`.
#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Plain HTTP URL to probe
    pub url: String,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Total budget for reading response headers, in seconds
    #[arg(long, default_value_t = 20)]
    pub header_timeout: u64,

    /// TCP connect timeout, in seconds
    #[arg(long, default_value_t = 10)]
    pub connect_timeout: u64,
}

/// Policy source and overrides shared by all subcommands.
#[derive(Debug, Clone, Default, Args)]
pub struct PolicyArgs {
    /// TOML policy file
    #[arg(long, short = 'c', env = "URLGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Allow loopback and unspecified addresses
    #[arg(long)]
    pub allow_localhost: bool,

    /// Deny private, link local and shared address ranges
    #[arg(long)]
    pub deny_local_network: bool,

    /// Keep the hostname in the returned URI
    #[arg(long)]
    pub no_dns_rebind_protection: bool,

    /// Deny everything not on the allowlist
    #[arg(long)]
    pub deny_all: bool,

    /// Allowlist entry (domain, IP or CIDR, optional :port)
    #[arg(long = "allow", value_name = "ENTRY")]
    pub allow: Vec<String>,

    /// Allowed scheme (replaces the policy's list)
    #[arg(long = "scheme", value_name = "SCHEME")]
    pub schemes: Vec<String>,

    /// Allowed port (replaces the policy's list)
    #[arg(long = "port", value_name = "PORT")]
    pub ports: Vec<u16>,

    /// DNS resolution timeout, in seconds
    #[arg(long, value_name = "SECS")]
    pub resolve_timeout: Option<u64>,
}

impl PolicyArgs {
    /// Load the policy file, if any, and apply command-line overrides.
    pub fn to_policy(&self, proxy_env: ProxyEnv) -> Result<ValidationPolicy> {
        let mut policy = match &self.config {
            Some(path) => ValidationPolicy::load(path)
                .with_context(|| format!("Failed to load policy from {}", path.display()))?,
            None => ValidationPolicy::default(),
        };

        if self.allow_localhost {
            policy.allow_localhost = true;
        }
        if self.deny_local_network {
            policy.allow_local_network = false;
        }
        if self.no_dns_rebind_protection {
            policy.dns_rebind_protection = false;
        }
        if self.deny_all {
            policy.deny_all_requests_except_allowed = true.into();
        }
        policy.outbound_allowlist.extend(self.allow.iter().cloned());
        if !self.schemes.is_empty() {
            policy.schemes = self.schemes.clone();
        }
        if !self.ports.is_empty() {
            policy.ports = self.ports.clone();
        }
        if let Some(secs) = self.resolve_timeout {
            policy.resolve_timeout = Duration::from_secs(secs);
        }
        policy.proxy_env = proxy_env;

        Ok(policy)
    }
}
