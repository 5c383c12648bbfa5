//! urlguard - outbound URL checker.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use urlguard_cli::{Cli, Commands, check_cmd, probe_cmd};
use urlguard_core::ProxyEnv;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,urlguard_core={level},urlguard_net={level},urlguard_cli={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // The only place the process environment is read.
    let proxy_env = ProxyEnv::from_env();

    match cli.command {
        Commands::Check(args) => {
            if check_cmd::run(args, proxy_env).await? {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Probe(args) => {
            probe_cmd::run(args, proxy_env).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
