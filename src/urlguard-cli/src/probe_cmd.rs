//! `urlguard probe`.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::{Position, Url};
use urlguard_core::{ProxyEnv, UrlBlocker};
use urlguard_net::{Connection, TimeoutBufferedIo, build_connection};

use super::args::ProbeArgs;

const USER_AGENT: &str = concat!("urlguard/", env!("CARGO_PKG_VERSION"));

/// Build a `HEAD` request for the connection.
///
/// Through a proxy the request target is the absolute URL; otherwise it is
/// the path and query, with the original hostname in `Host`.
pub fn head_request(connection: &Connection) -> String {
    let url: &Url = connection.request_url();
    let target = if connection.proxy().is_some() {
        url.as_str().to_string()
    } else {
        url[Position::BeforePath..].to_string()
    };

    format!(
        "HEAD {target} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\nConnection: close\r\n\r\n",
        connection.addr_port()
    )
}

/// Run the command.
pub async fn run(args: ProbeArgs, proxy_env: ProxyEnv) -> Result<()> {
    let policy = args.policy.to_policy(proxy_env.clone())?;
    let result = UrlBlocker::new()
        .validate_url_with_proxy(&args.url, &policy)
        .await?;

    if result.uri.scheme() != "http" {
        bail!("probe only speaks plain HTTP, got {}", result.uri.scheme());
    }

    let header_budget = Duration::from_secs(args.header_timeout);
    let connection = build_connection(&result, &proxy_env)?.with_header_read_timeout(header_budget);
    debug!(
        address = connection.address(),
        hostname = ?connection.hostname_override(),
        via_proxy = connection.proxy().is_some(),
        "probing"
    );

    let mut stream = connection
        .connect(Duration::from_secs(args.connect_timeout))
        .await?;
    stream
        .write_all(head_request(&connection).as_bytes())
        .await?;

    let mut reader = TimeoutBufferedIo::new(stream).with_header_read_timeout(header_budget);
    for line in reader.read_headers(None).await? {
        println!("{line}");
    }

    Ok(())
}
