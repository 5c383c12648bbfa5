//! Connections bound to the address chosen during validation.
//!
//! The hostname is never resolved again here. When validation substituted a
//! literal IP, the connection dials that IP and keeps the original hostname
//! as [`Connection::hostname_override`] for the `Host` header and TLS SNI.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};
use url::Url;
use urlguard_core::{ProxyEnv, ValidationResult, effective_port};

use super::{
    ConnectionError, Result,
    buffered_io::{HEADER_READ_TIMEOUT, TimeoutBufferedIo},
    proxy::ProxySettings,
};

/// A dialable target.
#[derive(Debug, Clone)]
pub struct Connection {
    uri: Url,
    request_url: Url,
    address: String,
    hostname_override: Option<String>,
    port: u16,
    use_ssl: bool,
    proxy: Option<ProxySettings>,
    header_read_timeout: Duration,
}

/// Build a connection from a validation result.
///
/// `proxy_env` must be the environment the result was validated against;
/// it supplies the proxy URI when `result.use_proxy` is set.
pub fn build_connection(result: &ValidationResult, proxy_env: &ProxyEnv) -> Result<Connection> {
    let uri = result.uri.clone();

    let address = match uri.host() {
        Some(url::Host::Ipv4(ip)) => ip.to_string(),
        Some(url::Host::Ipv6(ip)) => ip.to_string(),
        Some(url::Host::Domain(domain)) => domain.to_string(),
        None => return Err(ConnectionError::Client(format!("{} has no host", uri.scheme()))),
    };

    let port = effective_port(&uri)
        .ok_or_else(|| ConnectionError::Client(format!("no known port for {}", uri.scheme())))?;

    let proxy = if result.use_proxy {
        let raw = proxy_env.proxy_for_scheme(uri.scheme()).ok_or_else(|| {
            ConnectionError::Proxy(format!("no proxy configured for {}", uri.scheme()))
        })?;
        Some(ProxySettings::parse(raw)?)
    } else {
        None
    };

    Ok(Connection {
        request_url: result.request_uri(),
        use_ssl: uri.scheme() == "https",
        uri,
        address,
        hostname_override: result.hostname.clone(),
        port,
        proxy,
        header_read_timeout: HEADER_READ_TIMEOUT,
    })
}

impl Connection {
    /// Set the budget for reading proxy response headers.
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Host to dial: the validated IP literal, or the hostname when no
    /// substitution happened.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Original hostname, set when `address` is a substituted IP.
    pub fn hostname_override(&self) -> Option<&str> {
        self.hostname_override.as_deref()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn use_ssl(&self) -> bool {
        self.use_ssl
    }

    pub fn proxy(&self) -> Option<&ProxySettings> {
        self.proxy.as_ref()
    }

    /// The validated URI, host segment as dialled.
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// The URI with the original hostname, for the request line.
    pub fn request_url(&self) -> &Url {
        &self.request_url
    }

    /// Name to present in `Host` and TLS SNI.
    pub fn server_name(&self) -> &str {
        self.hostname_override.as_deref().unwrap_or(&self.address)
    }

    /// `host[:port]` as shown in `Host` headers, with IPv6 bracketed and the
    /// scheme's default port omitted.
    pub fn addr_port(&self) -> String {
        let host = bracket(self.server_name());
        let default_port = if self.use_ssl { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// The pinned socket address, when `address` is an IP literal.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.address.parse().ok()?;
        Some(SocketAddr::new(ip, self.port))
    }

    /// Open a TCP stream to the target, or to the proxy.
    ///
    /// HTTPS targets behind a proxy get an HTTP `CONNECT` tunnel, so the
    /// returned stream is ready for the TLS handshake. Plain HTTP through a
    /// proxy returns the proxy stream as is; send absolute-form requests.
    pub async fn connect(&self, timeout: Duration) -> Result<TcpStream> {
        match &self.proxy {
            Some(proxy) => {
                let mut stream =
                    dial(proxy.host(), proxy.port(), &proxy.to_string(), timeout).await?;
                if self.use_ssl {
                    self.establish_tunnel(&mut stream, proxy).await?;
                }
                Ok(stream)
            }
            None => {
                let target = format!("{}:{}", bracket(&self.address), self.port);
                match self.socket_addr() {
                    Some(addr) => {
                        trace!(addr = %addr, "connecting to validated address");
                        connect_with_timeout(addr, &target, timeout).await
                    }
                    None => dial(&self.address, self.port, &target, timeout).await,
                }
            }
        }
    }

    /// Build an HTTP client that can only reach the validated address.
    ///
    /// The hostname is pinned to the validated IP, redirects are not
    /// followed (each hop would need its own validation), and the proxy is
    /// either the configured one or disabled outright.
    pub fn client_builder(&self) -> Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .read_timeout(self.header_read_timeout)
            .tcp_nodelay(true);

        if let (Some(hostname), Some(addr)) = (self.hostname_override(), self.socket_addr()) {
            builder = builder.resolve(hostname, addr);
        }

        match &self.proxy {
            Some(settings) => {
                let mut proxy = reqwest::Proxy::all(settings.url().as_str())
                    .map_err(|e| ConnectionError::InvalidProxy(e.to_string()))?;
                if let Some((user, password)) = settings.credentials() {
                    proxy = proxy.basic_auth(user, password);
                }
                builder = builder.proxy(proxy);
            }
            None => builder = builder.no_proxy(),
        }

        Ok(builder)
    }

    async fn establish_tunnel(&self, stream: &mut TcpStream, proxy: &ProxySettings) -> Result<()> {
        let authority = format!("{}:{}", bracket(self.server_name()), self.port);

        let mut request = format!("CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n");
        if let Some(authorization) = proxy.authorization() {
            request.push_str(&format!("Proxy-Authorization: {authorization}\r\n"));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;

        let mut reader =
            TimeoutBufferedIo::new(&mut *stream).with_header_read_timeout(self.header_read_timeout);
        let headers = reader.read_headers(None).await?;
        let (_, leftover) = reader.into_inner();

        let status_line = headers.first().map(String::as_str).unwrap_or("");
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok());

        match status {
            Some(code) if (200..300).contains(&code) => {}
            _ => {
                warn!(proxy = %proxy, status = status_line, "proxy refused CONNECT");
                return Err(ConnectionError::Proxy(format!(
                    "CONNECT to {authority} failed: {status_line}"
                )));
            }
        }

        if !leftover.is_empty() {
            return Err(ConnectionError::Proxy(
                "unexpected data after CONNECT response".to_string(),
            ));
        }

        debug!(proxy = %proxy, target = %authority, "proxy tunnel established");
        Ok(())
    }
}

fn bracket(host: &str) -> String {
    if host.contains(':') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}

async fn connect_with_timeout(
    addr: SocketAddr,
    display: &str,
    timeout: Duration,
) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(ConnectionError::ConnectTimeout {
            addr: display.to_string(),
            timeout,
        }),
    }
}

/// Connect by name. Used for the proxy itself and for targets validated
/// without address substitution.
async fn dial(host: &str, port: u16, display: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(stream) => Ok(stream?),
        Err(_) => Err(ConnectionError::ConnectTimeout {
            addr: display.to_string(),
            timeout,
        }),
    }
}
