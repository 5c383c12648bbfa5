//! Connections to validated URLs.
//!
//! Takes a [`ValidationResult`](urlguard_core::ValidationResult) and turns it
//! into something that can actually be dialled:
//! - [`Connection`] is bound to the literal IP chosen during validation and
//!   carries the original hostname separately for `Host` and TLS SNI
//! - Proxy routing with credentials taken from the captured environment
//! - [`TimeoutBufferedIo`] bounds the total time spent reading response
//!   headers, so a peer trickling bytes cannot hold a request open forever
//!
//! # Example
//!
//! ```rust,ignore
//! use urlguard_core::{ProxyEnv, UrlBlocker, ValidationPolicy};
//! use urlguard_net::build_connection;
//!
//! let proxy_env = ProxyEnv::from_env();
//! let policy = ValidationPolicy::builder().proxy_env(proxy_env.clone()).build();
//! let result = UrlBlocker::new()
//!     .validate_url_with_proxy("https://example.org/hook", &policy)
//!     .await?;
//!
//! let connection = build_connection(&result, &proxy_env)?;
//! let client = connection.client_builder()?.build()?;
//! client.post(connection.request_url()).send().await?;
//! ```

pub mod buffered_io;
pub mod connection;
pub mod proxy;

pub use buffered_io::{DEFAULT_READ_TIMEOUT, HEADER_READ_TIMEOUT, MAX_LINE_LENGTH, TimeoutBufferedIo};
pub use connection::{Connection, build_connection};
pub use proxy::ProxySettings;

use std::time::Duration;

use thiserror::Error;
use urlguard_core::UrlBlockerError;

/// Errors raised while connecting to or reading from a validated target.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The target was refused during validation.
    #[error(transparent)]
    Blocked(#[from] UrlBlockerError),

    /// Response headers did not arrive within the cumulative budget.
    #[error("Request timed out after reading headers for {elapsed:?}")]
    HeaderReadTimeout { elapsed: Duration },

    /// A line ran past the buffer cap without its terminator.
    #[error("Line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// A single read made no progress within its timeout.
    #[error("Read timed out after {timeout:?}")]
    ReadTimeout { timeout: Duration },

    /// TCP connect did not complete in time.
    #[error("Connection to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The proxy refused or broke the tunnel.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// The proxy URI from the environment is unusable.
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction failed.
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl ConnectionError {
    /// Whether the peer was too slow, as opposed to refused or broken.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            ConnectionError::HeaderReadTimeout { .. }
                | ConnectionError::ReadTimeout { .. }
                | ConnectionError::ConnectTimeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConnectionError>;
