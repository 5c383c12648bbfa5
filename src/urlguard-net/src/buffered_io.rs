//! Buffered reads with a cumulative header budget.
//!
//! Per-read timeouts alone do not stop a peer that sends one byte just
//! before each read would time out. [`TimeoutBufferedIo`] measures the total
//! time since `start` and gives up once it exceeds the header budget, no
//! matter how quickly individual reads complete.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::Instant;
use tracing::debug;

use super::{ConnectionError, Result};

/// Total time allowed for reading response headers.
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(20);

/// Time allowed for a single read to make progress.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Longest line accepted before the terminator shows up.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Reader that enforces a cumulative deadline on line-oriented reads.
///
/// Bytes read past a terminator stay buffered for the next call. Dropping an
/// in-flight read loses nothing that was already buffered.
#[derive(Debug)]
pub struct TimeoutBufferedIo<R> {
    inner: R,
    buffer: Vec<u8>,
    read_timeout: Duration,
    header_read_timeout: Duration,
    max_line_length: usize,
}

impl<R> TimeoutBufferedIo<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            header_read_timeout: HEADER_READ_TIMEOUT,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Set the per-read timeout.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the cumulative budget.
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    /// Cap how many bytes may be buffered while looking for a terminator.
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = limit;
        self
    }

    /// Bytes read but not yet returned.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Return the stream and any unread buffered bytes.
    pub fn into_inner(self) -> (R, Vec<u8>) {
        (self.inner, self.buffer)
    }

    /// Read up to and including `terminator`.
    ///
    /// `start` defaults to now. On EOF the buffered remainder is returned
    /// when `ignore_eof` is set, otherwise an `UnexpectedEof` error. More
    /// than `max_line_length` bytes without a terminator is an error.
    pub async fn read_until(
        &mut self,
        terminator: &[u8],
        ignore_eof: bool,
        start: Option<Instant>,
    ) -> Result<Vec<u8>> {
        let start = start.unwrap_or_else(Instant::now);
        let mut scanned = 0;

        loop {
            if let Some(offset) = find(&self.buffer[scanned..], terminator) {
                let end = scanned + offset + terminator.len();
                return Ok(self.buffer.drain(..end).collect());
            }
            // A terminator may straddle the next chunk boundary.
            scanned = self
                .buffer
                .len()
                .saturating_sub(terminator.len().saturating_sub(1));

            if self.buffer.len() > self.max_line_length {
                debug!(
                    buffered = self.buffer.len(),
                    limit = self.max_line_length,
                    "line too long"
                );
                return Err(ConnectionError::LineTooLong {
                    limit: self.max_line_length,
                });
            }

            let elapsed = start.elapsed();
            if elapsed >= self.header_read_timeout {
                return Err(self.header_timeout(elapsed));
            }

            let remaining = self.header_read_timeout - elapsed;
            let wait = remaining.min(self.read_timeout);

            let mut chunk = [0u8; READ_CHUNK];
            match tokio::time::timeout(wait, self.inner.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    if ignore_eof {
                        return Ok(std::mem::take(&mut self.buffer));
                    }
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "end of file reached",
                    )
                    .into());
                }
                Ok(Ok(n)) => self.buffer.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if wait < self.read_timeout => {
                    return Err(self.header_timeout(start.elapsed()));
                }
                Err(_) => {
                    return Err(ConnectionError::ReadTimeout {
                        timeout: self.read_timeout,
                    });
                }
            }
        }
    }

    /// Read one line without its `\n` or `\r\n` ending.
    pub async fn read_line(&mut self, start: Option<Instant>) -> Result<String> {
        let mut line = self.read_until(b"\n", false, start).await?;
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Read header lines up to the blank line that ends them.
    ///
    /// The whole block shares one budget measured from `start`.
    pub async fn read_headers(&mut self, start: Option<Instant>) -> Result<Vec<String>> {
        let start = start.unwrap_or_else(Instant::now);
        let mut lines = Vec::new();
        loop {
            let line = self.read_line(Some(start)).await?;
            if line.is_empty() {
                return Ok(lines);
            }
            lines.push(line);
        }
    }

    fn header_timeout(&self, elapsed: Duration) -> ConnectionError {
        debug!(
            ?elapsed,
            budget = ?self.header_read_timeout,
            "header read budget exhausted"
        );
        ConnectionError::HeaderReadTimeout { elapsed }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_line_strips_endings() {
        let mock = tokio_test::io::Builder::new()
            .read(b"first\r\nsecond\nthird")
            .build();
        let mut io = TimeoutBufferedIo::new(mock);

        assert_eq!(io.read_line(None).await.unwrap(), "first");
        assert_eq!(io.read_line(None).await.unwrap(), "second");
        assert_eq!(io.buffered(), b"third");
    }

    #[tokio::test]
    async fn test_read_headers_keeps_body() {
        let mock = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n")
            .read(b"\r\nbody")
            .build();
        let mut io = TimeoutBufferedIo::new(mock);

        let headers = io.read_headers(None).await.unwrap();
        assert_eq!(headers, vec!["HTTP/1.1 200 OK", "Content-Length: 4"]);

        let (_, leftover) = io.into_inner();
        assert_eq!(leftover, b"body");
    }

    #[tokio::test]
    async fn test_eof_handling() {
        let (mut client, server) = tokio::io::duplex(64);
        client.write_all(b"partial").await.unwrap();
        drop(client);

        let mut io = TimeoutBufferedIo::new(server);
        let err = io.read_until(b"\n", false, None).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));

        let rest = io.read_until(b"\n", true, None).await.unwrap();
        assert_eq!(rest, b"partial");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_on_silent_peer() {
        let (_client, server) = tokio::io::duplex(64);
        let mut io = TimeoutBufferedIo::new(server).with_read_timeout(Duration::from_secs(1));

        let err = io.read_line(None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::ReadTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_counts_from_given_start() {
        let (_client, server) = tokio::io::duplex(64);
        let mut io = TimeoutBufferedIo::new(server);

        let start = Instant::now();
        tokio::time::advance(HEADER_READ_TIMEOUT + Duration::from_secs(1)).await;
        let err = io.read_line(Some(start)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::HeaderReadTimeout { .. }));
    }

    #[tokio::test]
    async fn test_unterminated_line_is_capped() {
        let mock = tokio_test::io::Builder::new()
            .read(&[b'a'; 40])
            .read(&[b'b'; 40])
            .build();
        let mut io = TimeoutBufferedIo::new(mock).with_max_line_length(64);

        let err = io.read_line(None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::LineTooLong { limit: 64 }));
        assert!(!err.is_timeout());
    }

    #[tokio::test]
    async fn test_terminator_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"HTTP/1.1 200 OK\r")
            .read(b"\nServer: x\r\n")
            .read(b"\r")
            .read(b"\n")
            .build();
        let mut io = TimeoutBufferedIo::new(mock);

        let head = io.read_until(b"\r\n\r\n", false, None).await.unwrap();
        assert_eq!(head, b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n");
        assert!(io.buffered().is_empty());
    }

    #[test]
    fn test_find() {
        assert_eq!(find(b"abc\r\n", b"\r\n"), Some(3));
        assert_eq!(find(b"abc", b"\n"), None);
        assert_eq!(find(b"", b"\n"), None);
    }
}
