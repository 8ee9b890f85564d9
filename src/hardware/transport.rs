//! Byte-oriented request/response transports.
//!
//! The acquisition engine talks to the instrument only through the
//! [`Transport`] trait. It never opens or closes connections itself; the
//! host hands it a connected transport.
//!
//! - [`TcpTransport`]: SCPI over a raw TCP socket (LXI instruments, port 5025)
//! - [`MockDt8824`](crate::hardware::mock::MockDt8824): simulated instrument
//!
//! Every operation is bounded by a timeout and reports expiry as
//! [`TransportError::Timeout`].

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};

/// Default SCPI socket port for LXI instruments.
pub const DEFAULT_PORT: u16 = 5025;

/// End-of-string byte terminating every instrument response.
pub const EOS: u8 = b'\n';

/// Initial read buffer size; large enough for a typical fetch frame.
const READ_CHUNK: usize = 2048;

/// Quiet period after an EOS byte before a response is considered complete.
///
/// Binary scan frames may contain `0x0A` inside sample words, so an EOS at
/// the end of one socket read is not proof the response has ended.
const DEFAULT_EOS_GRACE: Duration = Duration::from_millis(20);

/// Capability: byte-exact command/response exchange with one instrument.
///
/// # Contract
/// - `write` returns the number of bytes accepted; fewer than requested is
///   reported by the caller as a short write.
/// - `read` returns one complete response or fails within `timeout`.
/// - Callers serialize access; implementations may assume exclusive use.
#[async_trait]
pub trait Transport: Send {
    /// Write raw bytes.
    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Read one response.
    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Write a query and read its response.
    ///
    /// Returns `(bytes_written, response)`.
    async fn write_read(
        &mut self,
        bytes: &[u8],
        timeout: Duration,
    ) -> Result<(usize, Vec<u8>), TransportError> {
        let written = self.write(bytes, timeout).await?;
        if written != bytes.len() {
            return Ok((written, Vec::new()));
        }
        let response = self.read(timeout).await?;
        Ok((written, response))
    }

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// SCPI-over-TCP transport.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    eos_grace: Duration,
}

impl TcpTransport {
    /// Connect to `host:port`, failing after `connect_timeout`.
    ///
    /// # Errors
    /// Returns [`TransportError::Timeout`] if the connection is not
    /// established in time, or [`TransportError::Io`] if it is refused.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout(connect_timeout))??;

        // Disable Nagle's algorithm; every command is a tiny packet.
        stream.set_nodelay(true)?;

        let peer = format!("{}:{}", host, port);
        tracing::info!(peer = %peer, "Connected to instrument");

        Ok(Self {
            stream,
            peer,
            eos_grace: DEFAULT_EOS_GRACE,
        })
    }

    /// Set the quiet period used to detect the end of a response.
    pub fn with_eos_grace(mut self, grace: Duration) -> Self {
        self.eos_grace = grace;
        self
    }

    /// Discard bytes left over from an earlier, abandoned response.
    fn discard_pending(&mut self) -> Result<(), TransportError> {
        let mut scratch = [0u8; 256];
        loop {
            match self.stream.try_read(&mut scratch) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => tracing::debug!(bytes = n, "Discarded stale input"),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn write(&mut self, bytes: &[u8], limit: Duration) -> Result<usize, TransportError> {
        self.discard_pending()?;

        timeout(limit, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout(limit))??;

        tracing::trace!(peer = %self.peer, command = ?String::from_utf8_lossy(bytes), "Wrote command");
        Ok(bytes.len())
    }

    async fn read(&mut self, limit: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + limit;
        let mut buffer = BytesMut::with_capacity(READ_CHUNK);

        loop {
            let ended_with_eos = buffer.last() == Some(&EOS);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait = if ended_with_eos {
                self.eos_grace.min(remaining)
            } else {
                remaining
            };

            if wait.is_zero() {
                if ended_with_eos {
                    break;
                }
                return Err(TransportError::Timeout(limit));
            }

            match timeout(wait, self.stream.read_buf(&mut buffer)).await {
                Ok(Ok(0)) if buffer.is_empty() => return Err(TransportError::ConnectionClosed),
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) if ended_with_eos => break,
                Err(_) => return Err(TransportError::Timeout(limit)),
            }
        }

        tracing::trace!(peer = %self.peer, bytes = buffer.len(), "Read response");
        Ok(buffer.to_vec())
    }

    fn describe(&self) -> String {
        format!("TcpTransport({})", self.peer)
    }
}
