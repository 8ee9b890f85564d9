//! DT8824 command set and the write/query exchanges built on it.
//!
//! Protocol Overview:
//! - Format: SCPI-style ASCII commands
//! - Terminator: CRLF (`\r\n`) on every command
//! - Text responses end with LF; scan data comes back as a binary block
//!
//! The strings below are byte-exact and must not be reformatted.

use crate::error::{DaqError, DaqResult, TransportError};
use crate::hardware::transport::{Transport, EOS};
use std::fmt;
use std::time::Duration;

/// The closed set of commands understood by the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Unlock protected commands (`:SYST:PASS:CEN admin`).
    AdminLogin,
    /// Enable the four analog inputs.
    EnableChannels,
    /// Abort any acquisition in progress.
    Stop,
    /// Arm the acquisition subsystem.
    Arm,
    /// Start acquiring once armed.
    Init,
    /// Query the index of the most recent scan.
    LastScanIndex,
    /// Fetch `count` scans starting at `start`.
    FetchScan { start: u32, count: u32 },
    /// Query the sample clock in Hz.
    QueryClockFrequency,
    /// Program the sample clock in Hz.
    SetClockFrequency(f64),
    /// Pop the oldest entry from the error queue.
    QuerySystemError,
}

impl Command {
    /// Whether the instrument answers this command.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::LastScanIndex
                | Command::FetchScan { .. }
                | Command::QueryClockFrequency
                | Command::QuerySystemError
        )
    }

    /// The wire form, CRLF included.
    pub fn to_wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AdminLogin => f.write_str(":SYST:PASS:CEN admin\r\n"),
            Command::EnableChannels => f.write_str(":AD:ENAB ON, (@1,2,3,4)\r\n"),
            Command::Stop => f.write_str(":AD:ABOR\r\n"),
            Command::Arm => f.write_str(":AD:ARM\r\n"),
            Command::Init => f.write_str(":AD:INIT\r\n"),
            Command::LastScanIndex => f.write_str(":AD:STAT:SCAN?\r\n"),
            Command::FetchScan { start, count } => write!(f, ":AD:FETCH? {},{}\r\n", start, count),
            Command::QueryClockFrequency => f.write_str(":AD:CLOCK:FREQ?\r\n"),
            Command::SetClockFrequency(hz) => write!(f, ":AD:CLOC:FREQ {}\r\n", hz),
            Command::QuerySystemError => f.write_str(":SYSTEM:ERROR?\r\n"),
        }
    }
}

/// Issues [`Command`]s over an owned [`Transport`].
///
/// Callers serialize access by holding the engine lock; the protocol itself
/// keeps no state besides the connection.
pub struct CommandProtocol {
    transport: Box<dyn Transport>,
    timeout: Duration,
}

impl CommandProtocol {
    /// Wrap a connected transport. `timeout` bounds every write and read.
    pub fn new(transport: Box<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Per-exchange timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Transport description for logs.
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Send a command that has no response.
    ///
    /// # Errors
    /// [`TransportError::ShortWrite`] if the transport accepted fewer bytes
    /// than the command length, or any error the transport reports.
    pub async fn send(&mut self, command: Command) -> Result<(), TransportError> {
        let wire = command.to_wire();
        let written = self.transport.write(wire.as_bytes(), self.timeout).await?;
        if written != wire.len() {
            return Err(TransportError::ShortWrite {
                expected: wire.len(),
                written,
            });
        }
        tracing::debug!(command = %wire.trim_end(), "Sent command");
        Ok(())
    }

    /// Send a query and return the raw response bytes.
    ///
    /// No terminator check is applied; binary scan frames are validated by
    /// the frame decoder.
    pub async fn query_raw(&mut self, command: Command) -> Result<Vec<u8>, TransportError> {
        let wire = command.to_wire();
        let (written, response) = self
            .transport
            .write_read(wire.as_bytes(), self.timeout)
            .await?;
        if written != wire.len() {
            return Err(TransportError::ShortWrite {
                expected: wire.len(),
                written,
            });
        }
        tracing::debug!(command = %wire.trim_end(), bytes = response.len(), "Query answered");
        Ok(response)
    }

    /// Send a query whose answer is one EOS-terminated text line.
    ///
    /// Returns the line with trailing CR/LF removed.
    pub async fn query_text(&mut self, command: Command) -> Result<String, TransportError> {
        let response = self.query_raw(command).await?;
        if response.last() != Some(&EOS) {
            return Err(TransportError::MissingEos(response.len()));
        }
        let text = String::from_utf8_lossy(&response);
        Ok(text.trim_end_matches(&['\r', '\n'][..]).to_string())
    }

    /// Query and parse a floating-point answer.
    pub async fn query_f64(&mut self, command: Command) -> DaqResult<f64> {
        let text = self.query_text(command).await?;
        text.trim()
            .parse::<f64>()
            .map_err(|_| DaqError::InvalidResponse {
                command: command.to_wire().trim_end().to_string(),
                response: text,
            })
    }

    /// Query and parse an unsigned integer answer.
    pub async fn query_u64(&mut self, command: Command) -> DaqResult<u64> {
        let text = self.query_text(command).await?;
        text.trim()
            .parse::<u64>()
            .map_err(|_| DaqError::InvalidResponse {
                command: command.to_wire().trim_end().to_string(),
                response: text,
            })
    }
}
