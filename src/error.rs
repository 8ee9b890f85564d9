//! Custom error types for the acquisition engine.
//!
//! Using the `thiserror` crate, this module provides a layered error taxonomy:
//!
//! - **`TransportError`**: write/read/timeout failures on the instrument
//!   connection. Always recoverable; the current acquisition cycle is aborted
//!   and retried on the next pass.
//! - **`FrameError`**: a fetch response that cannot be decoded into a scan
//!   frame. Recoverable; no channel buffer is touched.
//! - **`DaqError`**: the crate-wide error, consolidating the two above plus
//!   configuration and response-parsing failures of foreground operations.
//!
//! An empty scan record is *not* an error; see
//! [`DecodeOutcome::Empty`](crate::hardware::dt8824::frame::DecodeOutcome).
//!
//! By using `#[from]`, `DaqError` can be created from the lower layers with
//! the `?` operator.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Failure of a single exchange on the instrument connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Short write: {written} of {expected} bytes sent")]
    ShortWrite { expected: usize, written: usize },

    #[error("Timed out after {0:?} waiting for the instrument")]
    Timeout(Duration),

    #[error("Response of {0} bytes is not terminated by EOS")]
    MissingEos(usize),

    #[error("Connection closed by instrument")]
    ConnectionClosed,

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a fetch response is rejected by the frame decoder.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed block header: {0}")]
    MalformedHeader(String),

    #[error("Declared payload length {0} is below the minimum plausible size")]
    InvalidLength(usize),

    #[error("Truncated frame: {received} bytes received")]
    TruncatedFrame { received: usize },

    #[error("Frame does not end with the line-feed terminator")]
    MissingTerminator,
}

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Frame decode error: {0}")]
    Frame(#[from] FrameError),

    #[error("Unexpected response to '{command}': {response:?}")]
    InvalidResponse { command: String, response: String },

    #[error("Channel {0} does not exist")]
    InvalidChannel(usize),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether the acquisition loop can simply retry on its next cycle.
    ///
    /// Configuration problems need an operator; everything that comes off
    /// the wire is transient.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DaqError::Config(_) | DaqError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_recoverable() {
        let err: DaqError = TransportError::Timeout(Duration::from_secs(1)).into();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("Timed out"));
    }

    #[test]
    fn frame_errors_convert_and_stay_recoverable() {
        let err: DaqError = FrameError::MissingTerminator.into();
        assert!(err.is_recoverable());
        match err {
            DaqError::Frame(FrameError::MissingTerminator) => {}
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn configuration_errors_are_not_recoverable() {
        let err = DaqError::Configuration("average_time must be positive".into());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn short_write_message_names_both_counts() {
        let err = TransportError::ShortWrite {
            expected: 10,
            written: 4,
        };
        assert_eq!(err.to_string(), "Short write: 4 of 10 bytes sent");
    }
}
