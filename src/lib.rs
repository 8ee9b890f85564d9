//! # DT8824 Acquisition Library
//!
//! Continuous acquisition from a DT8824 four-channel 24-bit ADC over its
//! SCPI socket. A background task repeatedly arms the instrument, waits one
//! averaging window, fetches a binary scan frame, decodes it into per-channel
//! voltages and publishes the last value and rolling average of every
//! channel.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: The [`AcquisitionEngine`](acquisition::AcquisitionEngine)
//!   cycle and its foreground operations (frequency, average time, system error).
//! - **`config`**: Figment-based configuration loading from TOML and environment.
//! - **`data`**: Fixed-capacity per-channel sample buffers.
//! - **`error`**: Transport, frame and top-level error types.
//! - **`hardware`**: Byte transport (TCP and simulated), the DT8824 command set
//!   and the scan-frame codec.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`parameter`**: Named parameter publication with change notification.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod parameter;

pub use acquisition::{AcquisitionConfig, AcquisitionEngine, ChannelReading, CycleOutcome};
pub use error::{DaqError, DaqResult};
pub use parameter::{ParameterSink, ParameterStore};
