//! DT8824 command set and scan-frame codec.

pub mod commands;
pub mod frame;

pub use commands::{Command, CommandProtocol};
pub use frame::{decode, raw_to_voltage, DecodeOutcome, ScanFrame, NUMBER_OF_CHANNELS};
