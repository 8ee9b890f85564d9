//! Hardware Communication
//!
//! Byte transports and the DT8824 instrument protocol.

pub mod dt8824;
pub mod mock;
pub mod transport;

pub use mock::MockDt8824;
pub use transport::{TcpTransport, Transport};
