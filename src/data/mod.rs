//! Sample storage.

pub mod channel_buffer;

pub use channel_buffer::ChannelRingBuffer;
