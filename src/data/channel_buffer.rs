//! Fixed-capacity per-channel sample history.
//!
//! Each ADC channel owns one [`ChannelRingBuffer`]. Pushing into a full buffer
//! evicts the single oldest sample (FIFO), so the buffer always holds the most
//! recent `capacity` voltages in insertion order.
//!
//! # Example
//! ```
//! use dt8824_daq::data::channel_buffer::ChannelRingBuffer;
//!
//! let mut buffer = ChannelRingBuffer::with_capacity(2);
//! buffer.push(1.0);
//! buffer.push(2.0);
//! buffer.push(3.0);
//!
//! assert_eq!(buffer.len(), 2);
//! assert_eq!(buffer.last(), Some(3.0));
//! assert_eq!(buffer.average(), Some(2.5));
//! ```

use std::collections::VecDeque;

/// Upper bound on the up-front allocation; larger buffers grow on demand.
const PREALLOCATE_LIMIT: usize = 4096;

/// Bounded FIFO of voltage samples for one channel.
///
/// Capacity is fixed at construction; reconfiguring the capacity means
/// building a new buffer.
#[derive(Debug, Clone)]
pub struct ChannelRingBuffer {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl ChannelRingBuffer {
    /// Create an empty buffer holding at most `capacity` samples.
    ///
    /// A capacity of zero is raised to one so that the newest sample is
    /// always retained.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity.min(PREALLOCATE_LIMIT)),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Drop every stored sample. Capacity is unchanged.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Arithmetic mean of the current contents.
    pub fn average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stored samples, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.samples.iter()
    }
}
