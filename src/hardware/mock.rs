//! Mock Hardware Implementation
//!
//! Provides a simulated DT8824 for testing without physical hardware.
//! [`MockDt8824`] implements [`Transport`] and answers the fixed command set
//! the way the instrument does:
//!
//! - `:AD:ABOR` / `:AD:ARM` / `:AD:INIT` track the trigger state
//! - `:AD:FETCH? start,count` returns a scan frame with `count` non-zero
//!   samples per channel once armed and initiated, or the empty-scan record
//! - `:AD:CLOC:FREQ` / `:AD:CLOCK:FREQ?` store and report the sample clock
//! - `:SYSTEM:ERROR?` and `:AD:STAT:SCAN?` report simulated status
//!
//! Clones share state, so a test can keep a handle for inspection and fault
//! injection after boxing one clone into the engine.

use crate::error::TransportError;
use crate::hardware::dt8824::frame::{self, ScanMetadata, NUMBER_OF_CHANNELS};
use crate::hardware::transport::Transport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Raw word around mid-scale (~0 V) used as the base of simulated samples.
const MID_SCALE: i32 = 0x0080_0000;

#[derive(Debug)]
struct MockState {
    frequency: f64,
    armed: bool,
    initiated: bool,
    scan_index: u32,
    system_error: String,
    commands: Vec<String>,
    pending: VecDeque<Vec<u8>>,
    scripted: VecDeque<Vec<u8>>,
    truncated_writes: usize,
    failed_writes: usize,
    empty_scans: usize,
    exchange_delay: Duration,
}

/// Simulated DT8824 instrument.
#[derive(Clone)]
pub struct MockDt8824 {
    state: Arc<Mutex<MockState>>,
}

impl MockDt8824 {
    /// Create an idle instrument with the given sample clock.
    pub fn new(frequency: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                frequency,
                armed: false,
                initiated: false,
                scan_index: 0,
                system_error: "0,\"No error\"".to_string(),
                commands: Vec::new(),
                pending: VecDeque::new(),
                scripted: VecDeque::new(),
                truncated_writes: 0,
                failed_writes: 0,
                empty_scans: 0,
                exchange_delay: Duration::ZERO,
            })),
        }
    }

    /// Every command written so far, CRLF stripped.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Forget the command log.
    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Current simulated sample clock.
    pub fn frequency(&self) -> f64 {
        self.state.lock().frequency
    }

    /// Answer the next query with `bytes` instead of the simulated reply.
    pub fn script_response(&self, bytes: Vec<u8>) {
        self.state.lock().scripted.push_back(bytes);
    }

    /// Report the next `count` writes as one byte short.
    pub fn truncate_next_writes(&self, count: usize) {
        self.state.lock().truncated_writes = count;
    }

    /// Fail the next `count` writes with a timeout.
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failed_writes = count;
    }

    /// Return the empty-scan record for the next `count` fetches.
    pub fn empty_next_scans(&self, count: usize) {
        self.state.lock().empty_scans = count;
    }

    /// Text reported by `:SYSTEM:ERROR?` (without terminator).
    pub fn set_system_error(&self, text: impl Into<String>) {
        self.state.lock().system_error = text.into();
    }

    /// Simulated latency added to every write.
    pub fn set_exchange_delay(&self, delay: Duration) {
        self.state.lock().exchange_delay = delay;
    }

    /// Raw word produced for `channel` at position `sample` of a scan.
    ///
    /// Never zero, so every simulated word becomes a stored sample.
    pub fn sample_word(scan_index: u32, channel: usize, sample: usize) -> i32 {
        MID_SCALE
            + (channel as i32 + 1) * 100_000
            + (scan_index % 1000) as i32 * 10
            + sample as i32
    }

    fn handle(state: &mut MockState, command: &str) {
        if let Some(args) = command.strip_prefix(":AD:FETCH? ") {
            let count = args
                .split(',')
                .nth(1)
                .and_then(|c| c.trim().parse::<usize>().ok())
                .unwrap_or(0);
            let reply = Self::fetch(state, count);
            state.pending.push_back(reply);
            return;
        }
        if let Some(value) = command.strip_prefix(":AD:CLOC:FREQ ") {
            if let Ok(hz) = value.trim().parse::<f64>() {
                state.frequency = hz;
            }
            return;
        }

        let reply = match command {
            ":AD:ABOR" => {
                state.armed = false;
                state.initiated = false;
                None
            }
            ":AD:ARM" => {
                state.armed = true;
                None
            }
            ":AD:INIT" => {
                state.initiated = state.armed;
                None
            }
            ":AD:CLOCK:FREQ?" => Some(format!("{}\n", state.frequency)),
            ":AD:STAT:SCAN?" => Some(format!("{}\n", state.scan_index)),
            ":SYSTEM:ERROR?" => Some(format!("{}\r\n", state.system_error)),
            _ => None,
        };
        if let Some(reply) = reply {
            state.pending.push_back(reply.into_bytes());
        }
    }

    fn fetch(state: &mut MockState, count: usize) -> Vec<u8> {
        if state.empty_scans > 0 {
            state.empty_scans -= 1;
            return frame::empty_scan_record();
        }
        if !state.initiated || count == 0 {
            return frame::empty_scan_record();
        }

        let scan_index = state.scan_index;
        let words: Vec<i32> = (0..count)
            .flat_map(|sample| {
                (0..NUMBER_OF_CHANNELS)
                    .map(move |channel| Self::sample_word(scan_index, channel, sample))
            })
            .collect();
        state.scan_index = state.scan_index.wrapping_add(1);

        frame::encode(
            ScanMetadata {
                scan_index,
                scan_count: 1,
                samples_per_scan: count as u32,
                timestamp: scan_index.wrapping_mul(10),
            },
            &words,
        )
    }
}

#[async_trait]
impl Transport for MockDt8824 {
    async fn write(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let delay = self.state.lock().exchange_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let command = String::from_utf8_lossy(bytes)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();
        state.commands.push(command.clone());

        if state.failed_writes > 0 {
            state.failed_writes -= 1;
            return Err(TransportError::Timeout(timeout));
        }
        if state.truncated_writes > 0 {
            state.truncated_writes -= 1;
            return Ok(bytes.len().saturating_sub(1));
        }

        if command.ends_with('?') || command.starts_with(":AD:FETCH?") {
            if let Some(scripted) = state.scripted.pop_front() {
                state.pending.push_back(scripted);
                return Ok(bytes.len());
            }
        }
        Self::handle(&mut state, &command);
        Ok(bytes.len())
    }

    async fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.state
            .lock()
            .pending
            .pop_front()
            .ok_or(TransportError::Timeout(timeout))
    }

    fn describe(&self) -> String {
        "MockDt8824".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::dt8824::frame::{decode, DecodeOutcome};

    const T: Duration = Duration::from_millis(10);

    #[tokio::test]
    async fn test_fetch_without_init_is_empty() {
        let mut mock = MockDt8824::new(1000.0);
        let (_, reply) = mock.write_read(b":AD:FETCH? 0,5\r\n", T).await.unwrap();
        assert_eq!(decode(&reply, 5), Ok(DecodeOutcome::Empty));
    }

    #[tokio::test]
    async fn test_armed_fetch_returns_requested_samples() {
        let mut mock = MockDt8824::new(1000.0);
        mock.write(b":AD:ARM\r\n", T).await.unwrap();
        mock.write(b":AD:INIT\r\n", T).await.unwrap();
        let (_, reply) = mock.write_read(b":AD:FETCH? 0,3\r\n", T).await.unwrap();

        match decode(&reply, 3).unwrap() {
            DecodeOutcome::Frame(frame) => {
                assert_eq!(frame.samples.len(), 12);
                assert_eq!(frame.metadata.samples_per_scan, 3);
            }
            DecodeOutcome::Empty => panic!("expected data"),
        }
    }

    #[tokio::test]
    async fn test_abort_disarms() {
        let mut mock = MockDt8824::new(1000.0);
        mock.write(b":AD:ARM\r\n", T).await.unwrap();
        mock.write(b":AD:INIT\r\n", T).await.unwrap();
        mock.write(b":AD:ABOR\r\n", T).await.unwrap();
        let (_, reply) = mock.write_read(b":AD:FETCH? 0,3\r\n", T).await.unwrap();
        assert_eq!(decode(&reply, 3), Ok(DecodeOutcome::Empty));
    }

    #[tokio::test]
    async fn test_frequency_set_and_query() {
        let mut mock = MockDt8824::new(1000.0);
        mock.write(b":AD:CLOC:FREQ 250\r\n", T).await.unwrap();
        let (_, reply) = mock.write_read(b":AD:CLOCK:FREQ?\r\n", T).await.unwrap();
        assert_eq!(reply, b"250\n");
        assert_eq!(mock.frequency(), 250.0);
    }

    #[tokio::test]
    async fn test_read_without_reply_times_out() {
        let mut mock = MockDt8824::new(1000.0);
        mock.write(b":AD:ARM\r\n", T).await.unwrap();
        assert!(matches!(
            mock.read(T).await,
            Err(TransportError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_command_log() {
        let handle = MockDt8824::new(1000.0);
        let mut boxed: Box<dyn Transport> = Box::new(handle.clone());
        boxed.write(b":AD:ARM\r\n", T).await.unwrap();
        assert_eq!(handle.commands(), vec![":AD:ARM".to_string()]);
    }

    #[test]
    fn test_sample_words_are_never_zero() {
        for scan in [0, 1, 999, 1000, u32::MAX] {
            for channel in 0..NUMBER_OF_CHANNELS {
                for sample in 0..64 {
                    assert_ne!(MockDt8824::sample_word(scan, channel, sample), 0);
                }
            }
        }
    }
}
