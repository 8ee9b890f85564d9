//! Scan-data frame decoding for `:AD:FETCH?` responses.
//!
//! Frame layout (offsets from the first byte of the response):
//!
//! ```text
//! [0]            '#' block marker
//! [1]            ASCII digit: width of the length field (nbytes)
//! [2, 2+nbytes)  ASCII decimal payload length
//! [12, 28)       scan index, scan count, samples per scan, timestamp (u32 BE)
//! [28, end-1)    sample words, i32 BE, round-robin over channels 0..3
//! [end-1]        '\n'
//! ```
//!
//! A sample word of zero means "no sample" and is skipped. Every other word
//! is scaled to volts with `0.000001192 * raw - 10.0`.
//!
//! Decoding is pure: it never touches the transport or any shared state.

use crate::error::FrameError;

/// Number of ADC channels carried in one frame.
pub const NUMBER_OF_CHANNELS: usize = 4;

/// Offset of the first sample word.
pub const DATA_OFFSET: usize = 28;

/// Offset of the first metadata word.
pub const METADATA_OFFSET: usize = 12;

/// Smallest declared payload length the instrument produces for real data.
pub const MIN_DATA_LENGTH: usize = 36;

/// Smallest complete data frame, terminator included.
pub const MIN_RX_BYTES: usize = 45;

/// Exact size of the record sent when no scan data is available.
pub const EMPTY_SCAN_LENGTH: usize = 25;

/// End-of-frame byte.
pub const TERMINATOR: u8 = b'\n';

/// Volts per ADC count.
pub const VOLTS_PER_COUNT: f64 = 0.000_001_192;

/// Offset applied after scaling.
pub const VOLTAGE_OFFSET: f64 = -10.0;

const WORD_SIZE: usize = 4;

/// Convert a raw ADC word to volts.
pub fn raw_to_voltage(raw: i32) -> f64 {
    VOLTS_PER_COUNT * f64::from(raw) + VOLTAGE_OFFSET
}

/// Diagnostic header words preceding the samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanMetadata {
    /// Index of the first scan in the frame.
    pub scan_index: u32,
    /// Number of scans in the frame.
    pub scan_count: u32,
    /// Samples per scan.
    pub samples_per_scan: u32,
    /// Instrument timestamp of the first scan.
    pub timestamp: u32,
}

/// One decoded voltage and the channel it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSample {
    /// Channel 0..3.
    pub channel: usize,
    /// Scaled sample, in volts.
    pub voltage: f64,
}

/// A successfully decoded fetch response.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFrame {
    /// Width of the ASCII length field.
    pub nbytes: usize,
    /// Declared payload length.
    pub length: usize,
    /// Diagnostic header words.
    pub metadata: ScanMetadata,
    /// Samples in encounter order.
    pub samples: Vec<ChannelSample>,
}

impl ScanFrame {
    /// Voltages of one channel, in encounter order.
    pub fn channel(&self, channel: usize) -> impl Iterator<Item = f64> + '_ {
        self.samples
            .iter()
            .filter(move |s| s.channel == channel)
            .map(|s| s.voltage)
    }
}

/// Result of decoding a response that is not malformed.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// The instrument had no new scan data.
    Empty,
    /// A data frame, possibly with zero non-empty samples.
    Frame(ScanFrame),
}

/// Decode a fetch response.
///
/// `raw` must be exactly the received bytes. `samples_per_channel` is the
/// count that was requested with the fetch; words beyond
/// `4 * NUMBER_OF_CHANNELS * samples_per_channel` bytes are ignored.
pub fn decode(raw: &[u8], samples_per_channel: usize) -> Result<DecodeOutcome, FrameError> {
    let received = raw.len();

    if received == EMPTY_SCAN_LENGTH {
        return Ok(DecodeOutcome::Empty);
    }

    let nbytes = match raw.get(1) {
        Some(digit) if digit.is_ascii_digit() => usize::from(digit - b'0'),
        Some(other) => {
            return Err(FrameError::MalformedHeader(format!(
                "length-width byte {:#04x} is not a digit",
                other
            )))
        }
        None => return Err(FrameError::TruncatedFrame { received }),
    };

    let length = parse_length(raw, nbytes)?;
    if length < MIN_DATA_LENGTH {
        return Err(FrameError::InvalidLength(length));
    }

    if received < MIN_RX_BYTES {
        return Err(FrameError::TruncatedFrame { received });
    }

    if raw[received - 1] != TERMINATOR {
        return Err(FrameError::MissingTerminator);
    }

    let metadata = parse_metadata(raw);

    let max_region = samples_per_channel.saturating_mul(WORD_SIZE * NUMBER_OF_CHANNELS);
    let region_end = DATA_OFFSET.saturating_add(max_region).min(received - 1);
    let mut samples = Vec::with_capacity((region_end - DATA_OFFSET) / WORD_SIZE);

    let mut next_channel = 0usize;
    for word in raw[DATA_OFFSET..region_end].chunks_exact(WORD_SIZE) {
        let value = i32::from_be_bytes([word[0], word[1], word[2], word[3]]);
        if value == 0 {
            continue;
        }
        samples.push(ChannelSample {
            channel: next_channel,
            voltage: raw_to_voltage(value),
        });
        next_channel = (next_channel + 1) % NUMBER_OF_CHANNELS;
    }

    Ok(DecodeOutcome::Frame(ScanFrame {
        nbytes,
        length,
        metadata,
        samples,
    }))
}

fn parse_length(raw: &[u8], nbytes: usize) -> Result<usize, FrameError> {
    if nbytes == 0 {
        return Err(FrameError::MalformedHeader("zero-width length field".into()));
    }
    let field = raw
        .get(2..2 + nbytes)
        .ok_or(FrameError::TruncatedFrame { received: raw.len() })?;
    if !field.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::MalformedHeader(format!(
            "length field {:?} is not decimal",
            String::from_utf8_lossy(field)
        )));
    }
    // At most nine digits, cannot overflow usize.
    Ok(field
        .iter()
        .fold(0usize, |acc, d| acc * 10 + usize::from(d - b'0')))
}

fn parse_metadata(raw: &[u8]) -> ScanMetadata {
    let word = |index: usize| {
        let start = METADATA_OFFSET + index * WORD_SIZE;
        raw.get(start..start + WORD_SIZE)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .unwrap_or(0)
    };
    ScanMetadata {
        scan_index: word(0),
        scan_count: word(1),
        samples_per_scan: word(2),
        timestamp: word(3),
    }
}

/// Build a data frame the way the instrument lays it out.
///
/// Used by the simulated instrument. The declared length covers every byte
/// after the length field, terminator included.
pub fn encode(metadata: ScanMetadata, words: &[i32]) -> Vec<u8> {
    let total = DATA_OFFSET + words.len() * WORD_SIZE + 1;
    let mut frame = Vec::with_capacity(total);

    // The width of the length field depends on the length itself.
    let mut nbytes = 1;
    let length = loop {
        let length = total - 2 - nbytes;
        let width = length.to_string().len();
        if width == nbytes {
            break length;
        }
        nbytes = width;
    };

    frame.push(b'#');
    frame.push(b'0' + nbytes as u8);
    frame.extend_from_slice(length.to_string().as_bytes());
    frame.resize(METADATA_OFFSET, 0);
    for value in [
        metadata.scan_index,
        metadata.scan_count,
        metadata.samples_per_scan,
        metadata.timestamp,
    ] {
        frame.extend_from_slice(&value.to_be_bytes());
    }
    for word in words {
        frame.extend_from_slice(&word.to_be_bytes());
    }
    frame.push(TERMINATOR);
    frame
}

/// The fixed-size record the instrument returns when no scan is ready.
pub fn empty_scan_record() -> Vec<u8> {
    let mut record = b"#220".to_vec();
    record.resize(EMPTY_SCAN_LENGTH - 1, 0);
    record.push(TERMINATOR);
    record
}
