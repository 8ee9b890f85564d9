//! DT8824 acquisition engine.
//!
//! One background task polls the instrument forever:
//!
//! ```text
//! Idle -> Armed -> Initiated -> AwaitingSettle -> Fetching -> Decoding -> Publishing -> Idle
//! ```
//!
//! - **Idle → Armed**: `:AD:ABOR` then `:AD:ARM` (abort first so a cycle
//!   always starts from a known state)
//! - **Armed → Initiated**: `:AD:INIT`
//! - **AwaitingSettle**: sleep for `average_time`, the instrument's
//!   accumulation window. The engine lock is released while sleeping.
//! - **Fetching**: if the frequency changed during the settle window the
//!   cycle is discarded. Otherwise `:AD:FETCH? 0,<samples_per_channel>`.
//! - **Decoding → Publishing**: samples are pushed into the channel ring
//!   buffers, then last value and average of every non-empty channel are
//!   written to [`EngineState`] and the [`ParameterSink`].
//!
//! Transport failures, decode failures and empty scans all end the cycle
//! early without touching channel state; the next cycle starts normally.
//!
//! # Locking
//!
//! Transport, channel buffers, [`AcquisitionConfig`], [`EngineState`] and the
//! frequency latch live behind one `tokio::sync::Mutex`. Trigger
//! (abort/arm/init) and fetch→decode→store→publish each run under a single
//! acquisition of it, so command exchanges never interleave and readers
//! always see last value and average from the same batch.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(ParameterStore::new());
//! let engine = AcquisitionEngine::new(
//!     Box::new(MockDt8824::new(1000.0)),
//!     AcquisitionConfig::default(),
//!     Duration::from_secs(1),
//!     store.clone(),
//! )?;
//! engine.initialize().await?;
//! let task = engine.spawn();
//! engine.set_average_time(1.0).await?;
//! ```

use crate::data::channel_buffer::ChannelRingBuffer;
use crate::error::{DaqError, DaqResult};
use crate::hardware::dt8824::commands::{Command, CommandProtocol};
use crate::hardware::dt8824::frame::{self, DecodeOutcome, ScanFrame, NUMBER_OF_CHANNELS};
use crate::hardware::transport::Transport;
use crate::parameter::{
    ParamValue, ParameterSink, P_AVERAGE_TIME, P_ERROR, P_FREQUENCY, P_VOLTAGE, P_VOLTAGE_AVG,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Per-channel scan rate is the sample clock divided by this constant.
pub const SCAN_RATE_DIVISOR: f64 = 2.5;

/// Highest sample clock the instrument accepts.
pub const MAX_FREQUENCY: f64 = 4_800.0;

/// Longest averaging window, in seconds.
pub const MAX_AVERAGE_TIME: f64 = 60.0;

/// Largest explicit channel buffer capacity.
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Largest fetch: `MAX_FREQUENCY / SCAN_RATE_DIVISOR * MAX_AVERAGE_TIME`.
pub const MAX_SAMPLES_PER_CHANNEL: usize = 115_200;

/// Bounds on the pause after a failed cycle.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(50);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Mutable acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionConfig {
    /// Instrument sample clock.
    pub frequency: f64,
    /// Averaging window and settle time, in seconds.
    pub average_time: f64,
    /// Explicit channel capacity; `None` derives it from `frequency`.
    pub max_buffer_size: Option<usize>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            average_time: 0.5,
            max_buffer_size: None,
        }
    }
}

impl AcquisitionConfig {
    /// Samples per second delivered on each channel.
    pub fn scan_rate(&self) -> f64 {
        self.frequency / SCAN_RATE_DIVISOR
    }

    /// Samples per channel requested by each fetch.
    ///
    /// Clamped to `1..=MAX_SAMPLES_PER_CHANNEL` even for unvalidated values.
    pub fn samples_per_channel(&self) -> usize {
        clamp_count(self.scan_rate() * self.average_time, MAX_SAMPLES_PER_CHANNEL)
    }

    /// Channel ring buffer capacity: explicit, or one second of samples.
    pub fn buffer_capacity(&self) -> usize {
        match self.max_buffer_size {
            Some(size) => size.clamp(1, MAX_BUFFER_SIZE),
            None => clamp_count(self.scan_rate(), MAX_BUFFER_SIZE),
        }
    }

    /// How long the instrument accumulates before a fetch.
    pub fn settle_time(&self) -> Duration {
        Duration::from_secs_f64(self.average_time)
    }

    /// Pause before retrying after a failed cycle.
    pub fn retry_delay(&self) -> Duration {
        self.settle_time().clamp(MIN_RETRY_DELAY, MAX_RETRY_DELAY)
    }

    /// Reject values the instrument cannot use.
    pub fn validate(&self) -> DaqResult<()> {
        validate_frequency(self.frequency)?;
        validate_average_time(self.average_time)?;
        match self.max_buffer_size {
            Some(size) if size == 0 || size > MAX_BUFFER_SIZE => {
                Err(DaqError::Configuration(format!(
                    "max_buffer_size must be in 1..={}, got {}",
                    MAX_BUFFER_SIZE, size
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Round `value` to a count in `1..=max`. NaN maps to 1.
fn clamp_count(value: f64, max: usize) -> usize {
    let rounded = value.round();
    if rounded >= max as f64 {
        max
    } else if rounded >= 1.0 {
        rounded as usize
    } else {
        1
    }
}

fn validate_frequency(hz: f64) -> DaqResult<()> {
    if hz.is_finite() && hz > 0.0 && hz <= MAX_FREQUENCY {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "frequency must be in (0, {}], got {}",
            MAX_FREQUENCY, hz
        )))
    }
}

fn validate_average_time(seconds: f64) -> DaqResult<()> {
    if seconds.is_finite() && seconds > 0.0 && seconds <= MAX_AVERAGE_TIME {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "average_time must be in (0, {}] seconds, got {}",
            MAX_AVERAGE_TIME, seconds
        )))
    }
}

/// Published values of one channel. Both come from the same decode batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelReading {
    /// Most recent voltage.
    pub voltage: f64,
    /// Mean of the channel buffer.
    pub average: f64,
    /// Scan index reported by the frame that produced `voltage`.
    pub scan_index: u32,
    /// Publish pass that produced this reading.
    pub batch: u64,
}

/// Values derived by the loop, readable by the host.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineState {
    /// `None` until the channel has received at least one sample.
    pub channels: [Option<ChannelReading>; NUMBER_OF_CHANNELS],
    /// Last text returned by `:SYSTEM:ERROR?`.
    pub last_error: String,
    /// Description of the last failed cycle, if any.
    pub last_fault: Option<String>,
    /// Number of successful publish passes.
    pub batches: u64,
    /// Number of cycles started.
    pub cycles: u64,
}

/// Position in the acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    /// Stopped, about to arm.
    Idle,
    /// Armed, about to initiate.
    Armed,
    /// Acquisition running on the instrument.
    Initiated,
    /// Waiting out the averaging window.
    AwaitingSettle,
    /// Fetch query in flight.
    Fetching,
    /// Validating the scan frame.
    Decoding,
    /// Storing samples and publishing aggregates.
    Publishing,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Armed => "armed",
            CycleState::Initiated => "initiated",
            CycleState::AwaitingSettle => "awaiting-settle",
            CycleState::Fetching => "fetching",
            CycleState::Decoding => "decoding",
            CycleState::Publishing => "publishing",
        };
        f.write_str(name)
    }
}

/// What one call to [`AcquisitionEngine::run_cycle`] did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Samples were stored and published.
    Published {
        /// Non-empty samples decoded across all channels.
        samples: usize,
        /// Scan index reported by the frame.
        scan_index: u32,
    },
    /// A frequency change arrived during the settle window; nothing fetched.
    FrequencyChanged,
    /// The instrument had no scan data.
    EmptyScan,
    /// A transport or decode failure aborted the cycle.
    Failed(DaqError),
}

/// Parameters captured when a cycle is triggered.
#[derive(Debug, Clone, Copy)]
struct CyclePlan {
    settle: Duration,
    samples_per_channel: usize,
    cycle: u64,
}

struct Shared {
    protocol: CommandProtocol,
    config: AcquisitionConfig,
    buffers: [ChannelRingBuffer; NUMBER_OF_CHANNELS],
    state: EngineState,
    /// Raised by `set_frequency`, consumed by the fetch step.
    frequency_changed: bool,
}

impl Shared {
    fn rebuild_buffers(&mut self, capacity: usize) {
        if self.buffers[0].capacity() == capacity {
            return;
        }
        self.buffers = std::array::from_fn(|ch| {
            let mut rebuilt = ChannelRingBuffer::with_capacity(capacity);
            for sample in self.buffers[ch].iter() {
                rebuilt.push(*sample);
            }
            rebuilt
        });
        tracing::info!(capacity, "Rebuilt channel buffers");
    }

    fn store_and_publish(&mut self, frame: &ScanFrame, sink: &dyn ParameterSink) {
        for sample in &frame.samples {
            if let Some(buffer) = self.buffers.get_mut(sample.channel) {
                buffer.push(sample.voltage);
            }
        }

        self.state.batches += 1;
        let batch = self.state.batches;
        let mut values = Vec::with_capacity(2 * NUMBER_OF_CHANNELS);
        for (ch, buffer) in self.buffers.iter().enumerate() {
            // An empty buffer keeps the previously published reading.
            if let (Some(voltage), Some(average)) = (buffer.last(), buffer.average()) {
                self.state.channels[ch] = Some(ChannelReading {
                    voltage,
                    average,
                    scan_index: frame.metadata.scan_index,
                    batch,
                });
                values.push((P_VOLTAGE[ch], ParamValue::Float(voltage)));
                values.push((P_VOLTAGE_AVG[ch], ParamValue::Float(average)));
            }
        }
        sink.publish(&values);
    }
}

/// Handle to the acquisition engine. Clones share the same instrument.
#[derive(Clone)]
pub struct AcquisitionEngine {
    shared: Arc<Mutex<Shared>>,
    sink: Arc<dyn ParameterSink>,
}

impl AcquisitionEngine {
    /// Build an engine around a connected transport.
    ///
    /// No command is sent; call [`initialize`](Self::initialize) before
    /// starting the loop.
    ///
    /// # Errors
    /// Returns [`DaqError::Configuration`] if `config` is invalid.
    pub fn new(
        transport: Box<dyn Transport>,
        config: AcquisitionConfig,
        timeout: Duration,
        sink: Arc<dyn ParameterSink>,
    ) -> DaqResult<Self> {
        config.validate()?;
        let capacity = config.buffer_capacity();
        let shared = Shared {
            protocol: CommandProtocol::new(transport, timeout),
            config,
            buffers: std::array::from_fn(|_| ChannelRingBuffer::with_capacity(capacity)),
            state: EngineState::default(),
            frequency_changed: false,
        };
        Ok(Self {
            shared: Arc::new(Mutex::new(shared)),
            sink,
        })
    }

    /// Bring the instrument up: unlock, enable channels, stop, set clock.
    pub async fn initialize(&self) -> DaqResult<()> {
        let mut shared = self.shared.lock().await;
        let frequency = shared.config.frequency;
        let transport = shared.protocol.describe();

        shared.protocol.send(Command::AdminLogin).await?;
        shared.protocol.send(Command::EnableChannels).await?;
        shared.protocol.send(Command::Stop).await?;
        shared
            .protocol
            .send(Command::SetClockFrequency(frequency))
            .await?;

        tracing::info!(
            transport = %transport,
            frequency,
            average_time = shared.config.average_time,
            buffer_capacity = shared.config.buffer_capacity(),
            samples_per_channel = shared.config.samples_per_channel(),
            "Instrument initialized"
        );

        self.sink.set_f64(P_FREQUENCY, frequency);
        self.sink.set_f64(P_AVERAGE_TIME, shared.config.average_time);
        self.sink.notify();
        Ok(())
    }

    /// Run the acquisition loop on a background task.
    ///
    /// The loop never exits on its own; abort the returned handle to stop it.
    pub fn spawn(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run().await })
    }

    /// Run acquisition cycles forever.
    pub async fn run(&self) {
        loop {
            if let CycleOutcome::Failed(e) = self.run_cycle().await {
                let delay = self.config().await.retry_delay();
                if e.is_recoverable() {
                    tracing::debug!(error = %e, retry_in = ?delay, "Restarting cycle after failure");
                } else {
                    tracing::error!(error = %e, retry_in = ?delay, "Unrecoverable acquisition error");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// Run one arm→init→settle→fetch→decode→publish cycle.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let plan = match self.trigger().await {
            Ok(plan) => plan,
            Err(e) => return self.fail(CycleState::Armed, e).await,
        };

        tracing::debug!(cycle = plan.cycle, state = %CycleState::AwaitingSettle, settle = ?plan.settle);
        tokio::time::sleep(plan.settle).await;

        let mut shared = self.shared.lock().await;
        if std::mem::take(&mut shared.frequency_changed) {
            tracing::info!(cycle = plan.cycle, "Frequency changed during settle, discarding cycle");
            return CycleOutcome::FrequencyChanged;
        }

        tracing::debug!(cycle = plan.cycle, state = %CycleState::Fetching);
        let count = match u32::try_from(plan.samples_per_channel) {
            Ok(count) => count,
            Err(_) => {
                let error = DaqError::Configuration(format!(
                    "fetch of {} samples per channel exceeds the command range",
                    plan.samples_per_channel
                ));
                return Self::record_fault(&mut shared, CycleState::Fetching, error);
            }
        };
        let fetch = Command::FetchScan { start: 0, count };
        let raw = match shared.protocol.query_raw(fetch).await {
            Ok(raw) => raw,
            Err(e) => {
                return Self::record_fault(&mut shared, CycleState::Fetching, e.into());
            }
        };

        tracing::debug!(cycle = plan.cycle, state = %CycleState::Decoding, bytes = raw.len());
        let frame = match frame::decode(&raw, plan.samples_per_channel) {
            Ok(DecodeOutcome::Frame(frame)) => frame,
            Ok(DecodeOutcome::Empty) => {
                tracing::debug!(cycle = plan.cycle, "Empty scan record received");
                return CycleOutcome::EmptyScan;
            }
            Err(e) => {
                return Self::record_fault(&mut shared, CycleState::Decoding, e.into());
            }
        };

        tracing::debug!(
            cycle = plan.cycle,
            state = %CycleState::Publishing,
            samples = frame.samples.len(),
            scan_index = frame.metadata.scan_index,
            scan_count = frame.metadata.scan_count,
            samples_per_scan = frame.metadata.samples_per_scan,
            timestamp = frame.metadata.timestamp
        );
        shared.store_and_publish(&frame, self.sink.as_ref());
        shared.state.last_fault = None;

        CycleOutcome::Published {
            samples: frame.samples.len(),
            scan_index: frame.metadata.scan_index,
        }
    }

    /// Idle → Armed → Initiated, under the lock.
    async fn trigger(&self) -> DaqResult<CyclePlan> {
        let mut shared = self.shared.lock().await;
        shared.state.cycles += 1;
        let cycle = shared.state.cycles;

        // A change made before this trigger is already in effect.
        shared.frequency_changed = false;

        tracing::debug!(cycle, state = %CycleState::Idle);
        shared.protocol.send(Command::Stop).await?;
        shared.protocol.send(Command::Arm).await?;
        tracing::debug!(cycle, state = %CycleState::Armed);
        shared.protocol.send(Command::Init).await?;
        tracing::debug!(cycle, state = %CycleState::Initiated);

        Ok(CyclePlan {
            settle: shared.config.settle_time(),
            samples_per_channel: shared.config.samples_per_channel(),
            cycle,
        })
    }

    async fn fail(&self, state: CycleState, error: DaqError) -> CycleOutcome {
        let mut shared = self.shared.lock().await;
        Self::record_fault(&mut shared, state, error)
    }

    fn record_fault(shared: &mut Shared, state: CycleState, error: DaqError) -> CycleOutcome {
        tracing::warn!(state = %state, error = %error, "Acquisition cycle aborted");
        shared.state.last_fault = Some(format!("{}: {}", state, error));
        CycleOutcome::Failed(error)
    }

    /// Change the sample clock.
    ///
    /// Stops the instrument, programs the new clock and discards the cycle
    /// currently settling. Buffers are rebuilt when their capacity is derived
    /// from the frequency.
    pub async fn set_frequency(&self, hz: f64) -> DaqResult<()> {
        validate_frequency(hz)?;
        let mut shared = self.shared.lock().await;

        shared.protocol.send(Command::Stop).await?;
        shared.protocol.send(Command::SetClockFrequency(hz)).await?;

        let mut next = shared.config;
        next.frequency = hz;
        shared.rebuild_buffers(next.buffer_capacity());
        shared.config = next;
        shared.frequency_changed = true;

        tracing::info!(
            frequency = hz,
            samples_per_channel = shared.config.samples_per_channel(),
            "Frequency set"
        );
        self.sink.set_f64(P_FREQUENCY, hz);
        self.sink.notify();
        Ok(())
    }

    /// Query the instrument's sample clock and adopt it.
    pub async fn read_frequency(&self) -> DaqResult<f64> {
        let mut shared = self.shared.lock().await;
        let hz = shared.protocol.query_f64(Command::QueryClockFrequency).await?;
        validate_frequency(hz)?;

        if hz != shared.config.frequency {
            tracing::info!(reported = hz, configured = shared.config.frequency, "Adopting instrument frequency");
            let mut next = shared.config;
            next.frequency = hz;
            shared.rebuild_buffers(next.buffer_capacity());
            shared.config = next;
        }
        self.sink.set_f64(P_FREQUENCY, hz);
        self.sink.notify();
        Ok(hz)
    }

    /// Change the averaging window. All channel buffers are emptied before
    /// this returns.
    pub async fn set_average_time(&self, seconds: f64) -> DaqResult<()> {
        validate_average_time(seconds)?;
        let mut shared = self.shared.lock().await;

        for buffer in shared.buffers.iter_mut() {
            buffer.clear();
        }
        shared.config.average_time = seconds;

        tracing::info!(average_time = seconds, "Average time set");
        self.sink.set_f64(P_AVERAGE_TIME, seconds);
        self.sink.notify();
        Ok(())
    }

    /// Query `:SYSTEM:ERROR?` and publish the answer.
    ///
    /// Double quotes are replaced by spaces and the line terminator removed.
    pub async fn read_system_error(&self) -> DaqResult<String> {
        let mut shared = self.shared.lock().await;
        let raw = shared.protocol.query_text(Command::QuerySystemError).await?;
        let text = raw.replace('"', " ").trim().to_string();

        shared.state.last_error = text.clone();
        self.sink.set_text(P_ERROR, &text);
        self.sink.notify();
        Ok(text)
    }

    /// Query the index of the most recent scan (diagnostic).
    pub async fn last_scan_index(&self) -> DaqResult<u64> {
        let mut shared = self.shared.lock().await;
        shared.protocol.query_u64(Command::LastScanIndex).await
    }

    /// Current acquisition settings.
    pub async fn config(&self) -> AcquisitionConfig {
        self.shared.lock().await.config
    }

    /// Published reading of one channel.
    pub async fn channel_reading(&self, channel: usize) -> DaqResult<Option<ChannelReading>> {
        if channel >= NUMBER_OF_CHANNELS {
            return Err(DaqError::InvalidChannel(channel));
        }
        Ok(self.shared.lock().await.state.channels[channel])
    }

    /// Published readings of all channels, taken in one lock acquisition.
    pub async fn readings(&self) -> [Option<ChannelReading>; NUMBER_OF_CHANNELS] {
        self.shared.lock().await.state.channels
    }

    /// Copy of the engine state.
    pub async fn state(&self) -> EngineState {
        self.shared.lock().await.state.clone()
    }

    /// Number of samples currently held per channel.
    pub async fn buffer_lengths(&self) -> [usize; NUMBER_OF_CHANNELS] {
        let shared = self.shared.lock().await;
        std::array::from_fn(|ch| shared.buffers[ch].len())
    }

    /// Current capacity of every channel buffer.
    pub async fn buffer_capacity(&self) -> usize {
        self.shared.lock().await.buffers[0].capacity()
    }
}
