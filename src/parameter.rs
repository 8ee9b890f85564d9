//! Named parameter exposure with change notification.
//!
//! The acquisition engine publishes its results through the
//! [`ParameterSink`] capability and never depends on how a host surfaces
//! them. [`ParameterStore`] is the in-process implementation: a name→value
//! map plus a `tokio::sync::watch` generation counter that subscribers can
//! await, the same notification mechanism used for observable parameters
//! elsewhere in the DAQ stack.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(ParameterStore::new());
//! let mut rx = store.subscribe();
//! tokio::spawn(async move {
//!     while rx.changed().await.is_ok() {
//!         println!("ch0 average: {:?}", store.get_f64("avg_voltage_ch0"));
//!     }
//! });
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::hardware::dt8824::frame::NUMBER_OF_CHANNELS;

/// Last decoded voltage, per channel.
pub const P_VOLTAGE: [&str; NUMBER_OF_CHANNELS] =
    ["voltage_ch0", "voltage_ch1", "voltage_ch2", "voltage_ch3"];

/// Rolling average voltage, per channel.
pub const P_VOLTAGE_AVG: [&str; NUMBER_OF_CHANNELS] = [
    "avg_voltage_ch0",
    "avg_voltage_ch1",
    "avg_voltage_ch2",
    "avg_voltage_ch3",
];

/// Instrument sample clock.
pub const P_FREQUENCY: &str = "frequency";

/// Averaging window in seconds.
pub const P_AVERAGE_TIME: &str = "average_time";

/// Last instrument system-error text.
pub const P_ERROR: &str = "error";

/// A published parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Floating-point value.
    Float(f64),
    /// Text value.
    Text(String),
}

/// Capability: receive named values from the engine.
///
/// Implementations must be cheap and non-blocking; the engine calls them
/// while holding its state lock so that a notification always describes one
/// consistent decode batch.
pub trait ParameterSink: Send + Sync {
    /// Store a floating-point value.
    fn set_f64(&self, name: &str, value: f64);

    /// Store a text value.
    fn set_text(&self, name: &str, value: &str);

    /// Signal that a batch of `set_*` calls is complete.
    fn notify(&self);

    /// Store every value as one batch, then notify.
    ///
    /// Readers of a batching implementation never observe part of `values`.
    /// The default applies them one at a time.
    fn publish(&self, values: &[(&str, ParamValue)]) {
        for (name, value) in values {
            match value {
                ParamValue::Float(v) => self.set_f64(name, *v),
                ParamValue::Text(t) => self.set_text(name, t),
            }
        }
        self.notify();
    }
}

/// In-memory [`ParameterSink`] with watch-based change notification.
pub struct ParameterStore {
    values: RwLock<HashMap<String, ParamValue>>,
    generation: watch::Sender<u64>,
}

impl ParameterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            values: RwLock::new(HashMap::new()),
            generation,
        }
    }

    /// Current value of a floating-point parameter.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        match self.values.read().get(name) {
            Some(ParamValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Current value of a text parameter.
    pub fn get_text(&self, name: &str) -> Option<String> {
        match self.values.read().get(name) {
            Some(ParamValue::Text(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Copy of every published value.
    pub fn snapshot(&self) -> HashMap<String, ParamValue> {
        self.values.read().clone()
    }

    /// Receiver that wakes once per [`ParameterSink::notify`].
    ///
    /// The carried value is the number of notifications so far.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Number of notifications so far.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSink for ParameterStore {
    fn set_f64(&self, name: &str, value: f64) {
        self.values
            .write()
            .insert(name.to_string(), ParamValue::Float(value));
    }

    fn set_text(&self, name: &str, value: &str) {
        self.values
            .write()
            .insert(name.to_string(), ParamValue::Text(value.to_string()));
    }

    fn notify(&self) {
        // send_modify succeeds even without subscribers.
        self.generation.send_modify(|g| *g += 1);
    }

    fn publish(&self, values: &[(&str, ParamValue)]) {
        {
            let mut map = self.values.write();
            for (name, value) in values {
                map.insert((*name).to_string(), value.clone());
            }
        }
        self.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_by_type() {
        let store = ParameterStore::new();
        store.set_f64(P_FREQUENCY, 1000.0);
        store.set_text(P_ERROR, "0, No error");

        assert_eq!(store.get_f64(P_FREQUENCY), Some(1000.0));
        assert_eq!(store.get_text(P_ERROR).as_deref(), Some("0, No error"));
        assert_eq!(store.get_f64(P_ERROR), None);
        assert_eq!(store.get_text(P_FREQUENCY), None);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_notify_without_subscribers() {
        let store = ParameterStore::new();
        store.notify();
        store.notify();
        assert_eq!(store.generation(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_wakes_on_notify() {
        let store = ParameterStore::new();
        let mut rx = store.subscribe();

        store.set_f64(P_VOLTAGE_AVG[2], -0.5);
        store.notify();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(store.get_f64("avg_voltage_ch2"), Some(-0.5));
    }

    #[test]
    fn test_publish_applies_batch_with_one_notification() {
        let store = ParameterStore::new();
        store.publish(&[
            (P_VOLTAGE[0], ParamValue::Float(1.5)),
            (P_VOLTAGE_AVG[0], ParamValue::Float(1.25)),
            (P_ERROR, ParamValue::Text("0, No error".into())),
        ]);

        assert_eq!(store.generation(), 1);
        assert_eq!(store.get_f64(P_VOLTAGE[0]), Some(1.5));
        assert_eq!(store.get_f64(P_VOLTAGE_AVG[0]), Some(1.25));
        assert_eq!(store.get_text(P_ERROR).as_deref(), Some("0, No error"));
    }

    #[test]
    fn test_concurrent_snapshots_see_whole_batches() {
        let store = std::sync::Arc::new(ParameterStore::new());
        let reader = {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..20_000 {
                    let snapshot = store.snapshot();
                    let voltage = snapshot.get(P_VOLTAGE[1]);
                    let average = snapshot.get(P_VOLTAGE_AVG[1]);
                    assert_eq!(voltage, average, "torn batch");
                }
            })
        };

        for i in 0..20_000 {
            let v = f64::from(i);
            store.publish(&[
                (P_VOLTAGE[1], ParamValue::Float(v)),
                (P_VOLTAGE_AVG[1], ParamValue::Float(v)),
            ]);
        }
        reader.join().unwrap();
    }

    #[test]
    fn test_parameter_names() {
        assert_eq!(P_VOLTAGE[3], "voltage_ch3");
        assert_eq!(P_VOLTAGE_AVG[0], "avg_voltage_ch0");
    }
}
