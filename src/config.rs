//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. `config/dt8824.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `DT8824_` (nested keys split on `__`)
//!
//! Every section has defaults, so an empty file (or none at all) yields a
//! usable configuration for a local instrument.
//!
//! # Example
//! ```no_run
//! use dt8824_daq::config::Dt8824Config;
//!
//! let config = Dt8824Config::load()?;
//! config.validate()?;
//! println!("Instrument: {}:{}", config.instrument.host, config.instrument.port);
//! # Ok::<(), dt8824_daq::error::DaqError>(())
//! ```

use crate::acquisition::AcquisitionConfig;
use crate::error::{DaqError, DaqResult};
use crate::hardware::transport::DEFAULT_PORT;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/dt8824.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dt8824Config {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument connection
    pub instrument: InstrumentConfig,
    /// Acquisition settings applied at startup
    pub acquisition: AcquisitionSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "DT8824 acquisition".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Instrument connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    /// Hostname or IP address
    pub host: String,
    /// SCPI socket port
    pub port: u16,
    /// Per-command write/read timeout in milliseconds
    pub timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            host: "192.168.0.100".to_string(),
            port: DEFAULT_PORT,
            timeout_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl InstrumentConfig {
    /// Per-command timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Instrument sample clock
    pub frequency: f64,
    /// Averaging window and poll cadence in seconds
    pub average_time: f64,
    /// Explicit channel buffer capacity; derived from the frequency if unset
    pub max_buffer_size: Option<usize>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            frequency: 1000.0,
            average_time: 0.5,
            max_buffer_size: None,
        }
    }
}

impl From<&AcquisitionSettings> for AcquisitionConfig {
    fn from(settings: &AcquisitionSettings) -> Self {
        AcquisitionConfig {
            frequency: settings.frequency,
            average_time: settings.average_time,
            max_buffer_size: settings.max_buffer_size,
        }
    }
}

impl Dt8824Config {
    /// Load configuration from `config/dt8824.toml` and environment variables
    ///
    /// Environment variables override the file, e.g.
    /// `DT8824_INSTRUMENT__HOST=10.0.0.5` or `DT8824_ACQUISITION__AVERAGE_TIME=1.0`.
    pub fn load() -> DaqResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> DaqResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("DT8824_").split("__"))
            .extract()
            .map_err(DaqError::from)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DaqResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.instrument.host.trim().is_empty() {
            return Err(DaqError::Configuration("instrument.host is empty".into()));
        }

        if self.instrument.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "instrument.timeout_ms must be non-zero".into(),
            ));
        }

        AcquisitionConfig::from(&self.acquisition).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Dt8824Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instrument.port, 5025);
        assert_eq!(config.acquisition.max_buffer_size, None);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[instrument]
host = "10.1.2.3"
timeout_ms = 250

[acquisition]
frequency = 125.0
average_time = 0.1
max_buffer_size = 64
"#
        )
        .unwrap();

        let config = Dt8824Config::load_from(file.path()).unwrap();
        assert_eq!(config.instrument.host, "10.1.2.3");
        assert_eq!(config.instrument.timeout(), Duration::from_millis(250));
        assert_eq!(config.instrument.port, 5025);
        assert_eq!(config.acquisition.frequency, 125.0);
        assert_eq!(config.acquisition.max_buffer_size, Some(64));
        assert_eq!(config.application.log_level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Dt8824Config::load_from("/nonexistent/dt8824.toml").unwrap();
        assert_eq!(config.acquisition, AcquisitionSettings::default());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Dt8824Config::default();
        config.application.log_level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_non_positive_average_time_rejected() {
        let mut config = Dt8824Config::default();
        config.acquisition.average_time = 0.0;
        assert!(config.validate().is_err());

        config.acquisition.average_time = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Dt8824Config::default();
        config.instrument.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
