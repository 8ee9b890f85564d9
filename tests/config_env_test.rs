//! Environment overrides for the configuration file.
//!
//! Kept in its own test binary: the process environment is shared by every
//! test in a binary.

use dt8824_daq::acquisition::AcquisitionConfig;
use dt8824_daq::config::Dt8824Config;
use std::io::Write;

#[test]
fn test_environment_overrides_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[instrument]
host = "10.0.0.1"

[acquisition]
frequency = 2500.0
average_time = 0.2
"#
    )
    .unwrap();

    std::env::set_var("DT8824_INSTRUMENT__HOST", "10.0.0.9");
    std::env::set_var("DT8824_ACQUISITION__AVERAGE_TIME", "1.5");
    let config = Dt8824Config::load_from(file.path());
    std::env::remove_var("DT8824_INSTRUMENT__HOST");
    std::env::remove_var("DT8824_ACQUISITION__AVERAGE_TIME");

    let config = config.unwrap();
    assert_eq!(config.instrument.host, "10.0.0.9");
    assert_eq!(config.acquisition.frequency, 2500.0);
    assert_eq!(config.acquisition.average_time, 1.5);
    config.validate().unwrap();

    // 1000 scans/s * 1.5 s
    let acquisition = AcquisitionConfig::from(&config.acquisition);
    assert_eq!(acquisition.samples_per_channel(), 1500);
    assert_eq!(acquisition.buffer_capacity(), 1000);
}

#[test]
fn test_invalid_file_is_reported() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[acquisition]\nfrequency = \"fast\"").unwrap();

    assert!(Dt8824Config::load_from(file.path()).is_err());
}
