//! `dt8824d`: DT8824 acquisition service.
//!
//! Loads configuration, connects to the instrument (or a simulated one),
//! runs bring-up and then acquires until Ctrl-C, logging a reading summary
//! each time new values are published.
//!
//! # Usage
//!
//! ```bash
//! dt8824d --host 192.168.0.100
//! dt8824d --mock --log-format pretty
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use dt8824_daq::acquisition::{AcquisitionConfig, AcquisitionEngine};
use dt8824_daq::config::{Dt8824Config, DEFAULT_CONFIG_PATH};
use dt8824_daq::hardware::{MockDt8824, TcpTransport, Transport};
use dt8824_daq::logging::{self, OutputFormat, TracingConfig};
use dt8824_daq::parameter::{ParameterStore, P_VOLTAGE, P_VOLTAGE_AVG};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dt8824d")]
#[command(about = "Continuous acquisition from a DT8824 ADC", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Instrument host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Instrument port, overrides the configuration
    #[arg(long)]
    port: Option<u16>,

    /// Use the simulated instrument instead of a TCP connection
    #[arg(long)]
    mock: bool,

    /// Log output format
    #[arg(long, default_value = "compact")]
    log_format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Dt8824Config::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(host) = cli.host {
        config.instrument.host = host;
    }
    if let Some(port) = cli.port {
        config.instrument.port = port;
    }
    config.validate()?;

    let tracing_config = TracingConfig::from_config(&config)
        .map_err(anyhow::Error::msg)?
        .with_format(cli.log_format);
    logging::init(tracing_config).map_err(anyhow::Error::msg)?;

    tracing::info!(name = %config.application.name, mock = cli.mock, "Starting");

    let transport: Box<dyn Transport> = if cli.mock {
        Box::new(MockDt8824::new(config.acquisition.frequency))
    } else {
        let tcp = TcpTransport::connect(
            &config.instrument.host,
            config.instrument.port,
            config.instrument.connect_timeout(),
        )
        .await
        .with_context(|| {
            format!(
                "connecting to {}:{}",
                config.instrument.host, config.instrument.port
            )
        })?;
        Box::new(tcp)
    };

    let store = Arc::new(ParameterStore::new());
    let engine = AcquisitionEngine::new(
        transport,
        AcquisitionConfig::from(&config.acquisition),
        config.instrument.timeout(),
        store.clone(),
    )?;

    engine.initialize().await.context("instrument bring-up failed")?;
    match engine.read_system_error().await {
        Ok(text) => tracing::info!(error = %text, "Instrument status"),
        Err(e) => tracing::warn!(error = %e, "Could not read instrument status"),
    }

    let acquisition = engine.spawn();
    let mut updates = store.subscribe();

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let summary: Vec<String> = (0..P_VOLTAGE.len())
                    .map(|ch| {
                        format!(
                            "ch{}={:.6}/{:.6}",
                            ch,
                            store.get_f64(P_VOLTAGE[ch]).unwrap_or(f64::NAN),
                            store.get_f64(P_VOLTAGE_AVG[ch]).unwrap_or(f64::NAN),
                        )
                    })
                    .collect();
                tracing::info!(readings = %summary.join(" "), "Published");
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    acquisition.abort();
    Ok(())
}
