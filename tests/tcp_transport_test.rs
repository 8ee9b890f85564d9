//! End-to-end acquisition over a real TCP socket.
//!
//! A loopback listener relays each command line to a [`MockDt8824`] and
//! writes back whatever it answers, so scan frames cross the socket as
//! binary blocks that may contain line-feed bytes before their terminator.

use dt8824_daq::acquisition::{AcquisitionConfig, AcquisitionEngine, CycleOutcome};
use dt8824_daq::hardware::dt8824::frame::raw_to_voltage;
use dt8824_daq::hardware::{MockDt8824, TcpTransport, Transport};
use dt8824_daq::parameter::ParameterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Serve one connection, answering from a simulated instrument.
async fn spawn_instrument(mock: MockDt8824) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader);
        let mut backend = mock;
        let mut line = Vec::new();

        loop {
            line.clear();
            match lines.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            backend.write(&line, Duration::from_millis(10)).await.unwrap();
            if let Ok(reply) = backend.read(Duration::from_millis(10)).await {
                writer.write_all(&reply).await.unwrap();
            }
        }
    });

    port
}

async fn connect(port: u16) -> TcpTransport {
    TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1))
        .await
        .expect("loopback connect")
}

#[tokio::test]
async fn test_acquisition_over_tcp() {
    let mock = MockDt8824::new(1000.0);
    let port = spawn_instrument(mock.clone()).await;

    let store = Arc::new(ParameterStore::new());
    let config = AcquisitionConfig {
        frequency: 1000.0,
        average_time: 0.05,
        max_buffer_size: None,
    };
    let engine = AcquisitionEngine::new(
        Box::new(connect(port).await),
        config,
        Duration::from_millis(500),
        store,
    )
    .unwrap();

    engine.initialize().await.unwrap();
    assert_eq!(engine.read_frequency().await.unwrap(), 1000.0);

    // 400 scans/s * 0.05 s = 20 samples per channel
    for _ in 0..3 {
        match engine.run_cycle().await {
            CycleOutcome::Published { samples, .. } => assert_eq!(samples, 80),
            other => panic!("expected publish, got {:?}", other),
        }
    }

    for ch in 0..4 {
        let reading = engine.channel_reading(ch).await.unwrap().unwrap();
        let expected = raw_to_voltage(MockDt8824::sample_word(reading.scan_index, ch, 19));
        assert!((reading.voltage - expected).abs() < 1e-12);
    }
    assert_eq!(engine.buffer_lengths().await, [60; 4]);
    assert_eq!(engine.last_scan_index().await.unwrap(), 3);

    assert_eq!(
        &mock.commands()[..4],
        &[
            ":SYST:PASS:CEN admin",
            ":AD:ENAB ON, (@1,2,3,4)",
            ":AD:ABOR",
            ":AD:CLOC:FREQ 1000",
        ]
    );
}

#[tokio::test]
async fn test_connect_refused() {
    // Bind then drop to find a port nothing listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_silent_instrument_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(socket);
    });

    let store = Arc::new(ParameterStore::new());
    let engine = AcquisitionEngine::new(
        Box::new(connect(port).await),
        AcquisitionConfig::default(),
        Duration::from_millis(100),
        store,
    )
    .unwrap();

    assert!(engine.read_system_error().await.is_err());
    server.abort();
}
