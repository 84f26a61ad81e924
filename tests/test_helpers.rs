//! Test helpers and utilities for integration tests

use bytes::Bytes;
use mqtt_stream::bridge::{OutputMode, Printer};
use mqtt_stream::config::StreamConfig;
use mqtt_stream::input::LineStream;
use mqtt_stream::testing::SharedBuffer;
use mqtt_stream::transport::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> StreamConfig {
    StreamConfig {
        host: "tcp://localhost:1883".to_string(),
        from: "bar".to_string(),
        to: "foo".to_string(),
        client_id: "mqtt-stream-test".to_string(),
        username: None,
        password: None,
        hex: false,
        echo: false,
        qos: QoS::AtMostOnce,
        keep_alive: Duration::from_secs(30),
        reconnect_backoff_ms: Vec::new(),
    }
}

/// Printer capturing into a buffer the test can inspect
#[allow(dead_code)]
pub fn capture_printer(mode: OutputMode) -> (Arc<Printer>, SharedBuffer) {
    let buffer = SharedBuffer::new();
    let printer = Arc::new(Printer::new(mode, Box::new(buffer.clone())));
    (printer, buffer)
}

/// Line stream fed by the returned sender
#[allow(dead_code)]
pub fn line_channel() -> (mpsc::Sender<Bytes>, LineStream) {
    let (tx, rx) = mpsc::channel(1);
    (tx, LineStream::from_receiver(rx))
}

/// Generous bound for conditions that should hold almost immediately
#[allow(dead_code)]
pub const SETTLE: Duration = Duration::from_secs(2);
