//! mqtt-stream
//!
//! Bridges standard input and output with an MQTT broker: every input line is
//! published to one topic, every message received on another topic is printed
//! as a line, and inbound messages can optionally be echoed back out.
//!
//! # Overview
//!
//! - [`input`] - Line source reading the input stream on its own task
//! - [`transport`] - Broker client abstraction, bounded waits and the rumqttc client
//! - [`bridge`] - Sessions, their control loop and the reconnect supervisor
//! - [`config`] - Layered configuration
//! - [`observability`] - Logging to standard error
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_stream::bridge::{OutputMode, Printer, Supervisor};
//! use mqtt_stream::config::ConfigLayer;
//! use mqtt_stream::input::spawn_line_source;
//! use mqtt_stream::transport::mqtt::MqttConnector;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let config = ConfigLayer {
//!     host: Some("tcp://localhost:1883".to_string()),
//!     ..Default::default()
//! }
//! .resolve()?;
//!
//! let cancel = CancellationToken::new();
//! let (mut lines, _reader) = spawn_line_source(tokio::io::stdin(), cancel.clone());
//! let printer = Arc::new(Printer::stdout(OutputMode::from_hex_flag(config.hex)));
//!
//! Supervisor::new(MqttConnector::default(), config, printer, cancel)
//!     .run(&mut lines)
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod input;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConfigLayer, StreamConfig};
pub use error::{SessionError, SessionResult};
pub use transport::mqtt::MqttClient;
