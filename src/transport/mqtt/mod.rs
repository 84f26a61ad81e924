//! rumqttc-backed broker client
//!
//! This module provides the production [`Connector`](crate::transport::Connector),
//! split into focused sub-modules:
//!
//! - [`connection`] - Pure broker-URL parsing and option configuration
//! - [`events`] - Pure routing of rumqttc events
//! - [`topic`] - Topic validation and filter matching
//! - [`client`] - Impure I/O operations and task coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_stream::transport::mqtt::MqttConnector;
//! use mqtt_stream::transport::{wait, ClientOptions, Connector, BrokerClient, DEFAULT_DEADLINE};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let options = ClientOptions {
//!     broker_url: "tcp://localhost:1883".to_string(),
//!     client_id: "mqtt-stream-example".to_string(),
//!     username: None,
//!     password: None,
//!     keep_alive: Duration::from_secs(30),
//! };
//!
//! let (lost_tx, _lost_rx) = tokio::sync::oneshot::channel();
//! let client = MqttConnector::default().create(&options, lost_tx)?;
//! let cancel = CancellationToken::new();
//! wait(&cancel, client.connect(), DEFAULT_DEADLINE).await?;
//! client.disconnect(Duration::from_secs(1)).await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod events;
pub mod topic;

pub use client::{MqttClient, MqttConnector};
pub use connection::{configure_mqtt_options, parse_broker_url, BrokerAddress, BrokerScheme};
pub use events::{route_event, EventRoute};
pub use topic::{
    parse_shared_filter, topic_matches, validate_topic_filter, validate_topic_name, TopicError,
};
