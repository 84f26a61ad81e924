//! Transport layer for the bridge
//!
//! This module provides the broker client abstraction the bridge core is
//! written against, plus the rumqttc implementation in [`mqtt`].
//!
//! Every broker request returns a [`Token`] right away; callers bound the
//! wait with [`wait`]. A client is created per session by a [`Connector`],
//! which also receives the connection-lost handler for that session.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

pub mod mqtt;
pub mod token;
pub mod wait;

pub use token::{Completer, Token};
pub use wait::{wait, wait_with_interval, WaitError, DEFAULT_DEADLINE, POLL_INTERVAL};

/// Delivery guarantee requested for publish and subscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Map a numeric MQTT QoS level (0, 1 or 2)
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

/// Parameters for one broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Scheme-qualified broker address, e.g. `tcp://localhost:1883`
    pub broker_url: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

/// Broker client errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request rejected by client: {0}")]
    RequestFailed(String),
    #[error("subscription to {topic} rejected by broker")]
    SubscriptionRejected { topic: String },
    #[error("connection lost: {0}")]
    ConnectionLost(String),
    #[error("operation abandoned before completion")]
    Abandoned,
}

/// Receives the error that ended an established connection.
/// Fired at most once per client.
pub type ConnectionLostHandler = oneshot::Sender<BrokerError>;

/// Subscription callback, invoked once per inbound message
///
/// Invocations for one client are sequential and in arrival order, on a
/// task owned by the client.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: Bytes);
}

/// One broker connection
///
/// Publish may be called concurrently from several tasks.
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Start connecting; resolves once the broker accepted the session
    fn connect(&self) -> Token;

    /// Subscribe `handler` to `filter`; resolves on the broker's acknowledgement
    fn subscribe(&self, filter: &str, qos: QoS, handler: Arc<dyn MessageHandler>) -> Token;

    /// Publish `payload` to `topic` without retain
    fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Token;

    /// Disconnect and release the connection, waiting at most `grace`
    async fn disconnect(&self, grace: Duration);
}

/// Factory for per-session broker clients
pub trait Connector: Send + Sync {
    type Client: BrokerClient;

    fn create(
        &self,
        options: &ClientOptions,
        on_connection_lost: ConnectionLostHandler,
    ) -> Result<Self::Client, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        for level in 0..=2 {
            let qos = QoS::from_level(level).unwrap();
            assert_eq!(qos.level(), level);
        }
        assert_eq!(QoS::from_level(3), None);
        assert_eq!(QoS::default(), QoS::AtMostOnce);
    }

    #[test]
    fn test_broker_error_display() {
        let errors = vec![
            BrokerError::InvalidBrokerUrl("test".to_string()),
            BrokerError::ConnectionFailed("test".to_string()),
            BrokerError::RequestFailed("test".to_string()),
            BrokerError::SubscriptionRejected {
                topic: "test".to_string(),
            },
            BrokerError::ConnectionLost("test".to_string()),
            BrokerError::Abandoned,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
