//! Configuration for the bridge
//!
//! Settings come from layers merged in precedence order: command-line flags,
//! `MQTT_STREAM_*` environment variables (both handled by clap in the
//! binary), an optional TOML file, then built-in defaults. Each layer is a
//! [`ConfigLayer`]; [`ConfigLayer::resolve`] applies the defaults and
//! validates the result into an immutable [`StreamConfig`].

use crate::transport::mqtt::{
    parse_broker_url, validate_topic_filter, validate_topic_name, TopicError,
};
use crate::transport::{BrokerError, ClientOptions, QoS};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "tcp://test.mosquitto.org:1883";
pub const DEFAULT_FROM_TOPIC: &str = "bar";
pub const DEFAULT_TO_TOPIC: &str = "foo";
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 30;

/// Shortest keep-alive accepted, in seconds (0 disables keep-alive)
const MIN_KEEP_ALIVE_SECS: u64 = 5;

const CLIENT_ID_PREFIX: &str = "mqtt-stream-";

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker address: {0}")]
    InvalidHost(#[source] BrokerError),
    #[error("Invalid {field} topic: {source}")]
    InvalidTopic {
        field: &'static str,
        #[source]
        source: TopicError,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Resolved, read-only bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Scheme-qualified broker address
    pub host: String,
    /// Topic to subscribe to
    pub from: String,
    /// Topic to publish to
    pub to: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Hex-encode printed payloads and hex-decode input lines
    pub hex: bool,
    /// Re-publish inbound messages to `to`
    pub echo: bool,
    pub qos: QoS,
    pub keep_alive: Duration,
    /// Reconnect delays in milliseconds; empty retries immediately
    pub reconnect_backoff_ms: Vec<u64>,
}

impl StreamConfig {
    /// Connection parameters for one session
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            broker_url: self.host.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            keep_alive: self.keep_alive,
        }
    }
}

/// One configuration source; unset fields fall through to the next layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hex: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_backoff_ms: Option<Vec<u64>>,
    /// Log verbosity (0 = info, 1 = debug, 2+ = trace)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<u8>,
}

impl ConfigLayer {
    /// Load a layer from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Fill every unset field of `self` from `lower`
    pub fn merge(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            host: self.host.or(lower.host),
            from: self.from.or(lower.from),
            to: self.to.or(lower.to),
            client_id: self.client_id.or(lower.client_id),
            username: self.username.or(lower.username),
            password: self.password.or(lower.password),
            hex: self.hex.or(lower.hex),
            echo: self.echo.or(lower.echo),
            qos: self.qos.or(lower.qos),
            keep_alive_secs: self.keep_alive_secs.or(lower.keep_alive_secs),
            reconnect_backoff_ms: self.reconnect_backoff_ms.or(lower.reconnect_backoff_ms),
            verbose: self.verbose.or(lower.verbose),
        }
    }

    /// Apply defaults and validate
    pub fn resolve(self) -> Result<StreamConfig, ConfigError> {
        let host = self.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        parse_broker_url(&host).map_err(ConfigError::InvalidHost)?;

        let from = self.from.unwrap_or_else(|| DEFAULT_FROM_TOPIC.to_string());
        validate_topic_filter(&from).map_err(|source| ConfigError::InvalidTopic {
            field: "subscribe",
            source,
        })?;

        let to = self.to.unwrap_or_else(|| DEFAULT_TO_TOPIC.to_string());
        validate_topic_name(&to).map_err(|source| ConfigError::InvalidTopic {
            field: "publish",
            source,
        })?;

        let client_id = self.client_id.unwrap_or_else(generate_default_client_id);
        if client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client id must not be empty".to_string(),
            ));
        }

        let qos_level = self.qos.unwrap_or(0);
        let qos = QoS::from_level(qos_level).ok_or_else(|| {
            ConfigError::InvalidConfig(format!("qos must be 0, 1 or 2, got {qos_level}"))
        })?;

        let keep_alive_secs = self.keep_alive_secs.unwrap_or(DEFAULT_KEEP_ALIVE_SECS);
        if keep_alive_secs != 0 && keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "keep alive must be 0 or at least {MIN_KEEP_ALIVE_SECS} seconds, got {keep_alive_secs}"
            )));
        }

        Ok(StreamConfig {
            host,
            from,
            to,
            client_id,
            username: self.username.filter(|u| !u.is_empty()),
            password: self.password.filter(|p| !p.is_empty()),
            hex: self.hex.unwrap_or(false),
            echo: self.echo.unwrap_or(false),
            qos,
            keep_alive: Duration::from_secs(keep_alive_secs),
            reconnect_backoff_ms: self.reconnect_backoff_ms.unwrap_or_default(),
        })
    }
}

impl From<&StreamConfig> for ConfigLayer {
    /// Render a resolved config back into file form, password redacted
    fn from(config: &StreamConfig) -> Self {
        ConfigLayer {
            host: Some(config.host.clone()),
            from: Some(config.from.clone()),
            to: Some(config.to.clone()),
            client_id: Some(config.client_id.clone()),
            username: config.username.clone(),
            password: config.password.as_ref().map(|_| "***".to_string()),
            hex: Some(config.hex),
            echo: Some(config.echo),
            qos: Some(config.qos.level()),
            keep_alive_secs: Some(config.keep_alive.as_secs()),
            reconnect_backoff_ms: Some(config.reconnect_backoff_ms.clone()),
            verbose: None,
        }
    }
}

/// Default client identifier: `mqtt-stream-` followed by six random bytes in hex
pub fn generate_default_client_id() -> String {
    let random = uuid::Uuid::new_v4();
    // The first six bytes of a v4 UUID carry no version or variant bits
    format!("{CLIENT_ID_PREFIX}{}", hex::encode(&random.as_bytes()[..6]))
}
