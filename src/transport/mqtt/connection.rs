//! Pure connection configuration for the MQTT client
//!
//! This module turns [`ClientOptions`] into rumqttc [`MqttOptions`], including
//! broker-URL parsing and transport selection.

use crate::transport::{BrokerError, ClientOptions};
use rumqttc::{MqttOptions, Transport as RumqttcTransport};
use url::Url;

/// Transport selected by the broker URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerScheme {
    /// `tcp://`, `mqtt://`
    Tcp,
    /// `ssl://`, `tls://`, `mqtts://`
    Tls,
    /// `ws://`
    WebSocket,
    /// `wss://`
    SecureWebSocket,
}

impl BrokerScheme {
    pub fn parse(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "mqtt" => Some(BrokerScheme::Tcp),
            "ssl" | "tls" | "mqtts" => Some(BrokerScheme::Tls),
            "ws" => Some(BrokerScheme::WebSocket),
            "wss" => Some(BrokerScheme::SecureWebSocket),
            _ => None,
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            BrokerScheme::Tcp => 1883,
            BrokerScheme::Tls => 8883,
            BrokerScheme::WebSocket => 80,
            BrokerScheme::SecureWebSocket => 443,
        }
    }

    pub fn is_websocket(self) -> bool {
        matches!(
            self,
            BrokerScheme::WebSocket | BrokerScheme::SecureWebSocket
        )
    }
}

/// Parsed broker address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub scheme: BrokerScheme,
    pub host: String,
    pub port: u16,
    /// Full URL, which rumqttc expects as the host for websocket transports
    pub url: String,
}

/// Parse a scheme-qualified broker address
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerAddress, BrokerError> {
    let invalid = || BrokerError::InvalidBrokerUrl(broker_url.to_string());

    let url = Url::parse(broker_url).map_err(|_| invalid())?;
    let scheme = BrokerScheme::parse(url.scheme()).ok_or_else(invalid)?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(invalid)?;
    let port = url.port().unwrap_or(scheme.default_port());

    Ok(BrokerAddress {
        scheme,
        host: host.to_string(),
        port,
        url: url.to_string(),
    })
}

/// Pure function to configure MQTT options from client options
pub fn configure_mqtt_options(options: &ClientOptions) -> Result<MqttOptions, BrokerError> {
    let address = parse_broker_url(&options.broker_url)?;

    let host = if address.scheme.is_websocket() {
        address.url.clone()
    } else {
        address.host.clone()
    };
    let mut mqtt_options = MqttOptions::new(options.client_id.clone(), host, address.port);

    match address.scheme {
        BrokerScheme::Tcp => {}
        BrokerScheme::Tls => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        BrokerScheme::WebSocket => {
            mqtt_options.set_transport(RumqttcTransport::Ws);
        }
        BrokerScheme::SecureWebSocket => {
            mqtt_options.set_transport(RumqttcTransport::wss_with_default_config());
        }
    }

    if let Some(username) = options.username.as_deref().filter(|u| !u.is_empty()) {
        let password = options.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(options.keep_alive);
    mqtt_options.set_clean_session(true);

    Ok(mqtt_options)
}
