//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of layered configuration: file loading, precedence
//! and validation errors.

use mqtt_stream::config::{ConfigError, ConfigLayer, DEFAULT_HOST};
use mqtt_stream::transport::QoS;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(
        r#"
host = "mqtts://broker.example.com"
from = "devices/+/telemetry"
to = "devices/commands"
client_id = "bridge-7"
hex = true
qos = 2
"#,
    );

    let config = ConfigLayer::load_from_file(temp_file.path())
        .unwrap()
        .resolve()
        .unwrap();

    assert_eq!(config.host, "mqtts://broker.example.com");
    assert_eq!(config.from, "devices/+/telemetry");
    assert_eq!(config.to, "devices/commands");
    assert_eq!(config.client_id, "bridge-7");
    assert!(config.hex);
    assert!(!config.echo);
    assert_eq!(config.qos, QoS::ExactlyOnce);
}

#[test]
fn test_empty_file_uses_defaults() {
    let temp_file = write_config("");

    let config = ConfigLayer::load_from_file(temp_file.path())
        .unwrap()
        .resolve()
        .unwrap();

    assert_eq!(config.host, DEFAULT_HOST);
    assert_eq!(config.from, "bar");
    assert_eq!(config.to, "foo");
    assert_eq!(config.keep_alive, Duration::from_secs(30));
}

#[test]
fn test_flags_override_file() {
    let temp_file = write_config(
        r#"
host = "tcp://file-broker:1883"
from = "file/in"
echo = true
reconnect_backoff_ms = [100, 200]
"#,
    );
    let file = ConfigLayer::load_from_file(temp_file.path()).unwrap();
    let flags = ConfigLayer {
        host: Some("tcp://flag-broker:1883".to_string()),
        reconnect_backoff_ms: Some(vec![5]),
        ..Default::default()
    };

    let config = flags.merge(file).resolve().unwrap();

    assert_eq!(config.host, "tcp://flag-broker:1883");
    assert_eq!(config.from, "file/in");
    assert!(config.echo);
    assert_eq!(config.reconnect_backoff_ms, vec![5]);
}

#[test]
fn test_unset_flags_do_not_clear_file_values() {
    let temp_file = write_config("hex = true\nusername = \"reader\"");
    let file = ConfigLayer::load_from_file(temp_file.path()).unwrap();

    let config = ConfigLayer::default().merge(file).resolve().unwrap();

    assert!(config.hex);
    assert_eq!(config.username.as_deref(), Some("reader"));
}

#[test]
fn test_missing_file_is_read_error() {
    let result = ConfigLayer::load_from_file(std::path::Path::new(
        "/nonexistent/mqtt-stream.toml",
    ));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_malformed_toml_is_parse_error() {
    let temp_file = write_config("host = ");
    let result = ConfigLayer::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unknown_key_is_parse_error() {
    let temp_file = write_config("broker_url = \"tcp://localhost\"");
    let result = ConfigLayer::load_from_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_validation_errors_are_reported() {
    let cases = [
        "host = \"localhost:1883\"",
        "host = \"tcp://\"",
        "from = \"\"",
        "from = \"a/b#\"",
        "to = \"out/#\"",
        "qos = 7",
        "keep_alive_secs = 1",
    ];

    for case in cases {
        let temp_file = write_config(case);
        let result = ConfigLayer::load_from_file(temp_file.path())
            .unwrap()
            .resolve();
        assert!(result.is_err(), "expected error for `{case}`");
    }
}
