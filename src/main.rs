//! mqtt-stream - Main Entry Point
//!
//! Publishes standard input lines to an MQTT topic and prints messages from
//! another topic to standard output, reconnecting until interrupted.

use clap::Parser;
use mqtt_stream::bridge::{OutputMode, Printer, Supervisor};
use mqtt_stream::config::{ConfigError, ConfigLayer, StreamConfig};
use mqtt_stream::input::spawn_line_source;
use mqtt_stream::observability::init_default_logging;
use mqtt_stream::transport::mqtt::MqttConnector;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Bridge standard input/output with an MQTT broker
#[derive(Parser)]
#[command(name = "mqtt-stream")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_STREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Broker address, e.g. tcp://localhost:1883 or ssl://broker:8883
    #[arg(long, env = "MQTT_STREAM_HOST")]
    host: Option<String>,

    /// Topic to subscribe to and print
    #[arg(long, env = "MQTT_STREAM_FROM")]
    from: Option<String>,

    /// Topic to publish input lines to
    #[arg(long, env = "MQTT_STREAM_TO")]
    to: Option<String>,

    /// Client identifier (random by default)
    #[arg(long, env = "MQTT_STREAM_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "MQTT_STREAM_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "MQTT_STREAM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print payloads as hex and decode input lines from hex
    #[arg(long, env = "MQTT_STREAM_HEX")]
    hex: bool,

    /// Re-publish received messages to the publish topic
    #[arg(long, env = "MQTT_STREAM_ECHO")]
    echo: bool,

    /// QoS level for publish and subscribe
    #[arg(long, env = "MQTT_STREAM_QOS", value_parser = clap::value_parser!(u8).range(0..=2))]
    qos: Option<u8>,

    /// Keep-alive interval in seconds
    #[arg(long, value_name = "SECS", env = "MQTT_STREAM_KEEP_ALIVE")]
    keep_alive: Option<u64>,

    /// Delays in milliseconds between reconnect attempts, e.g. 25,50,100,250
    #[arg(
        long,
        value_name = "MS",
        env = "MQTT_STREAM_RECONNECT_BACKOFF",
        value_delimiter = ','
    )]
    reconnect_backoff: Option<Vec<u64>>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the resolved configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Flags and environment variables as the highest-precedence layer
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            host: self.host.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            hex: self.hex.then_some(true),
            echo: self.echo.then_some(true),
            qos: self.qos,
            keep_alive_secs: self.keep_alive,
            reconnect_backoff_ms: self.reconnect_backoff.clone(),
            verbose: (self.verbose > 0).then_some(self.verbose),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let file_layer = load_file_layer(&cli.config);
    let verbosity = match &file_layer {
        Ok(layer) => cli.verbose.max(layer.verbose.unwrap_or(0)),
        Err(_) => cli.verbose,
    };
    init_default_logging(verbosity);

    let config = match file_layer.and_then(|file| cli.layer().merge(file).resolve()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if cli.print_config {
        match toml::to_string_pretty(&ConfigLayer::from(&config)) {
            Ok(rendered) => {
                print!("{rendered}");
                let _ = io::stdout().flush();
                process::exit(0);
            }
            Err(e) => {
                error!("Failed to render configuration: {}", e);
                process::exit(1);
            }
        }
    }

    let code = match run(config).await {
        Ok(()) => {
            info!("Shutdown complete");
            0
        }
        Err(e) => {
            error!("{}", e);
            1
        }
    };

    // The blocking stdin read would otherwise hold up runtime shutdown
    process::exit(code);
}

fn load_file_layer(path: &Option<PathBuf>) -> Result<ConfigLayer, ConfigError> {
    match path {
        Some(path) => ConfigLayer::load_from_file(path),
        None => Ok(ConfigLayer::default()),
    }
}

async fn run(config: StreamConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        broker = %config.host,
        from = %config.from,
        to = %config.to,
        client_id = %config.client_id,
        "Starting mqtt-stream v{}",
        env!("CARGO_PKG_VERSION")
    );

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone())?;

    let (mut lines, _reader) = spawn_line_source(tokio::io::stdin(), cancel.clone());
    let printer = Arc::new(Printer::stdout(OutputMode::from_hex_flag(config.hex)));

    let supervisor = Supervisor::new(MqttConnector::default(), config, printer, cancel);
    supervisor.run(&mut lines).await?;
    Ok(())
}

/// Cancel on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) -> std::io::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        }
        debug!("Cancelling sessions");
        cancel.cancel();
    });
    Ok(())
}
