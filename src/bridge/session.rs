//! One broker session and its control loop
//!
//! A [`Session`] owns one broker client for one connect, subscribe and serve
//! cycle. While active it services exactly one event per iteration:
//! cancellation, loss of the connection, or the next input line. Inbound
//! messages are handled independently by an [`EchoHandler`] on the client's
//! delivery task.
//!
//! The client is disconnected on every exit path.

use super::output::Printer;
use crate::config::StreamConfig;
use crate::error::{SessionError, SessionResult};
use crate::input::LineStream;
use crate::transport::{
    wait, BrokerClient, BrokerError, Connector, MessageHandler, QoS, DEFAULT_DEADLINE,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Time allowed for a clean disconnect before the connection is dropped
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(1000);

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Subscribing,
    Active,
    Terminating,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Connecting => "connecting",
            SessionState::Subscribing => "subscribing",
            SessionState::Active => "active",
            SessionState::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// One broker connection plus its subscription
pub struct Session<C: BrokerClient> {
    client: Arc<C>,
    connection_lost: oneshot::Receiver<BrokerError>,
    config: StreamConfig,
    printer: Arc<Printer>,
    cancel: CancellationToken,
    state: SessionState,
}

impl<C: BrokerClient> Session<C> {
    /// Create the client for a new session. Nothing is sent to the broker yet.
    pub fn create<K>(
        connector: &K,
        config: StreamConfig,
        printer: Arc<Printer>,
        cancel: CancellationToken,
    ) -> SessionResult<Self>
    where
        K: Connector<Client = C> + ?Sized,
    {
        let (lost_tx, connection_lost) = oneshot::channel();
        let client = connector
            .create(&config.client_options(), lost_tx)
            .map_err(SessionError::Client)?;

        Ok(Self {
            client: Arc::new(client),
            connection_lost,
            config,
            printer,
            cancel,
            state: SessionState::Connecting,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion
    ///
    /// Returns `Ok(())` when cancelled, otherwise the error that ended the
    /// session. The connection has been released when this returns.
    pub async fn run(mut self, lines: &mut LineStream) -> SessionResult<()> {
        let result = self.serve(lines).await;

        self.enter(SessionState::Terminating);
        if let Err(e) = &result {
            debug!(error = %e, "Session ended with error");
        }
        self.client.disconnect(DISCONNECT_GRACE).await;
        result
    }

    fn enter(&mut self, state: SessionState) {
        trace!(from = %self.state, to = %state, "Session state change");
        self.state = state;
    }

    async fn serve(&mut self, lines: &mut LineStream) -> SessionResult<()> {
        debug!(broker = %self.config.host, client_id = %self.config.client_id, "Connecting");
        match wait(&self.cancel, self.client.connect(), DEFAULT_DEADLINE).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => return Err(SessionError::Connect(e)),
        }

        self.enter(SessionState::Subscribing);
        debug!(topic = %self.config.from, "Subscribing");
        let handler: Arc<dyn MessageHandler> = Arc::new(EchoHandler::new(
            Arc::downgrade(&self.client),
            Arc::clone(&self.printer),
            self.config.echo.then(|| self.config.to.clone()),
            self.config.qos,
            self.cancel.clone(),
        ));
        let subscribed = self
            .client
            .subscribe(&self.config.from, self.config.qos, handler);
        match wait(&self.cancel, subscribed, DEFAULT_DEADLINE).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Ok(()),
            Err(e) => return Err(SessionError::Subscribe(e)),
        }

        self.enter(SessionState::Active);
        debug!(from = %self.config.from, to = %self.config.to, "Session active");
        self.control_loop(lines).await
    }

    async fn control_loop(&mut self, lines: &mut LineStream) -> SessionResult<()> {
        let client = Arc::clone(&self.client);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                lost = &mut self.connection_lost => {
                    let error = lost.unwrap_or_else(|_| {
                        BrokerError::ConnectionLost("connection closed".to_string())
                    });
                    return Err(SessionError::ConnectionLost(error));
                }
                line = lines.next() => {
                    publish_line(
                        client.as_ref(),
                        &self.config.to,
                        self.config.qos,
                        line,
                        self.config.hex,
                        &cancel,
                    )
                    .await?;
                }
            }
        }
    }
}

/// Publish one input line to `topic`
///
/// In hex mode the line is decoded first; a malformed line is returned as an
/// error and nothing is published. Publish failures are logged only.
pub async fn publish_line<C>(
    client: &C,
    topic: &str,
    qos: QoS,
    line: Bytes,
    hex_mode: bool,
    cancel: &CancellationToken,
) -> SessionResult<()>
where
    C: BrokerClient + ?Sized,
{
    let payload = if hex_mode {
        Bytes::from(hex::decode(&line)?)
    } else {
        line
    };

    let len = payload.len();
    match wait(cancel, client.publish(topic, qos, payload), DEFAULT_DEADLINE).await {
        Ok(()) => trace!(topic, len, "Published input line"),
        Err(e) if e.is_cancelled() => debug!(topic, "Publish cancelled"),
        Err(e) => error!(topic, error = %e, "Failed to publish input line"),
    }
    Ok(())
}

/// Subscription callback: print each inbound message, optionally echo it
pub struct EchoHandler<C: BrokerClient> {
    client: Weak<C>,
    printer: Arc<Printer>,
    echo_to: Option<String>,
    qos: QoS,
    cancel: CancellationToken,
}

impl<C: BrokerClient> EchoHandler<C> {
    /// `echo_to` is the topic to re-publish to, or `None` to only print
    pub fn new(
        client: Weak<C>,
        printer: Arc<Printer>,
        echo_to: Option<String>,
        qos: QoS,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            printer,
            echo_to,
            qos,
            cancel,
        }
    }
}

#[async_trait]
impl<C: BrokerClient> MessageHandler for EchoHandler<C> {
    async fn handle(&self, topic: &str, payload: Bytes) {
        if let Err(e) = self.printer.print(&payload) {
            error!(topic, error = %e, "Failed to write message");
        }

        let Some(echo_to) = self.echo_to.as_deref() else {
            return;
        };
        // Session already torn down
        let Some(client) = self.client.upgrade() else {
            return;
        };

        match wait(&self.cancel, client.publish(echo_to, self.qos, payload), DEFAULT_DEADLINE).await
        {
            Ok(()) => trace!(topic = echo_to, "Echoed message"),
            Err(e) if e.is_cancelled() => debug!(topic = echo_to, "Echo cancelled"),
            Err(e) => error!(topic = echo_to, error = %e, "Failed to echo message"),
        }
    }
}
