//! Mock implementations for testing
//!
//! [`MockBroker`] is an in-memory broker whose clients resolve every request
//! immediately unless scripted otherwise. It records connect attempts,
//! concurrent connections, publishes and disconnects so tests can assert on
//! session behaviour without a network.

use crate::transport::mqtt::{parse_broker_url, topic_matches};
use crate::transport::{
    BrokerClient, BrokerError, ClientOptions, Completer, ConnectionLostHandler, Connector,
    MessageHandler, QoS, Token,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub type PublishedMessage = (String, Bytes);

/// How the mock broker answers one connect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    Refuse(String),
    /// Never answer
    Hang,
}

struct Subscription {
    client_id: u64,
    filter: String,
    handler: Arc<dyn MessageHandler>,
}

#[derive(Default)]
struct BrokerState {
    connect_script: VecDeque<ConnectBehavior>,
    clients_created: usize,
    last_options: Option<ClientOptions>,
    connect_attempts: usize,
    active_connections: usize,
    max_concurrent_connections: usize,
    disconnects: usize,
    published: Vec<PublishedMessage>,
    fail_publishes: bool,
    reject_subscriptions: bool,
    subscriptions: Vec<Subscription>,
    connection_lost: Option<(u64, ConnectionLostHandler)>,
    hung: Vec<Completer>,
    next_client_id: u64,
}

/// In-memory broker shared by every mock client it hands out
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        // A panicking test thread must not hide the original failure
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Connector creating clients of this broker
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            broker: self.clone(),
        }
    }

    /// Standalone client whose connection-lost signal goes nowhere
    pub fn client(&self) -> MockClient {
        let (lost_tx, _lost_rx) = tokio::sync::oneshot::channel();
        self.new_client(lost_tx)
    }

    fn new_client(&self, on_connection_lost: ConnectionLostHandler) -> MockClient {
        let mut state = self.state();
        state.next_client_id += 1;
        state.clients_created += 1;
        MockClient {
            broker: self.clone(),
            id: state.next_client_id,
            on_connection_lost: Mutex::new(Some(on_connection_lost)),
            status: Mutex::new(ClientStatus::Idle),
        }
    }

    /// Answers for the next connect requests; later requests are accepted
    pub fn script_connects(&self, behaviors: impl IntoIterator<Item = ConnectBehavior>) {
        self.state().connect_script.extend(behaviors);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.state().reject_subscriptions = reject;
    }

    pub fn clients_created(&self) -> usize {
        self.state().clients_created
    }

    pub fn last_options(&self) -> Option<ClientOptions> {
        self.state().last_options.clone()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state().connect_attempts
    }

    pub fn active_connections(&self) -> usize {
        self.state().active_connections
    }

    pub fn max_concurrent_connections(&self) -> usize {
        self.state().max_concurrent_connections
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    /// Deliver a message to every live subscription matching `topic`
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .state()
            .subscriptions
            .iter()
            .filter(|sub| topic_matches(&sub.filter, topic))
            .map(|sub| Arc::clone(&sub.handler))
            .collect();

        for handler in handlers {
            handler.handle(topic, payload.clone()).await;
        }
    }

    /// Fire the connection-lost signal of the connected client.
    /// Returns false when no client was connected.
    pub fn drop_connection(&self, reason: &str) -> bool {
        let lost = self.state().connection_lost.take();
        match lost {
            Some((_, handler)) => {
                let _ = handler.send(BrokerError::ConnectionLost(reason.to_string()));
                true
            }
            None => false,
        }
    }

    /// Poll `condition` until it holds or `timeout` passes
    pub async fn wait_until<F>(&self, timeout: Duration, condition: F) -> bool
    where
        F: Fn(&MockBroker) -> bool,
    {
        let result = tokio::time::timeout(timeout, async {
            while !condition(self) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        result.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientStatus {
    Idle,
    Connected,
    Closed,
}

/// Client handed out by [`MockBroker`]
pub struct MockClient {
    broker: MockBroker,
    id: u64,
    on_connection_lost: Mutex<Option<ConnectionLostHandler>>,
    status: Mutex<ClientStatus>,
}

impl MockClient {
    fn status(&self) -> MutexGuard<'_, ClientStatus> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed() -> Token {
        Token::ready(Err(BrokerError::RequestFailed(
            "client disconnected".to_string(),
        )))
    }
}

#[async_trait]
impl BrokerClient for MockClient {
    fn connect(&self) -> Token {
        let mut status = self.status();
        if *status == ClientStatus::Closed {
            return Self::closed();
        }

        let mut state = self.broker.state();
        state.connect_attempts += 1;
        match state
            .connect_script
            .pop_front()
            .unwrap_or(ConnectBehavior::Accept)
        {
            ConnectBehavior::Accept => {
                *status = ClientStatus::Connected;
                state.active_connections += 1;
                state.max_concurrent_connections = state
                    .max_concurrent_connections
                    .max(state.active_connections);
                let handler = self
                    .on_connection_lost
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take();
                state.connection_lost = handler.map(|handler| (self.id, handler));
                Token::ready(Ok(()))
            }
            ConnectBehavior::Refuse(reason) => {
                Token::ready(Err(BrokerError::ConnectionFailed(reason)))
            }
            ConnectBehavior::Hang => {
                let (completer, token) = Token::pending();
                state.hung.push(completer);
                token
            }
        }
    }

    fn subscribe(&self, filter: &str, _qos: QoS, handler: Arc<dyn MessageHandler>) -> Token {
        if *self.status() != ClientStatus::Connected {
            return Self::closed();
        }

        let mut state = self.broker.state();
        if state.reject_subscriptions {
            return Token::ready(Err(BrokerError::SubscriptionRejected {
                topic: filter.to_string(),
            }));
        }
        state.subscriptions.push(Subscription {
            client_id: self.id,
            filter: filter.to_string(),
            handler,
        });
        Token::ready(Ok(()))
    }

    fn publish(&self, topic: &str, _qos: QoS, payload: Bytes) -> Token {
        if *self.status() == ClientStatus::Closed {
            return Self::closed();
        }

        let mut state = self.broker.state();
        if state.fail_publishes {
            return Token::ready(Err(BrokerError::RequestFailed(
                "publish refused".to_string(),
            )));
        }
        state.published.push((topic.to_string(), payload));
        Token::ready(Ok(()))
    }

    async fn disconnect(&self, _grace: Duration) {
        let mut status = self.status();
        let was_connected = *status == ClientStatus::Connected;
        *status = ClientStatus::Closed;

        let mut state = self.broker.state();
        state.disconnects += 1;
        if was_connected {
            state.active_connections -= 1;
        }
        let id = self.id;
        state.subscriptions.retain(|sub| sub.client_id != id);
        if matches!(state.connection_lost, Some((owner, _)) if owner == id) {
            state.connection_lost = None;
        }
    }
}

/// Connector creating [`MockClient`]s for one [`MockBroker`]
#[derive(Clone)]
pub struct MockConnector {
    broker: MockBroker,
}

impl MockConnector {
    pub fn broker(&self) -> &MockBroker {
        &self.broker
    }
}

impl Connector for MockConnector {
    type Client = MockClient;

    fn create(
        &self,
        options: &ClientOptions,
        on_connection_lost: ConnectionLostHandler,
    ) -> Result<MockClient, BrokerError> {
        parse_broker_url(&options.broker_url)?;
        self.broker.state().last_options = Some(options.clone());
        Ok(self.broker.new_client(on_connection_lost))
    }
}

/// Cloneable in-memory writer for capturing output
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Captured output split into lines, without terminators
    pub fn lines(&self) -> Vec<Vec<u8>> {
        let contents = self.contents();
        let mut lines: Vec<Vec<u8>> = contents
            .split(|b| *b == b'\n')
            .map(<[u8]>::to_vec)
            .collect();
        // Whatever follows the last terminator
        lines.pop();
        lines
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{wait, DEFAULT_DEADLINE};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_scripted_connects_then_accept() {
        let broker = MockBroker::new();
        broker.script_connects([ConnectBehavior::Refuse("busy".to_string())]);

        let first = broker.client();
        let mut token = first.connect();
        assert!(token.is_complete());
        assert_eq!(
            token.into_outcome(),
            Some(Err(BrokerError::ConnectionFailed("busy".to_string())))
        );

        let second = broker.client();
        assert_eq!(second.connect().into_outcome(), Some(Ok(())));
        assert_eq!(broker.connect_attempts(), 2);
        assert_eq!(broker.active_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hang_never_resolves() {
        let broker = MockBroker::new();
        broker.script_connects([ConnectBehavior::Hang]);
        let client = broker.client();

        let result = wait(&CancellationToken::new(), client.connect(), DEFAULT_DEADLINE).await;
        assert!(matches!(
            result,
            Err(crate::transport::WaitError::DeadlineExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_releases_connection() {
        let broker = MockBroker::new();
        let client = broker.client();
        let _ = client.connect();
        assert_eq!(broker.active_connections(), 1);

        client.disconnect(Duration::from_secs(1)).await;
        assert_eq!(broker.active_connections(), 0);
        assert_eq!(broker.max_concurrent_connections(), 1);
        assert_eq!(
            client.publish("foo", QoS::AtMostOnce, Bytes::new()).into_outcome(),
            Some(Err(BrokerError::RequestFailed(
                "client disconnected".to_string()
            )))
        );
    }

    #[test]
    fn test_connector_validates_url() {
        let broker = MockBroker::new();
        let (lost_tx, _lost_rx) = tokio::sync::oneshot::channel();
        let options = ClientOptions {
            broker_url: "http://localhost".to_string(),
            client_id: "test".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        };
        assert!(matches!(
            broker.connector().create(&options, lost_tx),
            Err(BrokerError::InvalidBrokerUrl(_))
        ));
        assert_eq!(broker.clients_created(), 0);
    }

    #[test]
    fn test_shared_buffer_lines() {
        let mut buffer = SharedBuffer::new();
        buffer.write_all(b"one\n\ntwo\n").unwrap();
        assert_eq!(
            buffer.lines(),
            vec![b"one".to_vec(), Vec::new(), b"two".to_vec()]
        );
    }
}
