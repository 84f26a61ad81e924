//! Impure I/O operations for the MQTT client
//!
//! This module drives one rumqttc connection per [`MqttClient`] and turns
//! protocol acknowledgements into resolved [`Token`]s.
//!
//! Two tasks are spawned on [`connect`](BrokerClient::connect):
//!
//! - the event loop task polls the rumqttc [`EventLoop`], resolves pending
//!   requests and forwards inbound messages;
//! - the delivery task invokes subscription handlers in arrival order, so a
//!   slow handler (an echo publish waiting for its own acknowledgement) never
//!   stalls the network loop.

use super::connection::configure_mqtt_options;
use super::events::{route_event, EventRoute};
use super::topic::topic_matches;
use crate::transport::{
    BrokerClient, BrokerError, ClientOptions, Completer, ConnectionLostHandler, Connector,
    MessageHandler, QoS, Token,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, EventLoop, QoS as MqttQoS};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

/// Capacity of the rumqttc request channel
const REQUEST_CAPACITY: usize = 64;

/// Creates rumqttc-backed clients
#[derive(Debug, Clone)]
pub struct MqttConnector {
    request_capacity: usize,
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self {
            request_capacity: REQUEST_CAPACITY,
        }
    }
}

impl Connector for MqttConnector {
    type Client = MqttClient;

    fn create(
        &self,
        options: &ClientOptions,
        on_connection_lost: ConnectionLostHandler,
    ) -> Result<MqttClient, BrokerError> {
        let mqtt_options = configure_mqtt_options(options)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.request_capacity);
        Ok(MqttClient::new(client, event_loop, on_connection_lost))
    }
}

fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Requests waiting for the event loop to report on them
///
/// rumqttc assigns packet ids when it dequeues a request, so requests are
/// queued in submission order and paired with ids as their outgoing events
/// appear.
#[derive(Default)]
struct PendingRequests {
    connect: Option<Completer>,
    subscribes_queued: VecDeque<(String, Completer)>,
    subscribes_sent: HashMap<u16, (String, Completer)>,
    publishes_queued: VecDeque<(QoS, Completer)>,
    publishes_sent: HashMap<u16, Completer>,
}

impl PendingRequests {
    fn fail_all(&mut self, error: &BrokerError) {
        if let Some(connect) = self.connect.take() {
            connect.complete(Err(error.clone()));
        }
        let subscribes = self
            .subscribes_queued
            .drain(..)
            .chain(self.subscribes_sent.drain().map(|(_, pending)| pending));
        for (_, completer) in subscribes {
            completer.complete(Err(error.clone()));
        }
        let publishes = self
            .publishes_queued
            .drain(..)
            .map(|(_, completer)| completer)
            .chain(self.publishes_sent.drain().map(|(_, completer)| completer));
        for completer in publishes {
            completer.complete(Err(error.clone()));
        }
    }
}

type SharedPending = Arc<Mutex<PendingRequests>>;

fn lock(pending: &SharedPending) -> MutexGuard<'_, PendingRequests> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Delivery {
    Register {
        filter: String,
        handler: Arc<dyn MessageHandler>,
    },
    Message {
        topic: String,
        payload: Bytes,
    },
}

/// Parts consumed when the connection is started
struct Startup {
    event_loop: EventLoop,
    on_connection_lost: ConnectionLostHandler,
    deliveries_rx: mpsc::UnboundedReceiver<Delivery>,
}

#[derive(Default)]
struct Tasks {
    event_loop: Option<JoinHandle<()>>,
    delivery: Option<JoinHandle<()>>,
}

/// One rumqttc connection
pub struct MqttClient {
    client: AsyncClient,
    pending: SharedPending,
    deliveries: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    startup: Mutex<Option<Startup>>,
    tasks: Mutex<Tasks>,
    closing: CancellationToken,
}

impl MqttClient {
    fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        on_connection_lost: ConnectionLostHandler,
    ) -> Self {
        let (deliveries_tx, deliveries_rx) = mpsc::unbounded_channel();
        Self {
            client,
            pending: SharedPending::default(),
            deliveries: Mutex::new(Some(deliveries_tx)),
            startup: Mutex::new(Some(Startup {
                event_loop,
                on_connection_lost,
                deliveries_rx,
            })),
            tasks: Mutex::new(Tasks::default()),
            closing: CancellationToken::new(),
        }
    }

    fn closed_token(&self) -> Option<Token> {
        self.closing.is_cancelled().then(|| {
            Token::ready(Err(BrokerError::RequestFailed(
                "client disconnected".to_string(),
            )))
        })
    }

    fn deliveries(&self) -> Option<mpsc::UnboundedSender<Delivery>> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl BrokerClient for MqttClient {
    fn connect(&self) -> Token {
        if let Some(token) = self.closed_token() {
            return token;
        }
        let startup = self
            .startup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(startup) = startup else {
            return Token::ready(Err(BrokerError::ConnectionFailed(
                "connect already started".to_string(),
            )));
        };
        let Some(deliveries) = self.deliveries() else {
            return Token::ready(Err(BrokerError::ConnectionFailed(
                "client disconnected".to_string(),
            )));
        };

        let (completer, token) = Token::pending();
        lock(&self.pending).connect = Some(completer);

        let event_loop = tokio::spawn(
            run_event_loop(
                startup.event_loop,
                self.pending.clone(),
                deliveries,
                startup.on_connection_lost,
                self.closing.clone(),
            )
            .instrument(crate::mqtt_span!(task = "event_loop")),
        );
        let delivery = tokio::spawn(
            run_delivery(startup.deliveries_rx).instrument(crate::mqtt_span!(task = "delivery")),
        );

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.event_loop = Some(event_loop);
        tasks.delivery = Some(delivery);
        token
    }

    fn subscribe(&self, filter: &str, qos: QoS, handler: Arc<dyn MessageHandler>) -> Token {
        if let Some(token) = self.closed_token() {
            return token;
        }
        let (completer, token) = Token::pending();

        // Registered ahead of the request so no matching message can beat it
        let registered = self.deliveries().is_some_and(|deliveries| {
            deliveries
                .send(Delivery::Register {
                    filter: filter.to_string(),
                    handler,
                })
                .is_ok()
        });
        if !registered {
            completer.complete(Err(BrokerError::RequestFailed(
                "client disconnected".to_string(),
            )));
            return token;
        }

        let mut pending = lock(&self.pending);
        match self.client.try_subscribe(filter, to_mqtt_qos(qos)) {
            Ok(()) => pending
                .subscribes_queued
                .push_back((filter.to_string(), completer)),
            Err(e) => completer.complete(Err(BrokerError::RequestFailed(e.to_string()))),
        }
        token
    }

    fn publish(&self, topic: &str, qos: QoS, payload: Bytes) -> Token {
        if let Some(token) = self.closed_token() {
            return token;
        }
        let (completer, token) = Token::pending();

        let mut pending = lock(&self.pending);
        match self
            .client
            .try_publish(topic, to_mqtt_qos(qos), false, payload.to_vec())
        {
            Ok(()) => pending.publishes_queued.push_back((qos, completer)),
            Err(e) => completer.complete(Err(BrokerError::RequestFailed(e.to_string()))),
        }
        token
    }

    async fn disconnect(&self, grace: Duration) {
        self.closing.cancel();
        if let Err(e) = self.client.try_disconnect() {
            debug!("disconnect request not queued: {}", e);
        }
        // Closing our sender lets the delivery task drain and stop
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let (event_loop, delivery) = {
            let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
            (tasks.event_loop.take(), tasks.delivery.take())
        };

        let deadline = Instant::now() + grace;
        for (name, handle) in [("event loop", event_loop), ("delivery", delivery)] {
            let Some(mut handle) = handle else {
                continue;
            };
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!("MQTT {} task stopped", name),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT {} task failed: {}", name, e),
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("MQTT {} task did not stop within {:?}, aborting", name, grace);
                    handle.abort();
                }
            }
        }

        let released = BrokerError::ConnectionLost("client disconnected".to_string());
        lock(&self.pending).fail_all(&released);
        debug!("MQTT client disconnected");
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.closing.cancel();
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = tasks.event_loop.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.delivery.take() {
            handle.abort();
        }
    }
}

/// Apply one routed event to the pending requests.
/// Returns false once the loop should stop.
fn apply_route(
    route: EventRoute,
    pending: &SharedPending,
    deliveries: &mpsc::UnboundedSender<Delivery>,
    connected: &mut bool,
) -> bool {
    match route {
        EventRoute::ConnectionAcknowledged => {
            *connected = true;
            if let Some(connect) = lock(pending).connect.take() {
                connect.complete(Ok(()));
            }
        }
        EventRoute::MessageReceived { topic, payload } => {
            debug!("Received MQTT message on topic: {}", topic);
            let _ = deliveries.send(Delivery::Message { topic, payload });
        }
        EventRoute::SubscribeSent { packet_id } => {
            let mut pending = lock(pending);
            if let Some(subscribe) = pending.subscribes_queued.pop_front() {
                pending.subscribes_sent.insert(packet_id, subscribe);
            }
        }
        EventRoute::SubscribeAcknowledged {
            packet_id,
            accepted,
        } => {
            if let Some((topic, completer)) = lock(pending).subscribes_sent.remove(&packet_id) {
                if accepted {
                    completer.complete(Ok(()));
                } else {
                    completer.complete(Err(BrokerError::SubscriptionRejected { topic }));
                }
            }
        }
        EventRoute::PublishSent { packet_id } => {
            let mut pending = lock(pending);
            if let Some((qos, completer)) = pending.publishes_queued.pop_front() {
                if qos == QoS::AtMostOnce {
                    completer.complete(Ok(()));
                } else {
                    pending.publishes_sent.insert(packet_id, completer);
                }
            }
        }
        EventRoute::PublishAcknowledged { packet_id } => {
            if let Some(completer) = lock(pending).publishes_sent.remove(&packet_id) {
                completer.complete(Ok(()));
            }
        }
        EventRoute::DisconnectSent => return false,
        EventRoute::DisconnectReceived | EventRoute::Ignored => {}
    }
    true
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    pending: SharedPending,
    deliveries: mpsc::UnboundedSender<Delivery>,
    on_connection_lost: ConnectionLostHandler,
    closing: CancellationToken,
) {
    let mut connected = false;

    loop {
        match event_loop.poll().await {
            Ok(event) => {
                if !apply_route(route_event(&event), &pending, &deliveries, &mut connected) {
                    break;
                }
            }
            Err(e) => {
                if closing.is_cancelled() {
                    break;
                }
                let error = if connected {
                    BrokerError::ConnectionLost(e.to_string())
                } else {
                    BrokerError::ConnectionFailed(e.to_string())
                };
                lock(&pending).fail_all(&error);
                if connected {
                    let _ = on_connection_lost.send(error);
                }
                break;
            }
        }
    }
    debug!("MQTT event loop stopped");
}

async fn run_delivery(mut deliveries: mpsc::UnboundedReceiver<Delivery>) {
    let mut subscriptions: Vec<(String, Arc<dyn MessageHandler>)> = Vec::new();

    while let Some(delivery) = deliveries.recv().await {
        match delivery {
            Delivery::Register { filter, handler } => subscriptions.push((filter, handler)),
            Delivery::Message { topic, payload } => {
                for (filter, handler) in &subscriptions {
                    if topic_matches(filter, &topic) {
                        handler.handle(&topic, payload.clone()).await;
                    }
                }
            }
        }
    }
}
