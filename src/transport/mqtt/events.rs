//! Pure routing of rumqttc events
//!
//! The event loop task maps every polled [`Event`] to an [`EventRoute`] and
//! acts on the route; keeping the mapping pure makes it testable without a
//! broker.

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, SubscribeReasonCode};

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// CONNACK received, session is live
    ConnectionAcknowledged,
    /// PUBLISH received from the broker
    MessageReceived { topic: String, payload: Bytes },
    /// A SUBSCRIBE left the client with this packet id
    SubscribeSent { packet_id: u16 },
    /// SUBACK received
    SubscribeAcknowledged { packet_id: u16, accepted: bool },
    /// A PUBLISH left the client with this packet id (0 for QoS 0)
    PublishSent { packet_id: u16 },
    /// PUBACK (QoS 1) or PUBCOMP (QoS 2) received
    PublishAcknowledged { packet_id: u16 },
    /// Our DISCONNECT was written
    DisconnectSent,
    /// Broker closed the session
    DisconnectReceived,
    /// Keep-alive and other traffic the bridge does not act on
    Ignored,
}

/// Route MQTT event to appropriate handler (pure routing decision)
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            },
            Packet::SubAck(suback) => EventRoute::SubscribeAcknowledged {
                packet_id: suback.pkid,
                accepted: suback
                    .return_codes
                    .iter()
                    .all(|code| matches!(code, SubscribeReasonCode::Success(_))),
            },
            Packet::PubAck(puback) => EventRoute::PublishAcknowledged {
                packet_id: puback.pkid,
            },
            Packet::PubComp(pubcomp) => EventRoute::PublishAcknowledged {
                packet_id: pubcomp.pkid,
            },
            Packet::Disconnect => EventRoute::DisconnectReceived,
            _ => EventRoute::Ignored,
        },
        Event::Outgoing(outgoing) => match outgoing {
            Outgoing::Publish(packet_id) => EventRoute::PublishSent {
                packet_id: *packet_id,
            },
            Outgoing::Subscribe(packet_id) => EventRoute::SubscribeSent {
                packet_id: *packet_id,
            },
            Outgoing::Disconnect => EventRoute::DisconnectSent,
            _ => EventRoute::Ignored,
        },
    }
}
