//! Wire protocol.
//!
//! The bus speaks NetworkTables 4 over a WebSocket:
//!
//! - control messages travel as JSON text frames holding an array of
//!   `{"method": ..., "params": {...}}` objects;
//! - values travel as binary frames holding one or more concatenated
//!   MessagePack arrays `[topic_or_pubuid, timestamp_us, type_id, value]`.
//!
//! The session never sees frames. It exchanges [`ClientMessage`] and
//! [`ServerMessage`] values with a transport, and the WebSocket transport
//! uses [`encode`], [`decode_text`] and [`decode_binary`] at the edge.
//! Anything the decoder cannot make sense of is logged and dropped.

use std::io::Cursor;

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::topic::{TopicKind, TopicValue};

/// Default NetworkTables 4 port.
pub const DEFAULT_PORT: u16 = 5810;

/// WebSocket subprotocol announced during the handshake.
pub const SUBPROTOCOL: &str = "networktables.first.wpi.edu";

/// Topic id the server uses for round-trip time replies.
const RTT_TOPIC_ID: i64 = -1;

/// Options attached to a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    /// Receive announcements only, never values.
    #[serde(rename = "topicsonly", default, skip_serializing_if = "is_false")]
    pub topics_only: bool,
    /// Treat each requested name as a prefix.
    #[serde(default, skip_serializing_if = "is_false")]
    pub prefix: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Messages the dashboard sends to the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Announce that this client will publish `name`.
    Publish {
        name: String,
        pubuid: i64,
        type_name: String,
    },
    /// Withdraw a publisher.
    Unpublish { pubuid: i64 },
    /// Subscribe to topics; the endpoint replies with announcements and
    /// the retained value of each matching topic.
    Subscribe {
        topics: Vec<String>,
        subuid: i64,
        options: SubscribeOptions,
    },
    Unsubscribe { subuid: i64 },
    /// Set the value of a topic this client publishes.
    SetValue { pubuid: i64, value: TopicValue },
}

/// Messages the endpoint sends to the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// A topic exists. `pubuid` is set when the announcement answers one of
    /// our own publish requests.
    Announce {
        name: String,
        id: i64,
        type_name: String,
        pubuid: Option<i64>,
    },
    /// A topic is gone.
    Unannounce { name: String, id: i64 },
    /// A topic's current value.
    Value {
        topic_id: i64,
        timestamp: i64,
        value: TopicValue,
    },
}

/// An encoded WebSocket frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Serialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
enum ClientFrame<'a> {
    Publish {
        name: &'a str,
        pubuid: i64,
        #[serde(rename = "type")]
        type_name: &'a str,
        properties: Map<String, Value>,
    },
    Unpublish {
        pubuid: i64,
    },
    Subscribe {
        topics: &'a [String],
        subuid: i64,
        options: SubscribeOptions,
    },
    Unsubscribe {
        subuid: i64,
    },
}

#[derive(Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "lowercase")]
enum ServerFrame {
    Announce {
        name: String,
        id: i64,
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        pubuid: Option<i64>,
    },
    Unannounce {
        name: String,
        id: i64,
    },
    Properties {
        #[allow(dead_code)]
        name: String,
    },
}

/// Value slot of a binary frame; unsupported payloads (raw bytes, ...) are
/// skipped without losing the rest of the frame.
#[derive(Deserialize)]
#[serde(untagged)]
enum FrameValue {
    Known(TopicValue),
    Other(IgnoredAny),
}

/// Encode a client message. `timestamp` is in microseconds.
pub fn encode(message: &ClientMessage, timestamp: i64) -> Result<Frame> {
    let control = match message {
        ClientMessage::SetValue { pubuid, value } => {
            let frame = (*pubuid, timestamp, value.kind().wire_id(), value);
            let bytes = rmp_serde::to_vec(&frame).map_err(|e| Error::Protocol(e.to_string()))?;
            return Ok(Frame::Binary(bytes));
        }
        ClientMessage::Publish {
            name,
            pubuid,
            type_name,
        } => ClientFrame::Publish {
            name,
            pubuid: *pubuid,
            type_name,
            properties: Map::new(),
        },
        ClientMessage::Unpublish { pubuid } => ClientFrame::Unpublish { pubuid: *pubuid },
        ClientMessage::Subscribe {
            topics,
            subuid,
            options,
        } => ClientFrame::Subscribe {
            topics,
            subuid: *subuid,
            options: *options,
        },
        ClientMessage::Unsubscribe { subuid } => ClientFrame::Unsubscribe { subuid: *subuid },
    };
    Ok(Frame::Text(serde_json::to_string(&[control])?))
}

/// Decode a JSON text frame, dropping malformed entries.
pub fn decode_text(text: &str) -> Vec<ServerMessage> {
    let entries = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            tracing::warn!("dropping control frame that is not an array");
            return Vec::new();
        }
        Err(err) => {
            tracing::warn!(%err, "dropping unparsable control frame");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<ServerFrame>(entry) {
            Ok(ServerFrame::Announce {
                name,
                id,
                type_name,
                pubuid,
            }) => Some(ServerMessage::Announce {
                name,
                id,
                type_name,
                pubuid,
            }),
            Ok(ServerFrame::Unannounce { name, id }) => Some(ServerMessage::Unannounce { name, id }),
            Ok(ServerFrame::Properties { .. }) => None,
            Err(err) => {
                tracing::warn!(%err, "dropping malformed control message");
                None
            }
        })
        .collect()
}

/// Decode a binary frame holding one or more value messages.
///
/// Values whose wire type is unsupported or disagrees with the payload are
/// dropped. A truncated frame keeps everything decoded before the damage.
pub fn decode_binary(bytes: &[u8]) -> Vec<ServerMessage> {
    let mut cursor = Cursor::new(bytes);
    let mut messages = Vec::new();

    while (cursor.position() as usize) < bytes.len() {
        let (topic_id, timestamp, type_id, value) =
            match rmp_serde::from_read::<_, (i64, i64, u8, FrameValue)>(&mut cursor) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::warn!(%err, "dropping malformed value frame");
                    break;
                }
            };

        if topic_id == RTT_TOPIC_ID {
            continue;
        }
        let FrameValue::Known(value) = value else {
            tracing::trace!(topic_id, type_id, "skipping value of unsupported type");
            continue;
        };
        let Some(kind) = TopicKind::from_wire_id(type_id) else {
            tracing::trace!(topic_id, type_id, "skipping value of unsupported type");
            continue;
        };
        match value.coerce(kind) {
            Some(value) => messages.push(ServerMessage::Value {
                topic_id,
                timestamp,
                value,
            }),
            None => tracing::warn!(topic_id, %kind, "dropping value whose payload does not match its type"),
        }
    }

    messages
}
