//! In-process bus endpoint.
//!
//! [`LoopbackEndpoint`] is a small NetworkTables-like server living in the
//! same process. It keeps retained values, announces topics to subscribers
//! and forwards values between clients, which is enough to run a session end
//! to end without a network: offline demos, host-application tests and this
//! crate's own integration tests all use it.
//!
//! The endpoint also plays the other side of the bus: [`publish`] and
//! [`remove_topic`] act like a robot program publishing and withdrawing
//! topics, and [`set_available`] / [`disconnect_all`] simulate outages.
//!
//! [`publish`]: LoopbackEndpoint::publish
//! [`remove_topic`]: LoopbackEndpoint::remove_topic
//! [`set_available`]: LoopbackEndpoint::set_available
//! [`disconnect_all`]: LoopbackEndpoint::disconnect_all

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::{self, BoxFuture};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::protocol::{ClientMessage, ServerMessage, SubscribeOptions};
use super::transport::{Connection, Connector, MessageSink};
use crate::config::Endpoint;
use crate::error::{Error, Result};
use crate::topic::TopicValue;

struct LoopbackTopic {
    id: i64,
    type_name: String,
    value: Option<TopicValue>,
}

struct LoopbackSubscription {
    topics: Vec<String>,
    options: SubscribeOptions,
}

impl LoopbackSubscription {
    fn matches(&self, name: &str) -> bool {
        self.topics.iter().any(|topic| {
            if self.options.prefix {
                name.starts_with(topic.as_str())
            } else {
                name == topic
            }
        })
    }
}

struct LoopbackClient {
    id: u64,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    subscriptions: HashMap<i64, LoopbackSubscription>,
    publishers: HashMap<i64, String>,
    announced: HashSet<String>,
}

impl LoopbackClient {
    fn wants_announcement(&self, name: &str) -> bool {
        self.subscriptions.values().any(|sub| sub.matches(name))
    }

    fn wants_values(&self, name: &str) -> bool {
        self.subscriptions
            .values()
            .any(|sub| !sub.options.topics_only && sub.matches(name))
    }

    fn announce(&mut self, name: &str, topic: &LoopbackTopic, pubuid: Option<i64>) {
        if self.announced.insert(name.to_string()) || pubuid.is_some() {
            let _ = self.outbound.send(ServerMessage::Announce {
                name: name.to_string(),
                id: topic.id,
                type_name: topic.type_name.clone(),
                pubuid,
            });
        }
    }

    fn send_value(&mut self, name: &str, topic: &LoopbackTopic, timestamp: i64) {
        let Some(value) = &topic.value else {
            return;
        };
        self.announce(name, topic, None);
        let _ = self.outbound.send(ServerMessage::Value {
            topic_id: topic.id,
            timestamp,
            value: value.clone(),
        });
    }
}

struct LoopbackState {
    available: bool,
    started: Instant,
    next_topic_id: i64,
    next_client: u64,
    topics: IndexMap<String, LoopbackTopic>,
    clients: Vec<LoopbackClient>,
    received: Vec<ClientMessage>,
    connects: usize,
}

impl LoopbackState {
    fn timestamp(&self) -> i64 {
        i64::try_from(self.started.elapsed().as_micros()).unwrap_or(i64::MAX)
    }

    fn topic_entry(&mut self, name: &str, type_name: &str) -> &mut LoopbackTopic {
        let next_id = &mut self.next_topic_id;
        self.topics.entry(name.to_string()).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            LoopbackTopic {
                id,
                type_name: type_name.to_string(),
                value: None,
            }
        })
    }

    /// Store a value and fan it out to every value subscriber except
    /// `origin`.
    fn set_value(&mut self, name: &str, value: TopicValue, origin: Option<u64>) {
        let timestamp = self.timestamp();
        let topic = self.topic_entry(name, value.kind().type_name());
        topic.value = Some(value);

        let Some(topic) = self.topics.get(name) else {
            return;
        };
        for client in self.clients.iter_mut() {
            if Some(client.id) == origin {
                continue;
            }
            if client.wants_values(name) {
                client.send_value(name, topic, timestamp);
            } else if client.wants_announcement(name) {
                client.announce(name, topic, None);
            }
        }
    }

    fn handle(&mut self, client_id: u64, message: ClientMessage) -> Result<()> {
        let timestamp = self.timestamp();
        self.received.push(message.clone());

        match message {
            ClientMessage::Publish {
                name,
                pubuid,
                type_name,
            } => {
                self.topic_entry(&name, &type_name);
                let Some(topic) = self.topics.get(&name) else {
                    return Ok(());
                };
                for client in self.clients.iter_mut() {
                    if client.id == client_id {
                        client.publishers.insert(pubuid, name.clone());
                        client.announce(&name, topic, Some(pubuid));
                    } else if client.wants_announcement(&name) {
                        client.announce(&name, topic, None);
                    }
                }
            }
            ClientMessage::Unpublish { pubuid } => {
                let client = self.client_mut(client_id)?;
                client.publishers.remove(&pubuid);
            }
            ClientMessage::Subscribe {
                topics,
                subuid,
                options,
            } => {
                let subscription = LoopbackSubscription { topics, options };
                let Some(client) = self.clients.iter_mut().find(|c| c.id == client_id) else {
                    return Err(Error::Closed);
                };
                for (name, topic) in self.topics.iter().filter(|(name, _)| subscription.matches(name)) {
                    client.announce(name, topic, None);
                    if !options.topics_only {
                        client.send_value(name, topic, timestamp);
                    }
                }
                client.subscriptions.insert(subuid, subscription);
            }
            ClientMessage::Unsubscribe { subuid } => {
                let client = self.client_mut(client_id)?;
                client.subscriptions.remove(&subuid);
            }
            ClientMessage::SetValue { pubuid, value } => {
                let client = self.client_mut(client_id)?;
                let Some(name) = client.publishers.get(&pubuid).cloned() else {
                    tracing::debug!(pubuid, "loopback: value for unknown publisher");
                    return Ok(());
                };
                self.set_value(&name, value, Some(client_id));
            }
        }
        Ok(())
    }

    fn client_mut(&mut self, client_id: u64) -> Result<&mut LoopbackClient> {
        self.clients
            .iter_mut()
            .find(|c| c.id == client_id)
            .ok_or(Error::Closed)
    }
}

/// An in-process endpoint that sessions can connect to.
///
/// Clones share the same endpoint.
#[derive(Clone)]
pub struct LoopbackEndpoint {
    state: Arc<Mutex<LoopbackState>>,
}

impl Default for LoopbackEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEndpoint {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopbackState {
                available: true,
                started: Instant::now(),
                next_topic_id: 1,
                next_client: 0,
                topics: IndexMap::new(),
                clients: Vec::new(),
                received: Vec::new(),
                connects: 0,
            })),
        }
    }

    /// Refuse (or accept again) new connections. Existing connections are
    /// not affected; see [`disconnect_all`](Self::disconnect_all).
    pub fn set_available(&self, available: bool) {
        self.state.lock().available = available;
    }

    /// Drop every connected client. Retained values survive.
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.state.lock().clients);
        tracing::debug!(clients = dropped.len(), "loopback: dropping all clients");
    }

    /// Publish `value` on `name` as if a remote program had set it.
    pub fn publish(&self, name: &str, value: impl Into<TopicValue>) {
        self.state.lock().set_value(name, value.into(), None);
    }

    /// Withdraw a topic and its retained value.
    pub fn remove_topic(&self, name: &str) {
        let mut state = self.state.lock();
        let Some(topic) = state.topics.shift_remove(name) else {
            return;
        };
        for client in state.clients.iter_mut() {
            if client.announced.remove(name) {
                let _ = client.outbound.send(ServerMessage::Unannounce {
                    name: name.to_string(),
                    id: topic.id,
                });
            }
        }
    }

    /// The retained value of `name`, if any.
    pub fn retained(&self, name: &str) -> Option<TopicValue> {
        self.state.lock().topics.get(name).and_then(|t| t.value.clone())
    }

    /// Every message clients have sent, in arrival order.
    pub fn received(&self) -> Vec<ClientMessage> {
        self.state.lock().received.clone()
    }

    pub fn clear_log(&self) {
        self.state.lock().received.clear();
    }

    /// Number of currently connected clients.
    pub fn client_count(&self) -> usize {
        self.state.lock().clients.len()
    }

    /// Number of accepted connections since creation.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    fn open(&self, endpoint: &Endpoint) -> Result<Connection> {
        let mut state = self.state.lock();
        if !state.available {
            return Err(Error::Connect {
                endpoint: endpoint.to_string(),
                reason: "loopback endpoint unavailable".into(),
            });
        }
        let id = state.next_client;
        state.next_client += 1;
        state.connects += 1;

        let (outbound, inbound) = mpsc::unbounded_channel();
        state.clients.push(LoopbackClient {
            id,
            outbound,
            subscriptions: HashMap::new(),
            publishers: HashMap::new(),
            announced: HashSet::new(),
        });
        let sink = LoopbackSink {
            client: id,
            state: Arc::clone(&self.state),
        };
        Ok(Connection::new(Arc::new(sink), inbound))
    }
}

impl Connector for LoopbackEndpoint {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connection>> {
        Box::pin(future::ready(self.open(endpoint)))
    }
}

struct LoopbackSink {
    client: u64,
    state: Arc<Mutex<LoopbackState>>,
}

impl MessageSink for LoopbackSink {
    fn send(&self, message: ClientMessage) -> Result<()> {
        self.state.lock().handle(self.client, message)
    }

    fn close(&self) {
        self.state.lock().clients.retain(|c| c.id != self.client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(endpoint: &LoopbackEndpoint) -> Connection {
        endpoint.open(&Endpoint::default()).unwrap()
    }

    fn drain(connection: &mut Connection) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = connection.inbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn subscribe(name: &str, subuid: i64) -> ClientMessage {
        ClientMessage::Subscribe {
            topics: vec![name.to_string()],
            subuid,
            options: SubscribeOptions::default(),
        }
    }

    #[test]
    fn subscribe_delivers_retained_value() {
        let endpoint = LoopbackEndpoint::new();
        endpoint.publish("/speed", 3.5);
        let mut conn = connect(&endpoint);

        conn.sink.send(subscribe("/speed", 1)).unwrap();
        let messages = drain(&mut conn);
        assert_eq!(messages.len(), 2);
        assert!(matches!(&messages[0], ServerMessage::Announce { name, .. } if name == "/speed"));
        assert!(matches!(
            &messages[1],
            ServerMessage::Value { value: TopicValue::Double(v), .. } if *v == 3.5
        ));
    }

    #[test]
    fn set_value_reaches_other_clients_only() {
        let endpoint = LoopbackEndpoint::new();
        let mut writer = connect(&endpoint);
        let mut reader = connect(&endpoint);
        reader.sink.send(subscribe("/mode", 1)).unwrap();
        writer.sink.send(subscribe("/mode", 1)).unwrap();

        writer
            .sink
            .send(ClientMessage::Publish {
                name: "/mode".into(),
                pubuid: 5,
                type_name: "string".into(),
            })
            .unwrap();
        writer
            .sink
            .send(ClientMessage::SetValue {
                pubuid: 5,
                value: TopicValue::from("auto"),
            })
            .unwrap();

        assert_eq!(endpoint.retained("/mode"), Some(TopicValue::from("auto")));
        assert!(drain(&mut reader)
            .iter()
            .any(|m| matches!(m, ServerMessage::Value { .. })));
        assert!(!drain(&mut writer)
            .iter()
            .any(|m| matches!(m, ServerMessage::Value { .. })));
    }

    #[test]
    fn outages_refuse_and_drop_clients() {
        let endpoint = LoopbackEndpoint::new();
        let mut conn = connect(&endpoint);
        assert_eq!(endpoint.client_count(), 1);

        endpoint.disconnect_all();
        assert_eq!(endpoint.client_count(), 0);
        assert!(conn.inbound.try_recv().is_err());
        assert_eq!(conn.sink.send(subscribe("/a", 1)), Err(Error::Closed));

        endpoint.set_available(false);
        assert!(endpoint.open(&Endpoint::default()).is_err());
        assert_eq!(endpoint.connect_count(), 1);
    }

    #[test]
    fn removing_a_topic_unannounces_it() {
        let endpoint = LoopbackEndpoint::new();
        endpoint.publish("/old", true);
        let mut conn = connect(&endpoint);
        conn.sink
            .send(ClientMessage::Subscribe {
                topics: vec![String::new()],
                subuid: 1,
                options: SubscribeOptions {
                    topics_only: true,
                    prefix: true,
                },
            })
            .unwrap();
        drain(&mut conn);

        endpoint.remove_topic("/old");
        assert!(matches!(
            drain(&mut conn).as_slice(),
            [ServerMessage::Unannounce { name, .. }] if name == "/old"
        ));
        assert_eq!(endpoint.retained("/old"), None);
    }
}
