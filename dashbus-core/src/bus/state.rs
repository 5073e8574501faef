//! Session state machine.
//!
//! Everything the session knows lives here, behind one lock: the live link
//! (if any), the binding table and the announced topic table. Operations are
//! synchronous; the only I/O is handing messages to the link's sink, which
//! never blocks. Inbound messages produce [`Delivery`] values that the caller
//! runs after releasing the lock, so subscriber callbacks never execute while
//! the session is locked.
//!
//! # Bindings
//!
//! Each bound cell owns one binding: its key, its kind, a weak reference back
//! to the cell, a subscription uid and, once the cell has been written while
//! bound, a publisher uid. The publisher is announced lazily on the first
//! write, and at most once per binding. A value written while no link is up
//! is parked in `pending` and sent exactly once when the next link comes up.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use super::protocol::{ClientMessage, ServerMessage, SubscribeOptions};
use super::transport::MessageSink;
use crate::error::{Error, Result};
use crate::topic::{TopicInfo, TopicKind, TopicValue};

/// Identifies one binding of one cell. Rebinding a cell creates a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

/// The receiving end of a binding: a cell.
pub(crate) trait RemoteSink: Send + Sync {
    /// Apply a remote value. `binding` names the binding the value arrived
    /// on; sinks ignore values for bindings they no longer hold.
    fn deliver(&self, binding: BindingId, value: TopicValue);
}

/// A remote value on its way to a cell.
pub(crate) struct Delivery {
    sink: Weak<dyn RemoteSink>,
    binding: BindingId,
    value: TopicValue,
}

impl Delivery {
    pub(crate) fn run(self) {
        if let Some(sink) = self.sink.upgrade() {
            sink.deliver(self.binding, self.value);
        }
    }
}

/// Side effects the owner must publish once the lock is released.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    /// New connectivity, if it flipped.
    pub(crate) connected: Option<bool>,
    /// New announced-topic list, if it changed.
    pub(crate) topics: Option<Vec<TopicInfo>>,
}

struct Binding {
    key: String,
    kind: TopicKind,
    sink: Weak<dyn RemoteSink>,
    subuid: i64,
    pubuid: Option<i64>,
    pending: Option<TopicValue>,
}

impl Binding {
    fn subscribe_message(&self) -> ClientMessage {
        ClientMessage::Subscribe {
            topics: vec![self.key.clone()],
            subuid: self.subuid,
            options: SubscribeOptions::default(),
        }
    }

    fn publish_message(&self, pubuid: i64) -> ClientMessage {
        ClientMessage::Publish {
            name: self.key.clone(),
            pubuid,
            type_name: self.kind.type_name().to_string(),
        }
    }
}

pub(crate) struct SessionState {
    link: Option<Arc<dyn MessageSink>>,
    bindings: IndexMap<BindingId, Binding>,
    announced: IndexMap<String, TopicInfo>,
    names_by_id: HashMap<i64, String>,
    next_binding: u64,
    next_uid: i64,
    connected_changed: bool,
    topics_changed: bool,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        Self {
            link: None,
            bindings: IndexMap::new(),
            announced: IndexMap::new(),
            names_by_id: HashMap::new(),
            next_binding: 0,
            next_uid: 1,
            connected_changed: false,
            topics_changed: false,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub(crate) fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub(crate) fn topics(&self) -> Vec<TopicInfo> {
        self.announced.values().cloned().collect()
    }

    /// Collect what changed since the last call.
    pub(crate) fn take_changes(&mut self) -> Changes {
        let mut changes = Changes::default();
        if std::mem::take(&mut self.connected_changed) {
            changes.connected = Some(self.is_connected());
        }
        if std::mem::take(&mut self.topics_changed) {
            changes.topics = Some(self.topics());
        }
        changes
    }

    fn alloc_uid(&mut self) -> i64 {
        let uid = self.next_uid;
        self.next_uid += 1;
        uid
    }

    /// Check that `key` can carry values of `kind`.
    pub(crate) fn resolve(&self, key: &str, kind: TopicKind) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::InvalidKey(key.to_string()));
        }
        match self.announced.get(key) {
            Some(info) if info.kind != Some(kind) => Err(Error::TypeConflict {
                key: key.to_string(),
                announced: info.type_name.clone(),
                expected: kind,
            }),
            _ => Ok(()),
        }
    }

    /// Register a new binding and subscribe to it if a link is up.
    pub(crate) fn bind(
        &mut self,
        key: &str,
        kind: TopicKind,
        sink: Weak<dyn RemoteSink>,
    ) -> Result<BindingId> {
        self.resolve(key, kind)?;

        let id = BindingId(self.next_binding);
        self.next_binding += 1;
        let binding = Binding {
            key: key.to_string(),
            kind,
            sink,
            subuid: self.alloc_uid(),
            pubuid: None,
            pending: None,
        };
        let subscribe = binding.subscribe_message();
        self.bindings.insert(id, binding);
        self.send(subscribe);
        Ok(id)
    }

    /// Drop a binding, withdrawing its subscription and publisher.
    /// Unknown ids are ignored.
    pub(crate) fn release(&mut self, id: BindingId) {
        let Some(binding) = self.bindings.shift_remove(&id) else {
            return;
        };
        if self.send(ClientMessage::Unsubscribe {
            subuid: binding.subuid,
        }) {
            if let Some(pubuid) = binding.pubuid {
                self.send(ClientMessage::Unpublish { pubuid });
            }
        }
    }

    /// Forward a locally written value. Unknown ids are ignored.
    pub(crate) fn write(&mut self, id: BindingId, value: TopicValue) {
        let Some(binding) = self.bindings.get_mut(&id) else {
            return;
        };
        let mut announce = None;
        let pubuid = match binding.pubuid {
            Some(pubuid) => pubuid,
            None => {
                let pubuid = self.next_uid;
                self.next_uid += 1;
                binding.pubuid = Some(pubuid);
                announce = Some(binding.publish_message(pubuid));
                pubuid
            }
        };

        if self.is_connected() {
            let announced = announce.map_or(true, |message| self.send(message));
            if announced
                && self.send(ClientMessage::SetValue {
                    pubuid,
                    value: value.clone(),
                })
            {
                return;
            }
        }

        if let Some(binding) = self.bindings.get_mut(&id) {
            binding.pending = Some(value);
        }
    }

    /// A link came up: announce interest in every topic, then replay every
    /// binding in creation order.
    pub(crate) fn attach(&mut self, link: Arc<dyn MessageSink>) {
        self.link = Some(link);
        self.connected_changed = true;

        let mut replay = vec![ClientMessage::Subscribe {
            topics: vec![String::new()],
            subuid: self.alloc_uid(),
            options: SubscribeOptions {
                topics_only: true,
                prefix: true,
            },
        }];
        for binding in self.bindings.values() {
            replay.push(binding.subscribe_message());
            if let Some(pubuid) = binding.pubuid {
                replay.push(binding.publish_message(pubuid));
                if let Some(value) = &binding.pending {
                    replay.push(ClientMessage::SetValue {
                        pubuid,
                        value: value.clone(),
                    });
                }
            }
        }

        tracing::debug!(messages = replay.len(), bindings = self.bindings.len(), "replaying bindings");
        for message in replay {
            if !self.send(message) {
                return;
            }
        }
        for binding in self.bindings.values_mut() {
            binding.pending = None;
        }
    }

    /// The link went away. Cells keep their values; the topic table is
    /// cleared because the endpoint re-announces on the next connection.
    pub(crate) fn detach(&mut self) {
        if self.link.take().is_some() {
            self.connected_changed = true;
        }
        if !self.announced.is_empty() {
            self.announced.clear();
            self.topics_changed = true;
        }
        self.names_by_id.clear();
    }

    /// Apply one inbound message.
    pub(crate) fn handle(&mut self, message: ServerMessage) -> Vec<Delivery> {
        match message {
            ServerMessage::Announce {
                name,
                id,
                type_name,
                ..
            } => {
                if name.is_empty() {
                    tracing::warn!(id, "dropping announcement without a topic name");
                    return Vec::new();
                }
                let kind = TopicKind::from_type_name(&type_name);
                if kind.is_none() {
                    tracing::debug!(%name, %type_name, "announced topic has an unsupported type");
                }
                if let Some(previous) = self.announced.get(&name) {
                    self.names_by_id.remove(&previous.id);
                }
                self.names_by_id.insert(id, name.clone());
                self.announced.insert(
                    name.clone(),
                    TopicInfo {
                        name,
                        id,
                        type_name,
                        kind,
                    },
                );
                self.topics_changed = true;
                Vec::new()
            }
            ServerMessage::Unannounce { name, id } => {
                self.names_by_id.remove(&id);
                if self.announced.shift_remove(&name).is_some() {
                    self.topics_changed = true;
                }
                Vec::new()
            }
            ServerMessage::Value {
                topic_id, value, ..
            } => {
                let Some(name) = self.names_by_id.get(&topic_id) else {
                    tracing::debug!(topic_id, "dropping value for unannounced topic");
                    return Vec::new();
                };
                let mut deliveries = Vec::new();
                for (id, binding) in self.bindings.iter().filter(|(_, b)| &b.key == name) {
                    match value.clone().coerce(binding.kind) {
                        Some(value) => deliveries.push(Delivery {
                            sink: binding.sink.clone(),
                            binding: *id,
                            value,
                        }),
                        None => tracing::warn!(
                            key = %binding.key,
                            expected = %binding.kind,
                            actual = %value.kind(),
                            "dropping value of the wrong type"
                        ),
                    }
                }
                deliveries
            }
        }
    }

    /// Hand a message to the link. On failure the link is dropped and the
    /// caller sees `false`.
    fn send(&mut self, message: ClientMessage) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        match link.send(message) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(%err, "link rejected a message, treating it as dropped");
                self.detach();
                false
            }
        }
    }
}
