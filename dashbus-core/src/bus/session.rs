//! Bus Session
//!
//! A [`BusSession`] is the single owner of everything the dashboard knows
//! about the bus: the announced topics, the binding table and the current
//! link. It is cheap to clone; clones share state.
//!
//! The session itself is synchronous. Cells call into it from whatever thread
//! they are written on, and those calls only touch in-memory state and
//! enqueue outbound messages. The network side runs in a background driver
//! task started with [`BusSession::start`]; the driver owns the connect,
//! serve and backoff loop and feeds inbound messages back through the same
//! lock, so every inbound event and outbound send is serialized per session.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::cell::{PropertyCell, RemoteCell};
use super::driver::{self, Control};
use super::protocol::ServerMessage;
use super::state::{BindingId, Changes, RemoteSink, SessionState};
use super::transport::{Connector, MessageSink};
use crate::config::{Endpoint, SessionConfig};
use crate::error::{Error, Result};
use crate::reactive::Signal;
use crate::topic::{TopicInfo, TopicKind, TopicType, TopicValue};

/// Connectivity of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

struct SessionShared {
    config: SessionConfig,
    state: Mutex<SessionState>,
    status: Signal<ConnectionState>,
    topics: Signal<Vec<TopicInfo>>,
    keys: Signal<Vec<String>>,
    last_error: Signal<Option<Error>>,
    control: watch::Sender<Control>,
    /// Woken whenever the link goes away, including from inside a send.
    unlinked: Arc<Notify>,
}

/// Handle to one bus session.
///
/// The background driver only holds a weak reference, so dropping the last
/// handle (cells included) stops the driver and closes its transport.
#[derive(Clone)]
pub struct BusSession {
    shared: Arc<SessionShared>,
}

/// A session reference that does not keep the session alive.
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionShared>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<BusSession> {
        self.0.upgrade().map(|shared| BusSession { shared })
    }
}

impl BusSession {
    /// Create a disconnected session. Nothing touches the network until
    /// [`start`](Self::start) is called.
    pub fn new(config: SessionConfig) -> Self {
        let (control, _) = watch::channel(Control {
            endpoint: config.endpoint.clone(),
            running: true,
        });
        Self {
            shared: Arc::new(SessionShared {
                config,
                state: Mutex::new(SessionState::new()),
                status: Signal::new(ConnectionState::Disconnected),
                topics: Signal::new(Vec::new()),
                keys: Signal::new(Vec::new()),
                last_error: Signal::new(None),
                control,
                unlinked: Arc::new(Notify::new()),
            }),
        }
    }

    /// Spawn the background driver on the current tokio runtime.
    ///
    /// The driver connects through `connector`, replays every binding on
    /// each new connection and retries forever until
    /// [`shutdown`](Self::shutdown).
    pub fn start(&self, connector: impl Connector) -> JoinHandle<()> {
        self.shared.control.send_if_modified(|control| {
            let was_running = control.running;
            control.running = true;
            !was_running
        });
        tracing::info!(endpoint = %self.endpoint(), "starting bus session");
        let receiver = self.shared.control.subscribe();
        tokio::spawn(driver::run(self.downgrade(), Arc::new(connector), receiver))
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.shared))
    }

    pub(crate) fn unlinked(&self) -> Arc<Notify> {
        Arc::clone(&self.shared.unlinked)
    }

    /// Point the session at another endpoint. A no-op when unchanged;
    /// otherwise the driver tears down the current transport before
    /// connecting to the new address.
    pub fn set_endpoint(&self, endpoint: Endpoint) {
        let changed = self.shared.control.send_if_modified(|control| {
            if control.endpoint == endpoint {
                return false;
            }
            control.endpoint = endpoint.clone();
            true
        });
        if changed {
            tracing::info!(%endpoint, "endpoint changed");
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.shared.control.borrow().endpoint.clone()
    }

    /// Stop the driver. The transport is closed and the session ends up
    /// disconnected; cells keep their values.
    pub fn shutdown(&self) {
        self.shared.control.send_if_modified(|control| {
            let was_running = control.running;
            control.running = false;
            was_running
        });
    }

    /// Create a cell holding `initial`, bound to `key` when given.
    pub fn create_cell<T: TopicType>(&self, initial: T, key: Option<&str>) -> RemoteCell<T> {
        let cell = RemoteCell::new(self.clone(), initial);
        if let Some(key) = key {
            cell.rebind(key);
        }
        cell
    }

    /// Create a cell whose kind is the kind of `default`.
    pub fn create_property_cell(&self, default: TopicValue, key: Option<&str>) -> PropertyCell {
        let cell = PropertyCell::new(self, default);
        if let Some(key) = key {
            cell.rebind(key);
        }
        cell
    }

    /// Topics the endpoint currently announces, in announcement order.
    pub fn topics(&self) -> Signal<Vec<TopicInfo>> {
        self.shared.topics.clone()
    }

    /// Names of the announced topics.
    pub fn keys(&self) -> Signal<Vec<String>> {
        self.shared.keys.clone()
    }

    pub fn connection_state(&self) -> Signal<ConnectionState> {
        self.shared.status.clone()
    }

    /// Most recent session-level error, such as a key that could not be
    /// bound.
    pub fn last_error(&self) -> Signal<Option<Error>> {
        self.shared.last_error.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Number of currently bound cells.
    pub fn binding_count(&self) -> usize {
        self.shared.state.lock().binding_count()
    }

    pub(crate) fn rebind(
        &self,
        previous: Option<BindingId>,
        key: &str,
        kind: TopicKind,
        sink: Weak<dyn RemoteSink>,
    ) -> Result<BindingId> {
        let (result, changes) = {
            let mut state = self.shared.state.lock();
            if let Some(previous) = previous {
                state.release(previous);
            }
            let result = state.bind(key, kind, sink);
            (result, state.take_changes())
        };
        self.apply(changes);
        if let Err(err) = &result {
            tracing::warn!(%key, %kind, %err, "cannot bind cell");
            self.shared.last_error.set(Some(err.clone()));
        }
        result
    }

    pub(crate) fn release(&self, binding: BindingId) {
        let changes = {
            let mut state = self.shared.state.lock();
            state.release(binding);
            state.take_changes()
        };
        self.apply(changes);
    }

    pub(crate) fn publish(&self, binding: BindingId, value: TopicValue) {
        let changes = {
            let mut state = self.shared.state.lock();
            state.write(binding, value);
            state.take_changes()
        };
        self.apply(changes);
    }

    pub(crate) fn attach(&self, link: Arc<dyn MessageSink>) {
        let changes = {
            let mut state = self.shared.state.lock();
            state.attach(link);
            state.take_changes()
        };
        self.apply(changes);
    }

    pub(crate) fn detach(&self) {
        let changes = {
            let mut state = self.shared.state.lock();
            state.detach();
            state.take_changes()
        };
        self.apply(changes);
    }

    pub(crate) fn is_linked(&self) -> bool {
        self.shared.state.lock().is_connected()
    }

    /// Apply an inbound message. Messages arriving after the link went away
    /// are dropped.
    pub(crate) fn handle(&self, message: ServerMessage) {
        let (deliveries, changes) = {
            let mut state = self.shared.state.lock();
            if !state.is_connected() {
                tracing::trace!(?message, "dropping message from a detached link");
                return;
            }
            let deliveries = state.handle(message);
            (deliveries, state.take_changes())
        };
        self.apply(changes);
        for delivery in deliveries {
            delivery.run();
        }
    }

    pub(crate) fn set_status(&self, status: ConnectionState) {
        if self.shared.status.get() != status {
            tracing::debug!(%status, "connection state changed");
            self.shared.status.set(status);
        }
    }

    fn apply(&self, changes: Changes) {
        if let Some(topics) = changes.topics {
            let keys = topics.iter().map(|topic| topic.name.clone()).collect();
            self.shared.topics.set(topics);
            self.shared.keys.set(keys);
        }
        if let Some(connected) = changes.connected {
            if !connected {
                self.shared.unlinked.notify_one();
            }
            self.set_status(if connected {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            });
        }
    }
}

impl fmt::Debug for BusSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusSession")
            .field("endpoint", &self.endpoint())
            .field("state", &self.shared.status.get())
            .field("bindings", &self.binding_count())
            .finish()
    }
}
