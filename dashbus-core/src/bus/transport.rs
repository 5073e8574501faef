//! Transport seam between the session and the network.
//!
//! A [`Connector`] opens a [`Connection`] to an endpoint. A connection is a
//! [`MessageSink`] for outbound messages plus a channel of inbound ones; the
//! transport signals a drop by closing the inbound channel. Sends never
//! block: they either enqueue or fail because the transport is gone.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use super::protocol::{ClientMessage, ServerMessage};
use crate::config::Endpoint;
use crate::error::Result;

/// Outbound half of a live connection.
pub trait MessageSink: Send + Sync {
    /// Queue a message for the endpoint.
    fn send(&self, message: ClientMessage) -> Result<()>;

    /// Tear the transport down. Called once, before the session moves on
    /// to another connection.
    fn close(&self) {}
}

/// A live connection handed from a connector to the session driver.
pub struct Connection {
    pub(crate) sink: Arc<dyn MessageSink>,
    pub(crate) inbound: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Connection {
    pub fn new(
        sink: Arc<dyn MessageSink>,
        inbound: mpsc::UnboundedReceiver<ServerMessage>,
    ) -> Self {
        Self { sink, inbound }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to bus endpoints.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connection>>;
}
