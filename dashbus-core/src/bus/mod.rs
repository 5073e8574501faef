//! The bus: remote cells and the session that keeps them in sync.
//!
//! # Layers
//!
//! - [`RemoteCell`] / [`PropertyCell`]: what widgets hold.
//! - [`BusSession`]: binding table, topic table, connection state.
//! - [`Connector`] / [`MessageSink`]: the transport seam, implemented by
//!   [`WebSocketConnector`] for real endpoints and [`LoopbackEndpoint`] for
//!   in-process ones.
//! - [`protocol`]: the NetworkTables 4 frame codec used by the WebSocket
//!   transport.

mod cell;
mod driver;
mod loopback;
pub mod protocol;
mod retry;
mod session;
mod state;
mod transport;
mod ws;

pub use cell::{PropertyCell, RemoteCell};
pub use loopback::LoopbackEndpoint;
pub use retry::RetryPolicy;
pub use session::{BusSession, ConnectionState};
pub use state::BindingId;
pub use transport::{Connection, Connector, MessageSink};
pub use ws::WebSocketConnector;
