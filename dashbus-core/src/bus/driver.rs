//! Background driver: connect, serve, back off, repeat.
//!
//! One driver task runs per started session. It is steered through a
//! `watch` channel carrying the target endpoint and a running flag; any
//! change interrupts whatever the driver is doing. An interrupted connection
//! is closed and detached from the session before the next connect attempt
//! begins, so two transports never deliver into the same cells.
//!
//! The driver holds the session weakly and never across an await. Once the
//! last handle is dropped the control channel closes and the driver exits.

use std::sync::Arc;

use tokio::sync::{watch, Notify};

use super::session::{BusSession, ConnectionState, WeakSession};
use super::transport::{Connection, Connector};
use crate::config::Endpoint;
use crate::error::Error;

/// What the session wants the driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Control {
    pub(crate) endpoint: Endpoint,
    pub(crate) running: bool,
}

/// Why a served connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Served {
    /// The transport went away.
    Dropped,
    /// The control value changed.
    Interrupted,
    /// The session is gone.
    Orphaned,
}

pub(crate) async fn run(
    session: WeakSession,
    connector: Arc<dyn Connector>,
    mut control: watch::Receiver<Control>,
) {
    let Some((policy, timeout, unlinked)) = with_session(&session, |s| {
        (s.config().retry.clone(), s.config().connect_timeout(), s.unlinked())
    }) else {
        return;
    };
    let mut attempt: u32 = 0;

    'driver: loop {
        let Control { endpoint, running } = control.borrow_and_update().clone();
        if !running {
            break;
        }

        if with_session(&session, |s| s.set_status(ConnectionState::Connecting)).is_none() {
            break;
        }
        tracing::debug!(%endpoint, attempt, "connecting");

        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, connector.connect(&endpoint)) => {
                result.unwrap_or_else(|_| {
                    Err(Error::Connect {
                        endpoint: endpoint.to_string(),
                        reason: format!("timed out after {}ms", timeout.as_millis()),
                    })
                })
            }
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                attempt = 0;
                continue;
            }
        };

        match outcome {
            Ok(connection) => {
                tracing::info!(%endpoint, "connected");
                attempt = 0;
                match serve(&session, connection, &mut control, &unlinked).await {
                    Served::Dropped => tracing::warn!(%endpoint, "connection lost"),
                    Served::Interrupted => continue 'driver,
                    Served::Orphaned => break 'driver,
                }
            }
            Err(err) => {
                if attempt == 0 {
                    tracing::warn!(%endpoint, %err, "connect failed, retrying");
                } else {
                    tracing::debug!(%endpoint, %err, attempt, "connect failed");
                }
                if with_session(&session, |s| s.set_status(ConnectionState::Disconnected)).is_none() {
                    break;
                }
            }
        }

        let delay = policy.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                attempt = 0;
            }
        }
    }

    with_session(&session, |s| {
        s.detach();
        s.set_status(ConnectionState::Disconnected);
    });
    tracing::info!("bus session stopped");
}

/// Run `f` against the session if any handle to it is still alive.
fn with_session<R>(session: &WeakSession, f: impl FnOnce(&BusSession) -> R) -> Option<R> {
    session.upgrade().map(|session| f(&session))
}

/// Pump one connection until it drops, the control value changes or the
/// session goes away.
async fn serve(
    session: &WeakSession,
    connection: Connection,
    control: &mut watch::Receiver<Control>,
    unlinked: &Notify,
) -> Served {
    let Connection { sink, mut inbound } = connection;
    if with_session(session, |s| s.attach(Arc::clone(&sink))).is_none() {
        sink.close();
        return Served::Orphaned;
    }

    let served = loop {
        match with_session(session, BusSession::is_linked) {
            None => break Served::Orphaned,
            Some(false) => break Served::Dropped,
            Some(true) => {}
        }
        tokio::select! {
            message = inbound.recv() => match message {
                Some(message) => {
                    if with_session(session, |s| s.handle(message)).is_none() {
                        break Served::Orphaned;
                    }
                }
                None => break Served::Dropped,
            },
            // A send failed and detached the link; the check above decides.
            _ = unlinked.notified() => {}
            changed = control.changed() => {
                break if changed.is_ok() { Served::Interrupted } else { Served::Orphaned };
            }
        }
    };

    sink.close();
    with_session(session, BusSession::detach);
    served
}
