//! Integration Tests for the Bus Session
//!
//! These tests run real sessions, driver task included, against the
//! in-process loopback endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, BoxFuture};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use dashbus_core::bus::protocol::{ClientMessage, ServerMessage};
use dashbus_core::bus::{Connection, Connector, MessageSink};
use dashbus_core::{
    BusSession, ConnectionState, Endpoint, Error, LoopbackEndpoint, Result, RetryPolicy,
    SessionConfig, TopicValue,
};

fn config() -> SessionConfig {
    SessionConfig::default().with_retry(RetryPolicy::fixed(Duration::from_millis(10)))
}

/// Poll `check` until it holds, failing the test after about two seconds.
async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

fn count(messages: &[ClientMessage], pred: impl Fn(&ClientMessage) -> bool) -> usize {
    messages.iter().filter(|m| pred(m)).count()
}

/// Test that a bound cell receives the retained value once connected.
#[tokio::test]
async fn bound_cell_receives_retained_value() {
    let endpoint = LoopbackEndpoint::new();
    endpoint.publish("/drive/speed", 1.5);

    let session = BusSession::new(config());
    let cell = session.create_cell(0.0f64, Some("/drive/speed"));
    let _driver = session.start(endpoint.clone());

    eventually("retained value", || cell.read() == 1.5).await;
    assert_eq!(session.connection_state().get(), ConnectionState::Connected);
    assert_eq!(session.keys().get(), vec!["/drive/speed".to_string()]);
    session.shutdown();
}

/// Test that rebinding keeps every subscriber and ends at the new topic's
/// retained value without replaying the old one.
#[tokio::test]
async fn rebind_preserves_subscribers() {
    let endpoint = LoopbackEndpoint::new();
    endpoint.publish("/a", 1i64);
    endpoint.publish("/b", 2i64);

    let session = BusSession::new(config());
    let _driver = session.start(endpoint.clone());
    let cell = session.create_cell(0i64, Some("/a"));

    let seen: Vec<Arc<Mutex<Vec<i64>>>> = (0..3).map(|_| Arc::default()).collect();
    let _subs: Vec<_> = seen
        .iter()
        .map(|log| {
            let log = log.clone();
            cell.subscribe(move |v| log.lock().push(*v))
        })
        .collect();

    eventually("value of /a", || cell.read() == 1).await;
    let marks: Vec<usize> = seen.iter().map(|log| log.lock().len()).collect();

    cell.rebind("/b");
    assert_eq!(cell.subscriber_count(), 3);
    eventually("value of /b", || cell.read() == 2).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(cell.read(), 2);
    for (log, mark) in seen.iter().zip(marks) {
        let after = log.lock()[mark..].to_vec();
        assert_eq!(after, vec![2], "subscriber saw {after:?} after rebind");
    }
    session.shutdown();
}

/// Test that a dropped transport is recovered: bindings are re-subscribed
/// and a value written while offline is published exactly once.
#[tokio::test]
async fn reconnect_replays_bindings_and_pending_writes() {
    let endpoint = LoopbackEndpoint::new();
    let session = BusSession::new(config());
    let written = session.create_cell(0i64, Some("/written"));
    let idle = session.create_cell(0i64, Some("/idle"));
    let _driver = session.start(endpoint.clone());

    eventually("first connection", || {
        session.connection_state().get() == ConnectionState::Connected
    })
    .await;
    written.write(1);
    eventually("first write", || endpoint.retained("/written") == Some(TopicValue::Integer(1))).await;

    endpoint.set_available(false);
    endpoint.disconnect_all();
    eventually("disconnect", || {
        session.connection_state().get() != ConnectionState::Connected
    })
    .await;

    written.write(5);
    assert_eq!(written.read(), 5);
    assert_eq!(idle.read(), 0);

    endpoint.clear_log();
    endpoint.set_available(true);
    eventually("replayed write", || endpoint.retained("/written") == Some(TopicValue::Integer(5))).await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let log = endpoint.received();
    let subscribed = |key: &str| {
        count(&log, |m| {
            matches!(m, ClientMessage::Subscribe { topics, options, .. }
                if !options.topics_only && topics.iter().any(|t| t == key))
        })
    };
    assert_eq!(subscribed("/written"), 1);
    assert_eq!(subscribed("/idle"), 1);
    assert_eq!(count(&log, |m| matches!(m, ClientMessage::SetValue { .. })), 1);
    assert_eq!(
        count(&log, |m| matches!(m, ClientMessage::Publish { name, .. } if name == "/idle")),
        0
    );
    assert_eq!(endpoint.connect_count(), 2);
    session.shutdown();
}

/// Test that the session keeps retrying an endpoint that is down.
#[tokio::test]
async fn retries_until_endpoint_is_available() {
    let endpoint = LoopbackEndpoint::new();
    endpoint.set_available(false);

    let session = BusSession::new(config());
    let _driver = session.start(endpoint.clone());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_ne!(session.connection_state().get(), ConnectionState::Connected);

    endpoint.set_available(true);
    eventually("connection", || {
        session.connection_state().get() == ConnectionState::Connected
    })
    .await;
    assert_eq!(endpoint.connect_count(), 1);
    session.shutdown();
}

/// Test that writes from one session reach cells of another.
#[tokio::test]
async fn writes_propagate_between_sessions() {
    let endpoint = LoopbackEndpoint::new();
    let robot = BusSession::new(config());
    let dashboard = BusSession::new(config());
    let _a = robot.start(endpoint.clone());
    let _b = dashboard.start(endpoint.clone());

    let mode = robot.create_cell(String::from("disabled"), Some("/robot/mode"));
    let view = dashboard.create_cell(String::new(), Some("/robot/mode"));

    eventually("both connected", || endpoint.client_count() == 2).await;
    mode.write("auto".to_string());
    eventually("remote update", || view.read() == "auto").await;

    view.write("teleop".to_string());
    eventually("reverse update", || mode.read() == "teleop").await;

    robot.shutdown();
    dashboard.shutdown();
}

/// Test that the topic list follows announcements and is cleared on
/// disconnect.
#[tokio::test]
async fn topics_follow_the_endpoint() {
    let endpoint = LoopbackEndpoint::new();
    endpoint.publish("/a", true);
    let session = BusSession::new(config());
    let _driver = session.start(endpoint.clone());

    eventually("announcement", || session.keys().get() == vec!["/a".to_string()]).await;
    endpoint.publish("/b", vec![1.0, 2.0]);
    eventually("second announcement", || session.keys().get().len() == 2).await;
    endpoint.remove_topic("/a");
    eventually("unannouncement", || session.keys().get() == vec!["/b".to_string()]).await;

    endpoint.set_available(false);
    endpoint.disconnect_all();
    eventually("cleared topics", || session.topics().get().is_empty()).await;
    session.shutdown();
}

/// Routes connections by port, standing in for two machines.
struct Router(HashMap<u16, LoopbackEndpoint>);

impl Connector for Router {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connection>> {
        let target = self.0.get(&endpoint.port).cloned().unwrap_or_default();
        target.connect(endpoint)
    }
}

/// Test that changing the endpoint closes the old transport before the
/// new one delivers.
#[tokio::test]
async fn endpoint_change_switches_transport() {
    let first = LoopbackEndpoint::new();
    let second = LoopbackEndpoint::new();
    first.publish("/x", 1i64);
    second.publish("/x", 2i64);
    let router = Router(HashMap::from([(1, first.clone()), (2, second.clone())]));

    let session = BusSession::new(config().with_endpoint(Endpoint::new("robot", 1)));
    let cell = session.create_cell(0i64, Some("/x"));
    let _driver = session.start(router);
    eventually("first endpoint", || cell.read() == 1).await;

    session.set_endpoint(Endpoint::new("robot", 1));
    assert_eq!(first.connect_count(), 1);

    session.set_endpoint(Endpoint::new("robot", 2));
    eventually("second endpoint", || cell.read() == 2).await;
    assert_eq!(first.client_count(), 0);
    assert_eq!(second.client_count(), 1);
    session.shutdown();
}

/// Test that shutdown closes the transport and leaves values in place.
#[tokio::test]
async fn shutdown_disconnects_and_keeps_values() {
    let endpoint = LoopbackEndpoint::new();
    endpoint.publish("/v", 7i64);
    let session = BusSession::new(config());
    let cell = session.create_cell(0i64, Some("/v"));
    let driver = session.start(endpoint.clone());
    eventually("value", || cell.read() == 7).await;

    session.shutdown();
    driver.await.unwrap();

    assert_eq!(session.connection_state().get(), ConnectionState::Disconnected);
    assert_eq!(endpoint.client_count(), 0);
    assert_eq!(cell.read(), 7);
}

/// Test that dropping a cell withdraws its subscription from the endpoint.
#[tokio::test]
async fn dropping_a_cell_unsubscribes() {
    let endpoint = LoopbackEndpoint::new();
    let session = BusSession::new(config());
    let _driver = session.start(endpoint.clone());
    eventually("connection", || {
        session.connection_state().get() == ConnectionState::Connected
    })
    .await;

    let cell = session.create_cell(false, Some("/flag"));
    assert_eq!(session.binding_count(), 1);
    drop(cell);
    assert_eq!(session.binding_count(), 0);

    let log = endpoint.received();
    assert_eq!(count(&log, |m| matches!(m, ClientMessage::Unsubscribe { .. })), 1);
    session.shutdown();
}

/// Test that dropping every handle stops the driver and closes the transport.
#[tokio::test]
async fn dropping_the_session_stops_the_driver() {
    let endpoint = LoopbackEndpoint::new();
    let session = BusSession::new(config());
    let driver = session.start(endpoint.clone());
    eventually("connection", || {
        session.connection_state().get() == ConnectionState::Connected
    })
    .await;

    drop(session);
    tokio::time::timeout(Duration::from_secs(2), driver)
        .await
        .expect("driver exits once the session is gone")
        .unwrap();
    assert_eq!(endpoint.client_count(), 0);
}

/// Accepts sends until told to fail, standing in for a dead writer.
struct WriterThatDies {
    dead: Arc<AtomicBool>,
}

impl MessageSink for WriterThatDies {
    fn send(&self, _message: ClientMessage) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }
}

/// First connection has a writer that dies and a reader that never
/// speaks; later connections go to the loopback endpoint.
struct SilentThenLoopback {
    endpoint: LoopbackEndpoint,
    dead: Arc<AtomicBool>,
    attempts: AtomicUsize,
    silent: Mutex<Vec<mpsc::UnboundedSender<ServerMessage>>>,
}

impl Connector for SilentThenLoopback {
    fn connect(&self, endpoint: &Endpoint) -> BoxFuture<'static, Result<Connection>> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) > 0 {
            return self.endpoint.connect(endpoint);
        }
        let (keep_open, inbound) = mpsc::unbounded_channel();
        self.silent.lock().push(keep_open);
        let sink = Arc::new(WriterThatDies {
            dead: self.dead.clone(),
        });
        Box::pin(future::ready(Ok(Connection::new(sink, inbound))))
    }
}

/// Test that a failed send ends the connection even when the reader stays
/// quiet, and that the write is replayed on the next connection.
#[tokio::test]
async fn failed_send_triggers_reconnect() {
    let endpoint = LoopbackEndpoint::new();
    let dead = Arc::new(AtomicBool::new(false));
    let connector = SilentThenLoopback {
        endpoint: endpoint.clone(),
        dead: dead.clone(),
        attempts: AtomicUsize::new(0),
        silent: Mutex::new(Vec::new()),
    };

    let session = BusSession::new(config());
    let cell = session.create_cell(0i64, Some("/x"));
    let _driver = session.start(connector);
    eventually("first connection", || {
        session.connection_state().get() == ConnectionState::Connected
    })
    .await;

    dead.store(true, Ordering::SeqCst);
    cell.write(9);
    eventually("replayed write", || endpoint.retained("/x") == Some(TopicValue::Integer(9))).await;
    assert_eq!(endpoint.connect_count(), 1);
    assert_eq!(session.connection_state().get(), ConnectionState::Connected);
    session.shutdown();
}
