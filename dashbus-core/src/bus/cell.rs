//! Remote Cells
//!
//! A [`RemoteCell`] is a [`Signal`] that may be bound to one topic on the
//! bus. Unbound, it is a plain local observable. Bound, it additionally
//! receives the topic's values (starting with the retained one) and forwards
//! its own writes to the bus.
//!
//! # Rebinding
//!
//! `rebind` swaps the topic without touching the subscriber list or the
//! current value: the old binding is released, a new one is registered, and
//! the local value stays as the default until the new topic delivers. The
//! publisher for the new topic is only announced when the cell is next
//! written, so flipping a widget between topics does not spam the bus.
//!
//! # Lifetime
//!
//! Clones share one cell. When the last clone is dropped the binding is
//! released and the bus subscription withdrawn.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::session::BusSession;
use super::state::{BindingId, RemoteSink};
use crate::error::{Error, Result};
use crate::reactive::{Signal, Subscription};
use crate::topic::{TopicKind, TopicType, TopicValue};

#[derive(Debug, Default)]
struct CellLink {
    key: Option<String>,
    binding: Option<BindingId>,
}

struct CellInner<T: TopicType> {
    signal: Signal<T>,
    link: Mutex<CellLink>,
    session: BusSession,
}

impl<T: TopicType> RemoteSink for CellInner<T> {
    fn deliver(&self, binding: BindingId, value: TopicValue) {
        if self.link.lock().binding != Some(binding) {
            return;
        }
        match T::from_value(value) {
            Some(value) => self.signal.set(value),
            None => tracing::warn!(kind = %T::KIND, "dropping remote value of the wrong type"),
        }
    }
}

impl<T: TopicType> Drop for CellInner<T> {
    fn drop(&mut self) {
        if let Some(binding) = self.link.get_mut().binding.take() {
            self.session.release(binding);
        }
    }
}

/// A typed reactive value, optionally bound to a topic.
///
/// Created through [`BusSession::create_cell`].
pub struct RemoteCell<T: TopicType> {
    inner: Arc<CellInner<T>>,
}

impl<T: TopicType> RemoteCell<T> {
    pub(crate) fn new(session: BusSession, initial: T) -> Self {
        Self {
            inner: Arc::new(CellInner {
                signal: Signal::new(initial),
                link: Mutex::new(CellLink::default()),
                session,
            }),
        }
    }

    /// Last known value. Never blocks on the network.
    pub fn read(&self) -> T {
        self.inner.signal.get()
    }

    /// Observe the value. The callback runs immediately with the current
    /// value and then on every change, local or remote.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.signal.subscribe(callback)
    }

    /// Set the value locally and, when bound, forward it to the bus.
    pub fn write(&self, value: T) {
        self.inner.signal.set(value.clone());
        let binding = self.inner.link.lock().binding;
        if let Some(binding) = binding {
            self.inner.session.publish(binding, value.into_value());
        }
    }

    /// Write a dynamically typed value; `false` if it does not convert to
    /// `T`.
    pub(crate) fn write_value(&self, value: TopicValue) -> bool {
        match T::from_value(value) {
            Some(value) => {
                self.write(value);
                true
            }
            None => false,
        }
    }

    /// Write `f(current)`. No other write to this cell lands in between.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let mut written = None;
        self.inner.signal.update(|current| {
            let next = f(current);
            written = Some(next.clone());
            next
        });
        let binding = self.inner.link.lock().binding;
        if let (Some(binding), Some(value)) = (binding, written) {
            self.inner.session.publish(binding, value.into_value());
        }
    }

    /// Bind to `key`, replacing any current binding.
    ///
    /// If the session cannot resolve the key the cell is left unbound and
    /// the failure is reported through [`BusSession::last_error`].
    pub fn rebind(&self, key: impl Into<String>) {
        let key = key.into();
        let sink: Weak<dyn RemoteSink> = Arc::downgrade(&self.inner) as Weak<dyn RemoteSink>;
        let previous = {
            let mut link = self.inner.link.lock();
            link.key = None;
            link.binding.take()
        };

        // The session may notify observers; the link lock must not be held.
        let Ok(binding) = self.inner.session.rebind(previous, &key, T::KIND, sink) else {
            return;
        };
        tracing::debug!(%key, kind = %T::KIND, "cell bound");

        let displaced = {
            let mut link = self.inner.link.lock();
            link.key = Some(key);
            link.binding.replace(binding)
        };
        if let Some(displaced) = displaced {
            self.inner.session.release(displaced);
        }
    }

    /// Drop the binding; the cell keeps its value and subscribers.
    pub fn unbind(&self) {
        let previous = {
            let mut link = self.inner.link.lock();
            link.key = None;
            link.binding.take()
        };
        if let Some(binding) = previous {
            self.inner.session.release(binding);
        }
    }

    pub fn kind(&self) -> TopicKind {
        T::KIND
    }

    pub fn bound_key(&self) -> Option<String> {
        self.inner.link.lock().key.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.inner.link.lock().binding.is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.signal.subscriber_count()
    }

    /// Identity of the underlying cell; equal for clones.
    pub fn id(&self) -> u64 {
        self.inner.signal.id()
    }
}

impl<T: TopicType> Clone for RemoteCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: TopicType + fmt::Debug> fmt::Debug for RemoteCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCell")
            .field("kind", &T::KIND)
            .field("value", &self.read())
            .field("key", &self.bound_key())
            .finish()
    }
}

/// A remote cell whose kind is only known at runtime.
///
/// Widget properties are declared by schemas loaded at runtime, so the
/// layout compiler cannot name `T`. Each variant wraps the statically typed
/// cell; match on it to get typed access.
#[derive(Clone, Debug)]
pub enum PropertyCell {
    Boolean(RemoteCell<bool>),
    Integer(RemoteCell<i64>),
    Double(RemoteCell<f64>),
    String(RemoteCell<String>),
    BooleanArray(RemoteCell<Vec<bool>>),
    IntegerArray(RemoteCell<Vec<i64>>),
    DoubleArray(RemoteCell<Vec<f64>>),
    StringArray(RemoteCell<Vec<String>>),
}

macro_rules! each_cell {
    ($self:expr, $cell:ident => $body:expr) => {
        match $self {
            PropertyCell::Boolean($cell) => $body,
            PropertyCell::Integer($cell) => $body,
            PropertyCell::Double($cell) => $body,
            PropertyCell::String($cell) => $body,
            PropertyCell::BooleanArray($cell) => $body,
            PropertyCell::IntegerArray($cell) => $body,
            PropertyCell::DoubleArray($cell) => $body,
            PropertyCell::StringArray($cell) => $body,
        }
    };
}

macro_rules! typed_accessor {
    ($($name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        $(
            pub fn $name(&self) -> Option<&RemoteCell<$ty>> {
                match self {
                    PropertyCell::$variant(cell) => Some(cell),
                    _ => None,
                }
            }
        )*
    };
}

impl PropertyCell {
    typed_accessor! {
        as_boolean => Boolean(bool),
        as_integer => Integer(i64),
        as_double => Double(f64),
        as_string => String(String),
        as_boolean_array => BooleanArray(Vec<bool>),
        as_integer_array => IntegerArray(Vec<i64>),
        as_double_array => DoubleArray(Vec<f64>),
        as_string_array => StringArray(Vec<String>),
    }

    pub(crate) fn new(session: &BusSession, initial: TopicValue) -> Self {
        let session = session.clone();
        match initial {
            TopicValue::Boolean(v) => PropertyCell::Boolean(RemoteCell::new(session, v)),
            TopicValue::Integer(v) => PropertyCell::Integer(RemoteCell::new(session, v)),
            TopicValue::Double(v) => PropertyCell::Double(RemoteCell::new(session, v)),
            TopicValue::String(v) => PropertyCell::String(RemoteCell::new(session, v)),
            TopicValue::BooleanArray(v) => PropertyCell::BooleanArray(RemoteCell::new(session, v)),
            TopicValue::IntegerArray(v) => PropertyCell::IntegerArray(RemoteCell::new(session, v)),
            TopicValue::DoubleArray(v) => PropertyCell::DoubleArray(RemoteCell::new(session, v)),
            TopicValue::StringArray(v) => PropertyCell::StringArray(RemoteCell::new(session, v)),
        }
    }

    pub fn kind(&self) -> TopicKind {
        each_cell!(self, cell => cell.kind())
    }

    /// Current value as a [`TopicValue`].
    pub fn value(&self) -> TopicValue {
        each_cell!(self, cell => cell.read().into_value())
    }

    /// Write a dynamically typed value; the kind must match exactly after
    /// lossless coercion.
    pub fn set_value(&self, value: TopicValue) -> Result<()> {
        let actual = value.kind();
        if each_cell!(self, cell => cell.write_value(value)) {
            Ok(())
        } else {
            Err(Error::KindMismatch {
                expected: self.kind(),
                actual,
            })
        }
    }

    /// Observe the value as a [`TopicValue`].
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TopicValue) + Send + Sync + 'static,
    {
        each_cell!(self, cell => cell.subscribe(move |v| callback(&v.clone().into_value())))
    }

    pub fn rebind(&self, key: impl Into<String>) {
        each_cell!(self, cell => cell.rebind(key))
    }

    pub fn unbind(&self) {
        each_cell!(self, cell => cell.unbind())
    }

    pub fn bound_key(&self) -> Option<String> {
        each_cell!(self, cell => cell.bound_key())
    }

    pub fn is_bound(&self) -> bool {
        each_cell!(self, cell => cell.is_bound())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session() -> BusSession {
        BusSession::new(SessionConfig::default())
    }

    #[test]
    fn unbound_cell_is_a_plain_observable() {
        let session = session();
        let cell = session.create_cell(1.5f64, None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let _sub = cell.subscribe(move |v| seen_clone.lock().push(*v));
        cell.write(2.5);
        cell.update(|v| v * 2.0);

        assert_eq!(*seen.lock(), vec![1.5, 2.5, 5.0]);
        assert_eq!(cell.read(), 5.0);
        assert_eq!(cell.kind(), TopicKind::Double);
        assert_eq!(cell.bound_key(), None);
    }

    #[test]
    fn update_may_read_the_cell() {
        let session = session();
        let cell = session.create_cell(3i64, None);
        let reader = cell.clone();
        cell.update(|v| v + reader.read());
        assert_eq!(cell.read(), 6);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let session = session();
        let cell = session.create_cell(0i64, Some("/count"));
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cell = cell.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        cell.update(|v| v + 1);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_eq!(cell.read(), 1000);
    }

    #[test]
    fn rebind_keeps_value_and_subscribers() {
        let session = session();
        let cell = session.create_cell(String::from("idle"), Some("/mode"));
        let calls = Arc::new(AtomicUsize::new(0));
        let subs: Vec<_> = (0..3)
            .map(|_| {
                let calls = calls.clone();
                cell.subscribe(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        cell.rebind("/other/mode");
        assert_eq!(cell.bound_key().as_deref(), Some("/other/mode"));
        assert_eq!(cell.subscriber_count(), 3);
        assert_eq!(cell.read(), "idle");
        assert_eq!(session.binding_count(), 1);
        drop(subs);
    }

    #[test]
    fn invalid_key_leaves_cell_unbound() {
        let session = session();
        let cell = session.create_cell(true, Some("/flag"));
        assert!(cell.is_bound());

        cell.rebind("");
        assert!(!cell.is_bound());
        assert_eq!(cell.bound_key(), None);
        assert_eq!(session.last_error().get(), Some(Error::InvalidKey(String::new())));
        assert_eq!(session.binding_count(), 0);
    }

    #[test]
    fn dropping_last_clone_releases_binding() {
        let session = session();
        let cell = session.create_cell(0i64, Some("/count"));
        let clone = cell.clone();
        assert_eq!(session.binding_count(), 1);

        drop(cell);
        assert_eq!(session.binding_count(), 1);
        drop(clone);
        assert_eq!(session.binding_count(), 0);
    }

    #[test]
    fn stale_binding_deliveries_are_ignored() {
        let session = session();
        let cell = session.create_cell(1i64, Some("/a"));
        let old = cell.inner.link.lock().binding.unwrap();
        cell.rebind("/b");

        cell.inner.deliver(old, TopicValue::Integer(99));
        assert_eq!(cell.read(), 1);

        let current = cell.inner.link.lock().binding.unwrap();
        cell.inner.deliver(current, TopicValue::Integer(7));
        assert_eq!(cell.read(), 7);
    }

    #[test]
    fn property_cell_checks_kind() {
        let session = session();
        let cell = session.create_property_cell(TopicValue::IntegerArray(vec![1]), None);
        assert_eq!(cell.kind(), TopicKind::IntegerArray);

        assert!(cell.set_value(TopicValue::IntegerArray(vec![2, 3])).is_ok());
        assert_eq!(cell.value(), TopicValue::IntegerArray(vec![2, 3]));
        assert_eq!(cell.as_integer_array().map(|c| c.read()), Some(vec![2, 3]));
        assert!(cell.as_double().is_none());
        assert_eq!(
            cell.set_value(TopicValue::Boolean(true)),
            Err(Error::KindMismatch {
                expected: TopicKind::IntegerArray,
                actual: TopicKind::Boolean,
            })
        );
    }
}
