//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and a
//! list of callbacks that observe it.
//!
//! # How Signals Work
//!
//! 1. `subscribe` registers a callback and invokes it once with the current
//!    value.
//!
//! 2. `set` stores the new value and invokes every callback, in the order
//!    they subscribed, before returning.
//!
//! 3. Dropping the [`Subscription`] token removes the callback.
//!
//! # Nested Writes
//!
//! A callback may write back into the signal that invoked it. The new value
//! is stored at once, but its fan-out is queued until the current pass has
//! reached every subscriber. Each pass delivers one value to everyone, so
//! the last value any subscriber sees is the signal's value.
//!
//! # Thread Safety
//!
//! The value sits behind an `RwLock` and the callback list behind a
//! `Mutex`. Fan-out runs under a per-signal reentrant dispatch lock: two
//! updates to the same signal never run their callbacks concurrently.
//! Callbacks are invoked with the list lock released.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use smallvec::SmallVec;

use super::{Subscriber, Subscription, SubscriberId};

/// Counter for generating unique signal IDs.
static SIGNAL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique signal ID.
fn next_signal_id() -> u64 {
    SIGNAL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Most values have a handful of observers; keep them inline.
type SubscriberList<T> = SmallVec<[Subscriber<T>; 4]>;

/// Values waiting to be fanned out, owned by whoever holds the dispatch
/// lock.
struct Dispatch<T> {
    running: bool,
    queue: VecDeque<T>,
}

struct SignalInner<T> {
    id: u64,
    value: RwLock<T>,
    subscribers: Mutex<SubscriberList<T>>,
    dispatch: ReentrantMutex<RefCell<Dispatch<T>>>,
}

/// Ends a fan-out even if a callback panics.
struct DrainGuard<'a, T>(&'a RefCell<Dispatch<T>>);

impl<T> Drop for DrainGuard<'_, T> {
    fn drop(&mut self) {
        let mut dispatch = self.0.borrow_mut();
        dispatch.running = false;
        dispatch.queue.clear();
    }
}

/// A reactive value of type `T`.
///
/// Clones share state: writing through one clone notifies subscribers
/// registered through any other.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
/// let _sub = count.subscribe(|v| println!("count = {v}"));  // prints 0
/// count.set(5);                                           // prints 5
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<SignalInner<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: next_signal_id(),
                value: RwLock::new(value),
                subscribers: Mutex::new(SmallVec::new()),
                dispatch: ReentrantMutex::new(RefCell::new(Dispatch {
                    running: false,
                    queue: VecDeque::new(),
                })),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Called from inside a callback of this signal, the value is stored
    /// immediately and delivered once the running pass is complete.
    pub fn set(&self, value: T) {
        let dispatch = self.inner.dispatch.lock();
        *self.inner.value.write() = value.clone();
        {
            let mut state = dispatch.borrow_mut();
            state.queue.push_back(value);
            if state.running {
                return;
            }
            state.running = true;
        }

        let _guard = DrainGuard(&dispatch);
        loop {
            let next = dispatch.borrow_mut().queue.pop_front();
            let Some(value) = next else {
                break;
            };
            self.notify_subscribers(&value);
        }
    }

    /// Update the value using a function of the current value.
    ///
    /// Runs under the dispatch lock, so no other write to this signal can
    /// land between reading the current value and storing the new one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let _dispatch = self.inner.dispatch.lock();
        let current = self.get();
        self.set(f(&current));
    }

    /// Register a callback.
    ///
    /// The callback runs once immediately with the current value, then on
    /// every `set`.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let _dispatch = self.inner.dispatch.lock();
        let subscriber = Subscriber::new(callback);
        let id = subscriber.id();
        self.inner.subscribers.lock().push(subscriber.clone());

        let current = self.get();
        subscriber.notify(&current);

        let weak: Weak<SignalInner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.lock().retain(|s| s.id() != id);
            }
        })
    }

    /// Remove a subscriber by id.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.inner
            .subscribers
            .lock()
            .retain(|s| s.id() != subscriber_id);
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Invoke every callback with `value`, in subscription order.
    fn notify_subscribers(&self, value: &T) {
        let snapshot: SubscriberList<T> = self.inner.subscribers.lock().clone();
        for subscriber in &snapshot {
            subscriber.notify(value);
        }
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl<T> Default for Signal<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
