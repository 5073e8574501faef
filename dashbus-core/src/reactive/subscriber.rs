//! Subscriber identity and unsubscribe tokens.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a subscriber callback.
///
/// Ids come from a process-wide atomic counter, so they stay unique across
/// signals and threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered callback observing values of type `T`.
///
/// The callback is reference counted so that a signal can snapshot its
/// subscriber list and release the list lock before notifying.
pub struct Subscriber<T> {
    id: SubscriberId,
    notify: Arc<dyn Fn(&T) + Send + Sync>,
}

impl<T> Subscriber<T> {
    /// Create a new subscriber with the given notification callback.
    pub fn new<F>(notify: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            id: SubscriberId::new(),
            notify: Arc::new(notify),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Hand the subscriber a new value.
    pub fn notify(&self, value: &T) {
        (self.notify)(value);
    }
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            notify: Arc::clone(&self.notify),
        }
    }
}

/// Token returned by `subscribe`.
///
/// Dropping the token removes the callback. Use [`Subscription::detach`] to
/// keep the callback registered for as long as the source lives.
#[must_use = "dropping a Subscription immediately unsubscribes the callback"]
pub struct Subscription {
    id: SubscriberId,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriberId, cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    /// Leave the callback registered and discard the token.
    pub fn detach(mut self) {
        self.cancel = None;
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_notify_calls_callback() {
        let seen = Arc::new(AtomicU64::new(0));
        let seen_clone = seen.clone();

        let subscriber = Subscriber::new(move |v: &u64| {
            seen_clone.store(*v, Ordering::SeqCst);
        });

        subscriber.notify(&5);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(subscriber.clone().id(), subscriber.id());
    }

    #[test]
    fn dropping_token_cancels() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_clone = cancelled.clone();

        let token = Subscription::new(SubscriberId::new(), move || {
            cancelled_clone.store(true, Ordering::SeqCst);
        });

        assert!(!cancelled.load(Ordering::SeqCst));
        drop(token);
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[test]
    fn detached_token_does_not_cancel() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let cancelled_clone = cancelled.clone();

        let token = Subscription::new(SubscriberId::new(), move || {
            cancelled_clone.store(true, Ordering::SeqCst);
        });
        token.detach();

        assert!(!cancelled.load(Ordering::SeqCst));
    }
}
