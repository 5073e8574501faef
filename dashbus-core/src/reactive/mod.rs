//! Reactive Primitives
//!
//! Every value the dashboard displays is observable: a widget subscribes to
//! it once and is called back on each change. This module provides the local
//! building block, [`Signal`], that the bus-backed
//! [`RemoteCell`](crate::bus::RemoteCell) and the session's own state
//! (connectivity, announced topics) are built on.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state with an ordered list of
//! subscriber callbacks. Subscribing delivers the current value immediately;
//! every later `set` delivers the new value to each callback, in subscription
//! order, before `set` returns.
//!
//! ## Subscriptions
//!
//! `subscribe` returns a [`Subscription`] token. Dropping the token removes
//! the callback, so an observer that goes away cannot leak its closure into
//! a long-lived value.

mod signal;
mod subscriber;

pub use signal::Signal;
pub use subscriber::{Subscriber, SubscriberId, Subscription};
