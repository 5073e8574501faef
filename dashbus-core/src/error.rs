//! Error types shared across the crate.
//!
//! Malformed layout documents are not errors in this sense: the compiler
//! reports them as string diagnostics (see [`crate::layout::CompileReport`]).
//! The variants here cover the session, the transport and the registry.

use thiserror::Error;

use crate::topic::TopicKind;

/// Errors raised by the session, transports, registry and configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A topic key that the session refuses to bind.
    #[error("invalid topic key {0:?}")]
    InvalidKey(String),

    /// The endpoint already announced the key with a different type.
    #[error("topic {key:?} is announced as {announced:?} but the cell holds {expected}")]
    TypeConflict {
        key: String,
        announced: String,
        expected: TopicKind,
    },

    /// A value of one kind was offered to a cell of another kind.
    #[error("expected a {expected} value, got {actual}")]
    KindMismatch {
        expected: TopicKind,
        actual: TopicKind,
    },

    /// Connecting to the endpoint failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The transport is gone.
    #[error("connection closed")]
    Closed,

    /// The peer sent something we could not understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A widget schema with this id is already registered.
    #[error("widget schema {0:?} is already registered")]
    DuplicateSchema(String),

    /// A widget schema definition was rejected.
    #[error("invalid widget schema {id:?}: {reason}")]
    InvalidSchema { id: String, reason: String },

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(err.to_string())
    }
}

/// Logs the error, if any, and hands the result back.
pub(crate) fn log_result<T>(result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        tracing::error!("{err}");
    }
    result
}
