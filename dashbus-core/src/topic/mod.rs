//! Topic Types
//!
//! The bus carries named, typed values. This module defines the closed set
//! of kinds the dashboard understands ([`TopicKind`]), a dynamically typed
//! value ([`TopicValue`]) used wherever the kind is only known at runtime
//! (widget schemas, the wire codec), and the [`TopicType`] trait that ties
//! each kind to one Rust type for statically typed cells.

mod kind;
mod value;

pub use kind::TopicKind;
pub use value::{TopicType, TopicValue};

use serde::{Deserialize, Serialize};

/// A topic the endpoint has announced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Topic name (the remote key).
    pub name: String,
    /// Endpoint-assigned topic id, used by value frames.
    pub id: i64,
    /// The announced type name, verbatim.
    pub type_name: String,
    /// Parsed kind, or `None` for types the dashboard does not display.
    pub kind: Option<TopicKind>,
}
