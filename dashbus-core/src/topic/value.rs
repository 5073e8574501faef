//! Dynamically typed topic values and the static type mapping.

use serde::{Deserialize, Serialize};

use super::TopicKind;

/// A value of one of the eight supported kinds.
///
/// Serializes untagged, so a `TopicValue` is encoded exactly like the
/// underlying primitive or array, both as JSON and as MessagePack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TopicValue {
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    BooleanArray(Vec<bool>),
    IntegerArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl TopicValue {
    pub fn kind(&self) -> TopicKind {
        match self {
            TopicValue::Boolean(_) => TopicKind::Boolean,
            TopicValue::Integer(_) => TopicKind::Integer,
            TopicValue::Double(_) => TopicKind::Double,
            TopicValue::String(_) => TopicKind::String,
            TopicValue::BooleanArray(_) => TopicKind::BooleanArray,
            TopicValue::IntegerArray(_) => TopicKind::IntegerArray,
            TopicValue::DoubleArray(_) => TopicKind::DoubleArray,
            TopicValue::StringArray(_) => TopicKind::StringArray,
        }
    }

    /// The zero value of a kind: `false`, `0`, `0.0`, `""` or `[]`.
    pub fn zero(kind: TopicKind) -> Self {
        match kind {
            TopicKind::Boolean => TopicValue::Boolean(false),
            TopicKind::Integer => TopicValue::Integer(0),
            TopicKind::Double => TopicValue::Double(0.0),
            TopicKind::String => TopicValue::String(String::new()),
            TopicKind::BooleanArray => TopicValue::BooleanArray(Vec::new()),
            TopicKind::IntegerArray => TopicValue::IntegerArray(Vec::new()),
            TopicKind::DoubleArray => TopicValue::DoubleArray(Vec::new()),
            TopicKind::StringArray => TopicValue::StringArray(Vec::new()),
        }
    }

    /// Convert a decoded value into `kind`, if that loses nothing.
    ///
    /// Decoders cannot always tell kinds apart (an empty MessagePack array
    /// has no element type, a whole double may arrive as an integer), so
    /// integers widen to doubles and empty arrays take any array kind.
    pub fn coerce(self, kind: TopicKind) -> Option<TopicValue> {
        if self.kind() == kind {
            return Some(self);
        }
        match (self, kind) {
            (TopicValue::Integer(v), TopicKind::Double) => Some(TopicValue::Double(v as f64)),
            (TopicValue::IntegerArray(v), TopicKind::DoubleArray) => Some(TopicValue::DoubleArray(
                v.into_iter().map(|x| x as f64).collect(),
            )),
            (value, kind) if kind.is_array() && value.is_empty_array() => Some(TopicValue::zero(kind)),
            _ => None,
        }
    }

    fn is_empty_array(&self) -> bool {
        match self {
            TopicValue::BooleanArray(v) => v.is_empty(),
            TopicValue::IntegerArray(v) => v.is_empty(),
            TopicValue::DoubleArray(v) => v.is_empty(),
            TopicValue::StringArray(v) => v.is_empty(),
            _ => false,
        }
    }
}

/// Rust types that can live in a [`crate::bus::RemoteCell`].
///
/// The kind is fixed by the type, which is what makes a cell's type tag
/// immutable: there is no way to write an `f64` into a `RemoteCell<bool>`.
pub trait TopicType: Clone + Send + Sync + 'static {
    const KIND: TopicKind;

    fn into_value(self) -> TopicValue;

    /// Extract from a value of the matching kind.
    fn from_value(value: TopicValue) -> Option<Self>;
}

macro_rules! topic_type {
    ($ty:ty, $variant:ident) => {
        impl TopicType for $ty {
            const KIND: TopicKind = TopicKind::$variant;

            fn into_value(self) -> TopicValue {
                TopicValue::$variant(self)
            }

            fn from_value(value: TopicValue) -> Option<Self> {
                match value.coerce(TopicKind::$variant)? {
                    TopicValue::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl From<$ty> for TopicValue {
            fn from(value: $ty) -> Self {
                TopicValue::$variant(value)
            }
        }
    };
}

topic_type!(bool, Boolean);
topic_type!(i64, Integer);
topic_type!(f64, Double);
topic_type!(String, String);
topic_type!(Vec<bool>, BooleanArray);
topic_type!(Vec<i64>, IntegerArray);
topic_type!(Vec<f64>, DoubleArray);
topic_type!(Vec<String>, StringArray);

impl From<&str> for TopicValue {
    fn from(value: &str) -> Self {
        TopicValue::String(value.to_owned())
    }
}
