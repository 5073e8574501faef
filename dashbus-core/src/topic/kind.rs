//! Topic type tags.
//!
//! Every cell and every widget property carries exactly one of these tags.
//! The tag has three spellings:
//!
//! - the widget-schema spelling (`"integer"`, `"doublearray"`, ...), used by
//!   widget definitions and serde;
//! - the bus spelling (`"int"`, `"double[]"`, ...), used in announcements;
//! - the numeric wire id carried by binary value frames.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The eight value kinds a topic or widget property may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    Boolean,
    Integer,
    Double,
    String,
    BooleanArray,
    IntegerArray,
    DoubleArray,
    StringArray,
}

impl TopicKind {
    /// All kinds, scalars first.
    pub const ALL: [TopicKind; 8] = [
        TopicKind::Boolean,
        TopicKind::Integer,
        TopicKind::Double,
        TopicKind::String,
        TopicKind::BooleanArray,
        TopicKind::IntegerArray,
        TopicKind::DoubleArray,
        TopicKind::StringArray,
    ];

    /// The name used for this kind in topic announcements.
    pub fn type_name(self) -> &'static str {
        match self {
            TopicKind::Boolean => "boolean",
            TopicKind::Integer => "int",
            TopicKind::Double => "double",
            TopicKind::String => "string",
            TopicKind::BooleanArray => "boolean[]",
            TopicKind::IntegerArray => "int[]",
            TopicKind::DoubleArray => "double[]",
            TopicKind::StringArray => "string[]",
        }
    }

    /// Parse an announced type name.
    ///
    /// `float` topics are read as doubles. Types outside the supported set
    /// (`raw`, `json`, `msgpack`, ...) yield `None`.
    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(TopicKind::Boolean),
            "int" => Some(TopicKind::Integer),
            "double" | "float" => Some(TopicKind::Double),
            "string" => Some(TopicKind::String),
            "boolean[]" => Some(TopicKind::BooleanArray),
            "int[]" => Some(TopicKind::IntegerArray),
            "double[]" | "float[]" => Some(TopicKind::DoubleArray),
            "string[]" => Some(TopicKind::StringArray),
            _ => None,
        }
    }

    /// Numeric type id used in binary value frames.
    pub fn wire_id(self) -> u8 {
        match self {
            TopicKind::Boolean => 0,
            TopicKind::Double => 1,
            TopicKind::Integer => 2,
            TopicKind::String => 4,
            TopicKind::BooleanArray => 16,
            TopicKind::DoubleArray => 17,
            TopicKind::IntegerArray => 18,
            TopicKind::StringArray => 20,
        }
    }

    /// Inverse of [`TopicKind::wire_id`], mapping float ids onto doubles.
    pub fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(TopicKind::Boolean),
            1 | 3 => Some(TopicKind::Double),
            2 => Some(TopicKind::Integer),
            4 => Some(TopicKind::String),
            16 => Some(TopicKind::BooleanArray),
            17 | 19 => Some(TopicKind::DoubleArray),
            18 => Some(TopicKind::IntegerArray),
            20 => Some(TopicKind::StringArray),
            _ => None,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            TopicKind::BooleanArray
                | TopicKind::IntegerArray
                | TopicKind::DoubleArray
                | TopicKind::StringArray
        )
    }

    /// Element kind of an array kind; scalars return themselves.
    pub fn element(self) -> TopicKind {
        match self {
            TopicKind::BooleanArray => TopicKind::Boolean,
            TopicKind::IntegerArray => TopicKind::Integer,
            TopicKind::DoubleArray => TopicKind::Double,
            TopicKind::StringArray => TopicKind::String,
            scalar => scalar,
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopicKind::Boolean => "boolean",
            TopicKind::Integer => "integer",
            TopicKind::Double => "double",
            TopicKind::String => "string",
            TopicKind::BooleanArray => "booleanarray",
            TopicKind::IntegerArray => "integerarray",
            TopicKind::DoubleArray => "doublearray",
            TopicKind::StringArray => "stringarray",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_round_trip() {
        for kind in TopicKind::ALL {
            assert_eq!(TopicKind::from_type_name(kind.type_name()), Some(kind));
            assert_eq!(TopicKind::from_wire_id(kind.wire_id()), Some(kind));
        }
    }

    #[test]
    fn float_topics_read_as_doubles() {
        assert_eq!(TopicKind::from_type_name("float"), Some(TopicKind::Double));
        assert_eq!(TopicKind::from_wire_id(19), Some(TopicKind::DoubleArray));
        assert_eq!(TopicKind::from_type_name("raw"), None);
    }

    #[test]
    fn schema_spelling_matches_display() {
        for kind in TopicKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn array_kinds_know_their_elements() {
        assert!(TopicKind::StringArray.is_array());
        assert!(!TopicKind::String.is_array());
        assert_eq!(TopicKind::IntegerArray.element(), TopicKind::Integer);
        assert_eq!(TopicKind::Double.element(), TopicKind::Double);
    }
}
