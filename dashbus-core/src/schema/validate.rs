//! Strict conversion of untrusted JSON into typed values.
//!
//! Used for schema defaults and for per-element property overrides. There
//! is no coercion between kinds except that whole numbers are accepted as
//! integers whatever their JSON spelling (`3` and `3.0` both pass).

use serde_json::Value;

use crate::topic::{TopicKind, TopicValue};

/// Convert `value` to `kind`, or `None` if it does not validate.
pub fn value_for_kind(kind: TopicKind, value: &Value) -> Option<TopicValue> {
    match kind {
        TopicKind::Boolean => value.as_bool().map(TopicValue::Boolean),
        TopicKind::Integer => integer(value).map(TopicValue::Integer),
        TopicKind::Double => double(value).map(TopicValue::Double),
        TopicKind::String => value.as_str().map(|s| TopicValue::String(s.to_string())),
        TopicKind::BooleanArray => array(value, Value::as_bool).map(TopicValue::BooleanArray),
        TopicKind::IntegerArray => array(value, integer).map(TopicValue::IntegerArray),
        TopicKind::DoubleArray => array(value, double).map(TopicValue::DoubleArray),
        TopicKind::StringArray => {
            array(value, |v| v.as_str().map(str::to_string)).map(TopicValue::StringArray)
        }
    }
}

fn integer(value: &Value) -> Option<i64> {
    let Value::Number(number) = value else {
        return None;
    };
    if let Some(i) = number.as_i64() {
        return Some(i);
    }
    if number.is_u64() {
        return None;
    }
    let f = number.as_f64()?;
    // i64::MAX is not representable as f64; the bound is exclusive.
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn double(value: &Value) -> Option<f64> {
    value.as_f64().filter(|f| f.is_finite())
}

fn array<T>(value: &Value, element: impl Fn(&Value) -> Option<T>) -> Option<Vec<T>> {
    value.as_array()?.iter().map(element).collect()
}
