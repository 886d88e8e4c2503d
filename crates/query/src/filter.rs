//! Exact-match pre-filter on record payloads.
//!
//! Filters records by equality on payload fields. No coercion: `"1"` and `1`
//! differ. A falsy expected value constrains nothing.

use serde_json::Value;
use storage::Record;

use crate::types::ExactFilter;

/// True when `expected` acts as a wildcard: `null`, `false`, `0`, or `""`.
pub fn is_wildcard(expected: &Value) -> bool {
    match expected {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Checks a record's payload against every constraint (AND semantics).
/// No filter at all passes every record.
pub fn matches_exact(record: &Record, filter: Option<&ExactFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    filter.iter().all(|(field, expected)| {
        is_wildcard(expected) || record.value.get(field) == Some(expected)
    })
}
