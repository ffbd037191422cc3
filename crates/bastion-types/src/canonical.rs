//! Canonical JSON encoding.
//!
//! Keys are sorted at every nesting level and no incidental whitespace is
//! emitted. Maps are rebuilt in sorted order explicitly, so the encoding does
//! not depend on whether `serde_json`'s `preserve_order` feature is enabled
//! somewhere in the dependency graph.

use serde::Serialize;
use serde_json::Value;

use crate::error::TypeError;

/// Canonical bytes of any serializable value.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, TypeError> {
    let tree = serde_json::to_value(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
    serde_json::to_vec(&sorted(tree)).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Canonical encoding as a `String`.
pub fn canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, TypeError> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Canonical bytes of a JSON object with the named top-level keys removed.
///
/// Used for "hash over every field except the hash itself".
pub fn canonical_bytes_without(value: &Value, excluded: &[&str]) -> Result<Vec<u8>, TypeError> {
    let mut copy = value.clone();
    if let Value::Object(map) = &mut copy {
        for key in excluded {
            map.remove(*key);
        }
    }
    serde_json::to_vec(&sorted(copy)).map_err(|e| TypeError::Serialization(e.to_string()))
}

fn sorted(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}
