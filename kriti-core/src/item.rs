//! Record representation and attribute helpers.
//!
//! A record is an open attribute map. Only `PK` and `SK` are required; the
//! `GSI{1..6}PK/SK` and `LSI1SK` attributes project it into secondary
//! indexes. Everything else is entity-specific and opaque here.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One stored record.
pub type Item = Map<String, Value>;

/// Partition key attribute.
pub const ATTR_PK: &str = "PK";
/// Sort key attribute.
pub const ATTR_SK: &str = "SK";

// Versioned entity attributes
pub const ATTR_ID: &str = "id";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_TIMESTAMP: &str = "timestamp";
pub const ATTR_EDITED_BY: &str = "editedBy";
pub const ATTR_VIEW_COUNT: &str = "viewCount";
pub const ATTR_IS_LATEST: &str = "isLatest";
pub const ATTR_ENTITY_TYPE: &str = "entityType";

/// Resolve a dotted attribute path (`details.origin.city`).
pub fn get_path<'a>(item: &'a Item, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = item.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Copy a dotted path from `source` into `target`, creating intermediate
/// objects as needed. Missing paths are skipped.
pub fn copy_path(source: &Item, target: &mut Item, path: &str) {
    let Some(value) = get_path(source, path) else {
        return;
    };
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return,
    };
    let mut cursor = target;
    for segment in parents {
        let entry = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cursor = match entry.as_object_mut() {
            Some(map) => map,
            None => return,
        };
    }
    cursor.insert(last.to_string(), value.clone());
}

/// Read a string attribute.
pub fn get_str<'a>(item: &'a Item, name: &str) -> Option<&'a str> {
    item.get(name).and_then(Value::as_str)
}

/// Textual form of a scalar attribute; `None` for arrays, objects and null.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Ordering between two attribute values the way the store orders keys:
/// strings by UTF-8 bytes, numbers numerically. Mixed or non-scalar types
/// are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Item {
        json!({
            "PK": "ARTIST#a1",
            "SK": "#METADATA",
            "name": "M. S. Subbulakshmi",
            "details": { "origin": { "city": "Madurai" }, "born": 1916 }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_get_path_nested() {
        let item = sample();
        assert_eq!(get_path(&item, "name"), Some(&json!("M. S. Subbulakshmi")));
        assert_eq!(get_path(&item, "details.origin.city"), Some(&json!("Madurai")));
        assert_eq!(get_path(&item, "details.missing"), None);
        assert_eq!(get_path(&item, "name.first"), None);
    }

    #[test]
    fn test_copy_path_builds_nested_objects() {
        let item = sample();
        let mut target = Item::new();
        copy_path(&item, &mut target, "details.origin.city");
        copy_path(&item, &mut target, "details.born");
        copy_path(&item, &mut target, "nope");
        assert_eq!(
            Value::Object(target),
            json!({ "details": { "origin": { "city": "Madurai" }, "born": 1916 } })
        );
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!("a"), &json!("b")), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(10), &json!(9)), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!(1.5), &json!(1.5)), Some(Ordering::Equal));
        assert_eq!(compare_values(&json!("1"), &json!(1)), None);
    }

    #[test]
    fn test_scalar_text() {
        assert_eq!(scalar_text(&json!("x")), Some("x".to_string()));
        assert_eq!(scalar_text(&json!(42)), Some("42".to_string()));
        assert_eq!(scalar_text(&json!(true)), Some("true".to_string()));
        assert_eq!(scalar_text(&json!(["x"])), None);
        assert_eq!(scalar_text(&Value::Null), None);
    }
}
