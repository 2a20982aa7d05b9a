//! JSON item <-> `AttributeValue` conversion

use aws_sdk_dynamodb::types::AttributeValue;
use kriti_core::{Item, KritiError, KritiResult};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};

pub type AttributeMap = HashMap<String, AttributeValue>;

pub fn to_attribute_value(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute_value).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute_value(v)))
                .collect(),
        ),
    }
}

pub fn to_attribute_map(item: &Item) -> AttributeMap {
    item.iter()
        .map(|(k, v)| (k.clone(), to_attribute_value(v)))
        .collect()
}

/// Placeholder values of a compiled expression; `None` when empty since the
/// service rejects an empty map.
pub fn to_expression_values(values: &BTreeMap<String, Value>) -> Option<AttributeMap> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), to_attribute_value(v)))
            .collect(),
    )
}

pub fn to_expression_names(names: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    if names.is_empty() {
        return None;
    }
    Some(names.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn parse_number(raw: &str) -> KritiResult<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Ok(Value::from(u));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| KritiError::Serialization {
            reason: format!("unrepresentable number attribute: {}", raw),
        })
}

pub fn from_attribute_value(value: &AttributeValue) -> KritiResult<Value> {
    Ok(match value {
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::N(n) => parse_number(n)?,
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::L(values) => Value::Array(
            values
                .iter()
                .map(from_attribute_value)
                .collect::<KritiResult<Vec<_>>>()?,
        ),
        AttributeValue::M(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), from_attribute_value(v)?)))
                .collect::<KritiResult<Map<String, Value>>>()?,
        ),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(values) => Value::Array(
            values
                .iter()
                .map(|n| parse_number(n))
                .collect::<KritiResult<Vec<_>>>()?,
        ),
        other => {
            return Err(KritiError::Serialization {
                reason: format!("unsupported attribute type: {:?}", other),
            })
        }
    })
}

pub fn from_attribute_map(map: &AttributeMap) -> KritiResult<Item> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), from_attribute_value(v)?)))
        .collect()
}
