//! Filter expressions for queries and scans
//!
//! A filter is applied by the store after the key condition has selected
//! items, so it never reduces how many items are read.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::item::{compare_values, get_path, Item};

/// Filter operator for attribute comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// String prefix
    BeginsWith,
    /// Substring (strings) or element membership (lists)
    Contains,
    /// In list of values
    In,
    /// Attribute is present
    Exists,
    /// Attribute is absent
    NotExists,
}

impl FilterOperator {
    /// Whether the operator takes no comparison value.
    pub fn is_unary(&self) -> bool {
        matches!(self, FilterOperator::Exists | FilterOperator::NotExists)
    }

    /// Comparison symbol for infix operators.
    pub fn symbol(&self) -> Option<&'static str> {
        match self {
            FilterOperator::Eq => Some("="),
            FilterOperator::Ne => Some("<>"),
            FilterOperator::Lt => Some("<"),
            FilterOperator::Lte => Some("<="),
            FilterOperator::Gt => Some(">"),
            FilterOperator::Gte => Some(">="),
            _ => None,
        }
    }
}

/// A single filter clause: `attribute <operator> value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Attribute path (dots address nested maps)
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against; ignored by unary operators
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    /// Create an attribute-exists filter.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Exists, Value::Null)
    }

    /// Create an attribute-not-exists filter.
    pub fn not_exists(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::NotExists, Value::Null)
    }

    /// Evaluate this clause against an item.
    pub fn matches(&self, item: &Item) -> bool {
        let actual = get_path(item, &self.field);
        match self.operator {
            FilterOperator::Exists => actual.is_some(),
            FilterOperator::NotExists => actual.is_none(),
            FilterOperator::Eq => actual == Some(&self.value),
            FilterOperator::Ne => actual != Some(&self.value),
            FilterOperator::Lt | FilterOperator::Lte | FilterOperator::Gt | FilterOperator::Gte => {
                let Some(ordering) = actual.and_then(|a| compare_values(a, &self.value)) else {
                    return false;
                };
                match self.operator {
                    FilterOperator::Lt => ordering.is_lt(),
                    FilterOperator::Lte => ordering.is_le(),
                    FilterOperator::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                }
            }
            FilterOperator::BeginsWith => match (actual, &self.value) {
                (Some(Value::String(a)), Value::String(p)) => a.starts_with(p.as_str()),
                _ => false,
            },
            FilterOperator::Contains => match (actual, &self.value) {
                (Some(Value::String(a)), Value::String(needle)) => a.contains(needle.as_str()),
                (Some(Value::Array(list)), needle) => list.contains(needle),
                _ => false,
            },
            FilterOperator::In => match (actual, &self.value) {
                (Some(a), Value::Array(options)) => options.contains(a),
                _ => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> Item {
        json!({
            "name": "Kalyani",
            "melakarta": 65,
            "tags": ["evening", "sampoorna"],
            "details": { "arohanam": "S R2 G3 M2 P D2 N3 S" }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_comparisons() {
        let item = item();
        assert!(FilterExpr::eq("name", "Kalyani").matches(&item));
        assert!(FilterExpr::new("name", FilterOperator::Ne, "Todi").matches(&item));
        assert!(FilterExpr::new("melakarta", FilterOperator::Gt, 60).matches(&item));
        assert!(FilterExpr::new("melakarta", FilterOperator::Lte, 65).matches(&item));
        assert!(!FilterExpr::new("melakarta", FilterOperator::Lt, 65).matches(&item));
        assert!(!FilterExpr::new("melakarta", FilterOperator::Gt, "60").matches(&item));
    }

    #[test]
    fn test_string_and_list_operators() {
        let item = item();
        assert!(FilterExpr::new("name", FilterOperator::BeginsWith, "Kal").matches(&item));
        assert!(FilterExpr::contains("details.arohanam", "M2").matches(&item));
        assert!(FilterExpr::contains("tags", "evening").matches(&item));
        assert!(!FilterExpr::contains("tags", "morning").matches(&item));
        assert!(FilterExpr::new("melakarta", FilterOperator::In, json!([29, 65])).matches(&item));
    }

    #[test]
    fn test_existence() {
        let item = item();
        assert!(FilterExpr::exists("details.arohanam").matches(&item));
        assert!(FilterExpr::not_exists("janya").matches(&item));
        assert!(!FilterExpr::exists("janya").matches(&item));
        assert!(FilterOperator::Exists.is_unary());
    }

    #[test]
    fn test_missing_attribute_ne_matches() {
        let item = item();
        assert!(FilterExpr::new("janya", FilterOperator::Ne, "x").matches(&item));
    }
}
