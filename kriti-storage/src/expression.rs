//! Compiled query and scan descriptors
//!
//! A compiled descriptor carries two renditions of the same request: the
//! structured clauses, which the in-memory table evaluates directly, and
//! the store-native expression strings with `#n*` name and `:v*` value
//! placeholders, which the DynamoDB backend sends over the wire.

use kriti_core::{FilterExpr, FilterOperator, Item, KritiResult, ValidationError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use kriti_core::item::{ATTR_PK, ATTR_SK};

use crate::store::Condition;

// ============================================================================
// CLAUSES
// ============================================================================

/// Condition on the sort key of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    Equals(Value),
    BeginsWith(String),
    /// Inclusive on both ends
    Between(Value, Value),
}

impl SortKeyCondition {
    /// Whether a sort key value satisfies the condition.
    pub fn matches(&self, value: &Value) -> bool {
        use kriti_core::item::compare_values;
        match self {
            SortKeyCondition::Equals(expected) => value == expected,
            SortKeyCondition::BeginsWith(prefix) => value
                .as_str()
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
            SortKeyCondition::Between(low, high) => {
                matches!(compare_values(value, low), Some(o) if o.is_ge())
                    && matches!(compare_values(value, high), Some(o) if o.is_le())
            }
        }
    }
}

/// Equality on the partition key plus an optional sort key condition.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_attr: String,
    pub partition_value: Value,
    pub sort: Option<(String, SortKeyCondition)>,
}

// ============================================================================
// PLACEHOLDERS
// ============================================================================

/// Allocates `#n*` / `:v*` placeholders. The same attribute name always
/// maps to the same placeholder within one expression set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionAttributes {
    pub names: BTreeMap<String, String>,
    pub values: BTreeMap<String, Value>,
    by_name: HashMap<String, String>,
}

impl ExpressionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder for a single attribute name.
    pub fn name(&mut self, attribute: &str) -> String {
        if let Some(existing) = self.by_name.get(attribute) {
            return existing.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names
            .insert(placeholder.clone(), attribute.to_string());
        self.by_name
            .insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    /// Placeholder path for a dotted attribute path (`#n0.#n1`).
    pub fn path(&mut self, path: &str) -> String {
        path.split('.')
            .map(|segment| self.name(segment))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder for a value.
    pub fn value(&mut self, value: Value) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }
}

// ============================================================================
// RENDERING
// ============================================================================

/// Render a key condition; fragments are joined with `AND`.
pub fn render_key_condition(key: &KeyCondition, attrs: &mut ExpressionAttributes) -> String {
    let mut fragments = Vec::with_capacity(2);
    let pk = attrs.name(&key.partition_attr);
    let pv = attrs.value(key.partition_value.clone());
    fragments.push(format!("{} = {}", pk, pv));

    if let Some((attr, condition)) = &key.sort {
        let sk = attrs.name(attr);
        let fragment = match condition {
            SortKeyCondition::Equals(v) => format!("{} = {}", sk, attrs.value(v.clone())),
            SortKeyCondition::BeginsWith(prefix) => format!(
                "begins_with({}, {})",
                sk,
                attrs.value(Value::String(prefix.clone()))
            ),
            SortKeyCondition::Between(low, high) => {
                let lo = attrs.value(low.clone());
                let hi = attrs.value(high.clone());
                format!("{} BETWEEN {} AND {}", sk, lo, hi)
            }
        };
        fragments.push(fragment);
    }
    fragments.join(" AND ")
}

/// Check that a filter can be rendered.
pub fn validate_filter(filter: &FilterExpr) -> KritiResult<()> {
    if filter.field.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "filter.field".to_string(),
        }
        .into());
    }
    if filter.operator == FilterOperator::In {
        match &filter.value {
            Value::Array(options) if !options.is_empty() => {}
            _ => {
                return Err(ValidationError::InvalidValue {
                    field: filter.field.clone(),
                    reason: "IN requires a non-empty list".to_string(),
                }
                .into())
            }
        }
    }
    Ok(())
}

fn render_filter_clause(filter: &FilterExpr, attrs: &mut ExpressionAttributes) -> String {
    let path = attrs.path(&filter.field);
    match filter.operator {
        FilterOperator::Exists => format!("attribute_exists({})", path),
        FilterOperator::NotExists => format!("attribute_not_exists({})", path),
        FilterOperator::BeginsWith => {
            format!("begins_with({}, {})", path, attrs.value(filter.value.clone()))
        }
        FilterOperator::Contains => {
            format!("contains({}, {})", path, attrs.value(filter.value.clone()))
        }
        FilterOperator::In => {
            let options = match &filter.value {
                Value::Array(options) => options.clone(),
                other => vec![other.clone()],
            };
            let placeholders: Vec<String> =
                options.into_iter().map(|v| attrs.value(v)).collect();
            format!("{} IN ({})", path, placeholders.join(", "))
        }
        op => {
            let symbol = op.symbol().unwrap_or("=");
            format!("{} {} {}", path, symbol, attrs.value(filter.value.clone()))
        }
    }
}

/// Render filters joined with `AND`; `None` when there are none.
pub fn render_filters(filters: &[FilterExpr], attrs: &mut ExpressionAttributes) -> Option<String> {
    if filters.is_empty() {
        return None;
    }
    let clauses: Vec<String> = filters
        .iter()
        .map(|f| render_filter_clause(f, attrs))
        .collect();
    Some(clauses.join(" AND "))
}

/// Projected paths with the key attributes always included.
pub fn projection_with_keys(paths: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paths.len() + 2);
    for key in [ATTR_PK, ATTR_SK] {
        if !paths.iter().any(|p| p == key) {
            out.push(key.to_string());
        }
    }
    for path in paths {
        if !out.contains(path) {
            out.push(path.clone());
        }
    }
    out
}

/// Render a projection; each dotted path becomes a placeholder path.
pub fn render_projection(paths: &[String], attrs: &mut ExpressionAttributes) -> String {
    paths
        .iter()
        .map(|p| attrs.path(p))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a write condition.
pub fn render_condition(condition: &Condition, attrs: &mut ExpressionAttributes) -> String {
    match condition {
        Condition::AttributeNotExists(path) => format!("attribute_not_exists({})", attrs.path(path)),
        Condition::AttributeExists(path) => format!("attribute_exists({})", attrs.path(path)),
        Condition::AttributeEquals(path, value) => {
            let path = attrs.path(path);
            format!("{} = {}", path, attrs.value(value.clone()))
        }
    }
}

/// Reduce an item to the projected paths.
pub fn apply_projection(item: &Item, paths: &[String]) -> Item {
    let mut out = Item::new();
    for path in paths {
        kriti_core::item::copy_path(item, &mut out, path);
    }
    out
}

// ============================================================================
// COMPILED DESCRIPTORS
// ============================================================================

/// An executable query.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub index: Option<String>,
    pub key: KeyCondition,
    pub filters: Vec<FilterExpr>,
    pub limit: Option<usize>,
    pub scan_forward: bool,
    pub exclusive_start_key: Option<Item>,
    /// Projected paths, key attributes included
    pub projection: Option<Vec<String>>,

    pub key_condition_expression: String,
    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub attributes: ExpressionAttributes,
}

impl CompiledQuery {
    pub fn new(
        index: Option<String>,
        key: KeyCondition,
        filters: Vec<FilterExpr>,
        limit: Option<usize>,
        scan_forward: bool,
        exclusive_start_key: Option<Item>,
        projection: Option<Vec<String>>,
    ) -> KritiResult<Self> {
        for filter in &filters {
            validate_filter(filter)?;
        }
        let projection = projection.map(|p| projection_with_keys(&p));
        let mut attributes = ExpressionAttributes::new();
        let key_condition_expression = render_key_condition(&key, &mut attributes);
        let filter_expression = render_filters(&filters, &mut attributes);
        let projection_expression = projection
            .as_ref()
            .map(|p| render_projection(p, &mut attributes));
        Ok(Self {
            index,
            key,
            filters,
            limit,
            scan_forward,
            exclusive_start_key,
            projection,
            key_condition_expression,
            filter_expression,
            projection_expression,
            attributes,
        })
    }

    /// Whether an item passes every filter clause.
    pub fn passes_filters(&self, item: &Item) -> bool {
        self.filters.iter().all(|f| f.matches(item))
    }
}

/// An executable scan.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledScan {
    pub index: Option<String>,
    pub filters: Vec<FilterExpr>,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub projection: Option<Vec<String>>,

    pub filter_expression: Option<String>,
    pub projection_expression: Option<String>,
    pub attributes: ExpressionAttributes,
}

impl CompiledScan {
    pub fn new(
        index: Option<String>,
        filters: Vec<FilterExpr>,
        limit: Option<usize>,
        exclusive_start_key: Option<Item>,
        projection: Option<Vec<String>>,
    ) -> KritiResult<Self> {
        for filter in &filters {
            validate_filter(filter)?;
        }
        let projection = projection.map(|p| projection_with_keys(&p));
        let mut attributes = ExpressionAttributes::new();
        let filter_expression = render_filters(&filters, &mut attributes);
        let projection_expression = projection
            .as_ref()
            .map(|p| render_projection(p, &mut attributes));
        Ok(Self {
            index,
            filters,
            limit,
            exclusive_start_key,
            projection,
            filter_expression,
            projection_expression,
            attributes,
        })
    }

    pub fn passes_filters(&self, item: &Item) -> bool {
        self.filters.iter().all(|f| f.matches(item))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(sort: Option<(String, SortKeyCondition)>) -> KeyCondition {
        KeyCondition {
            partition_attr: "PK".to_string(),
            partition_value: json!("RAGA#r1"),
            sort,
        }
    }

    #[test]
    fn test_key_condition_rendering() {
        let mut attrs = ExpressionAttributes::new();
        let expr = render_key_condition(
            &key(Some((
                "SK".to_string(),
                SortKeyCondition::BeginsWith("VERSION#v".to_string()),
            ))),
            &mut attrs,
        );
        assert_eq!(expr, "#n0 = :v0 AND begins_with(#n1, :v1)");
        assert_eq!(attrs.names.get("#n0").map(String::as_str), Some("PK"));
        assert_eq!(attrs.values.get(":v1"), Some(&json!("VERSION#v")));
    }

    #[test]
    fn test_between_rendering() {
        let mut attrs = ExpressionAttributes::new();
        let expr = render_key_condition(
            &key(Some((
                "GSI2SK".to_string(),
                SortKeyCondition::Between(json!("DATE#2024-01-01"), json!("DATE#2024-01-31")),
            ))),
            &mut attrs,
        );
        assert_eq!(expr, "#n0 = :v0 AND #n1 BETWEEN :v1 AND :v2");
    }

    #[test]
    fn test_filter_rendering_shares_name_placeholders() {
        let mut attrs = ExpressionAttributes::new();
        let filters = vec![
            FilterExpr::new("status", FilterOperator::Eq, "published"),
            FilterExpr::new("status", FilterOperator::Ne, "draft"),
            FilterExpr::exists("details.composer"),
            FilterExpr::new("tala", FilterOperator::In, json!(["adi", "rupakam"])),
        ];
        let rendered = render_filters(&filters, &mut attrs).unwrap();
        assert_eq!(
            rendered,
            "#n0 = :v0 AND #n0 <> :v1 AND attribute_exists(#n1.#n2) AND #n3 IN (:v2, :v3)"
        );
        assert!(render_filters(&[], &mut attrs).is_none());
    }

    #[test]
    fn test_projection_always_includes_keys() {
        let paths = projection_with_keys(&["name".to_string(), "details.origin".to_string()]);
        assert_eq!(paths, vec!["PK", "SK", "name", "details.origin"]);

        let already = projection_with_keys(&["SK".to_string(), "name".to_string()]);
        assert_eq!(already, vec!["PK", "SK", "name"]);

        let mut attrs = ExpressionAttributes::new();
        assert_eq!(
            render_projection(&paths, &mut attrs),
            "#n0, #n1, #n2, #n3.#n4"
        );
    }

    #[test]
    fn test_apply_projection() {
        let item = json!({
            "PK": "ARTIST#a1", "SK": "#METADATA", "name": "x",
            "details": { "origin": "Chennai", "born": 1900 }
        })
        .as_object()
        .cloned()
        .unwrap();
        let projected = apply_projection(
            &item,
            &projection_with_keys(&["details.origin".to_string()]),
        );
        assert_eq!(
            Value::Object(projected),
            json!({ "PK": "ARTIST#a1", "SK": "#METADATA", "details": { "origin": "Chennai" } })
        );
    }

    #[test]
    fn test_in_requires_list() {
        let bad = FilterExpr::new("tala", FilterOperator::In, json!([]));
        assert!(validate_filter(&bad).is_err());
        let bad = FilterExpr::new("tala", FilterOperator::In, "adi");
        assert!(validate_filter(&bad).is_err());
    }

    #[test]
    fn test_sort_key_condition_matching() {
        let between = SortKeyCondition::Between(json!("b"), json!("d"));
        assert!(between.matches(&json!("b")));
        assert!(between.matches(&json!("c9")));
        assert!(between.matches(&json!("d")));
        assert!(!between.matches(&json!("d0")));
        assert!(!between.matches(&json!(3)));

        let prefix = SortKeyCondition::BeginsWith("VERSION#v".to_string());
        assert!(prefix.matches(&json!("VERSION#v1#t")));
        assert!(!prefix.matches(&json!("VERSION#LATEST")));
    }

    #[test]
    fn test_condition_rendering() {
        let mut attrs = ExpressionAttributes::new();
        assert_eq!(
            render_condition(&Condition::item_not_exists(), &mut attrs),
            "attribute_not_exists(#n0)"
        );
        let expr = render_condition(
            &Condition::AttributeEquals("version".to_string(), json!("v3")),
            &mut attrs,
        );
        assert_eq!(expr, "#n1 = :v0");
        assert_eq!(attrs.names.get("#n1").map(String::as_str), Some("version"));
        assert_eq!(attrs.values.get(":v0"), Some(&json!("v3")));
    }
}
