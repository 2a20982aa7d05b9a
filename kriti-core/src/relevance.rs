//! Weighted relevance scoring for free-text search
//!
//! Scores an already-fetched candidate set; it never changes what was read.
//! Per field only the strongest matching rule counts:
//!
//! | rule                         | score        |
//! |------------------------------|--------------|
//! | exact                        | 10 × weight  |
//! | prefix                       | 5 × weight   |
//! | word start (`" term"`)       | 3 × weight   |
//! | substring                    | 2 × weight   |
//!
//! Field scores add up across fields. Comparison is case-insensitive.

use serde::{Deserialize, Serialize};

use crate::item::{get_path, scalar_text, Item};

pub const EXACT_MATCH_SCORE: f64 = 10.0;
pub const PREFIX_MATCH_SCORE: f64 = 5.0;
pub const WORD_MATCH_SCORE: f64 = 3.0;
pub const SUBSTRING_MATCH_SCORE: f64 = 2.0;

/// A searchable attribute and its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedField {
    /// Attribute path; dots address nested maps
    pub field: String,
    pub weight: f64,
}

impl WeightedField {
    pub fn new(field: impl Into<String>, weight: f64) -> Self {
        Self {
            field: field.into(),
            weight,
        }
    }
}

/// A candidate with its total score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: Item,
    pub score: f64,
}

/// Score of one field value against an already lower-cased term.
fn field_score(value: &str, term: &str, weight: f64) -> f64 {
    let value = value.to_lowercase();
    let multiplier = if value == term {
        EXACT_MATCH_SCORE
    } else if value.starts_with(term) {
        PREFIX_MATCH_SCORE
    } else if value.contains(&format!(" {}", term)) {
        WORD_MATCH_SCORE
    } else if value.contains(term) {
        SUBSTRING_MATCH_SCORE
    } else {
        0.0
    };
    multiplier * weight
}

/// Total score of one item.
pub fn score_item(item: &Item, term: &str, fields: &[WeightedField]) -> f64 {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return 0.0;
    }
    fields
        .iter()
        .filter_map(|f| {
            let text = get_path(item, &f.field).and_then(scalar_text)?;
            Some(field_score(&text, &term, f.weight))
        })
        .sum()
}

/// Score every item and sort descending by score. Ties keep input order.
/// A blank term scores everything zero, which leaves the input order.
pub fn score_search_results(
    items: Vec<Item>,
    term: &str,
    fields: &[WeightedField],
) -> Vec<ScoredItem> {
    let mut scored: Vec<ScoredItem> = items
        .into_iter()
        .map(|item| {
            let score = score_item(&item, term, fields);
            ScoredItem { item, score }
        })
        .collect();
    // sort_by is stable
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// Like [`score_search_results`] but returns only the items.
pub fn rank_search_results(items: Vec<Item>, term: &str, fields: &[WeightedField]) -> Vec<Item> {
    score_search_results(items, term, fields)
        .into_iter()
        .map(|s| s.item)
        .collect()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    fn names(items: &[Item]) -> Vec<&str> {
        items
            .iter()
            .map(|i| i.get("name").and_then(Value::as_str).unwrap_or(""))
            .collect()
    }

    fn fields() -> Vec<WeightedField> {
        vec![WeightedField::new("name", 2.0), WeightedField::new("title", 1.0)]
    }

    #[test]
    fn test_rule_precedence_ranking() {
        let items = vec![
            item(json!({ "name": "Bob Lee", "title": "Littlejohn live" })),
            item(json!({ "name": "Jane Smith", "title": "Duets with John" })),
            item(json!({ "name": "Johnny Smith" })),
            item(json!({ "name": "John" })),
        ];
        let scored = score_search_results(items, "john", &fields());
        let scores: Vec<f64> = scored.iter().map(|s| s.score).collect();
        assert_eq!(scores, vec![20.0, 10.0, 3.0, 2.0]);

        let ranked: Vec<Item> = scored.into_iter().map(|s| s.item).collect();
        assert_eq!(
            names(&ranked),
            vec!["John", "Johnny Smith", "Jane Smith", "Bob Lee"]
        );
    }

    #[test]
    fn test_only_first_matching_rule_fires() {
        // "john" is both an exact and a prefix match; only exact counts.
        let it = item(json!({ "name": "JOHN" }));
        assert_eq!(score_item(&it, "John", &[WeightedField::new("name", 1.0)]), 10.0);
    }

    #[test]
    fn test_scores_add_across_fields() {
        let it = item(json!({ "name": "John", "title": "John" }));
        assert_eq!(score_item(&it, "john", &fields()), 30.0);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let items = vec![
            item(json!({ "name": "Kalyani A" })),
            item(json!({ "name": "Kalyani B" })),
            item(json!({ "name": "Other" })),
            item(json!({ "name": "Kalyani C" })),
        ];
        let ranked = rank_search_results(items, "kalyani", &fields());
        assert_eq!(
            names(&ranked),
            vec!["Kalyani A", "Kalyani B", "Kalyani C", "Other"]
        );
    }

    #[test]
    fn test_nested_paths_and_scalars() {
        let it = item(json!({
            "details": { "composer": "Tyagaraja" },
            "year": 1767,
            "tags": ["tyagaraja"]
        }));
        let fields = vec![
            WeightedField::new("details.composer", 1.0),
            WeightedField::new("year", 1.0),
            WeightedField::new("tags", 1.0),
        ];
        assert_eq!(score_item(&it, "tyaga", &fields), 5.0);
        assert_eq!(score_item(&it, "1767", &fields), 10.0);
    }

    #[test]
    fn test_blank_term_scores_zero() {
        let it = item(json!({ "name": "John" }));
        assert_eq!(score_item(&it, "   ", &fields()), 0.0);
    }
}
