//! Pagination codec
//!
//! The store hands back its "last evaluated key" as a record of key
//! attributes. Callers only ever see that record as an opaque token: the
//! base64 of its JSON serialisation. An absent token means "first page" on
//! the way in and "no more pages" on the way out.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PaginationError;
use crate::item::Item;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Raw pagination input as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageParams {
    pub limit: Option<i64>,
    pub next_token: Option<String>,
}

impl PageParams {
    pub fn new(limit: Option<i64>, next_token: Option<String>) -> Self {
        Self { limit, next_token }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_next_token(mut self, token: impl Into<String>) -> Self {
        self.next_token = Some(token.into());
        self
    }
}

/// Pagination input after clamping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPage {
    /// Always within `1..=MAX_PAGE_SIZE`
    pub limit: usize,
    pub next_token: Option<String>,
}

/// Clamp the limit into `[1, MAX_PAGE_SIZE]`, defaulting to
/// `DEFAULT_PAGE_SIZE`. The token is passed through untouched.
pub fn normalize_pagination_params(params: &PageParams) -> NormalizedPage {
    let limit = match params.limit {
        None => DEFAULT_PAGE_SIZE,
        Some(n) if n < 1 => 1,
        Some(n) => usize::try_from(n).map_or(MAX_PAGE_SIZE, |n| n.min(MAX_PAGE_SIZE)),
    };
    NormalizedPage {
        limit,
        next_token: params.next_token.clone(),
    }
}

/// Encode a last-evaluated key; `None` in, `None` out.
pub fn create_next_token(last_key: Option<&Item>) -> Option<String> {
    let key = last_key?;
    // Serialising a map of JSON values cannot fail.
    let json = serde_json::to_vec(key).ok()?;
    Some(BASE64.encode(json))
}

/// Decode a token produced by [`create_next_token`].
pub fn parse_next_token(token: &str) -> Result<Item, PaginationError> {
    let bytes = BASE64
        .decode(token.trim())
        .map_err(|e| PaginationError::InvalidToken {
            reason: format!("not base64: {}", e),
        })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| PaginationError::InvalidToken {
        reason: format!("not JSON: {}", e),
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PaginationError::InvalidToken {
            reason: format!("expected a key object, found {}", json_type_name(&other)),
        }),
    }
}

/// Decode an optional token; missing or empty tokens select the first page.
pub fn parse_optional_token(token: Option<&str>) -> Result<Option<Item>, PaginationError> {
    match token {
        None => Ok(None),
        Some(t) if t.trim().is_empty() => Ok(None),
        Some(t) => parse_next_token(t).map(Some),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One page of results.
///
/// `has_more` is true exactly when `next_token` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    /// Bundle a page with the store's last-evaluated key.
    pub fn new(items: Vec<T>, last_key: Option<&Item>) -> Self {
        Self::from_token(items, create_next_token(last_key))
    }

    pub fn from_token(items: Vec<T>, next_token: Option<String>) -> Self {
        Self {
            items,
            has_more: next_token.is_some(),
            next_token,
        }
    }

    pub fn empty() -> Self {
        Self::from_token(Vec::new(), None)
    }

    /// Convert the items, keeping the cursor.
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> PaginatedResponse<U> {
        PaginatedResponse {
            items: self.items.into_iter().map(f).collect(),
            next_token: self.next_token,
            has_more: self.has_more,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(pk: &str, sk: &str) -> Item {
        json!({ "PK": pk, "SK": sk }).as_object().cloned().unwrap()
    }

    #[test]
    fn test_limit_clamping() {
        let max = normalize_pagination_params(&PageParams::default().with_limit(MAX_PAGE_SIZE as i64 + 100));
        assert_eq!(max.limit, MAX_PAGE_SIZE);

        let min = normalize_pagination_params(&PageParams::default().with_limit(-5));
        assert_eq!(min.limit, 1);

        let zero = normalize_pagination_params(&PageParams::default().with_limit(0));
        assert_eq!(zero.limit, 1);

        let default = normalize_pagination_params(&PageParams::default());
        assert_eq!(default.limit, DEFAULT_PAGE_SIZE);

        let exact = normalize_pagination_params(&PageParams::default().with_limit(7));
        assert_eq!(exact.limit, 7);
    }

    #[test]
    fn test_token_passes_through_normalization() {
        let page = normalize_pagination_params(&PageParams::default().with_next_token("abc"));
        assert_eq!(page.next_token.as_deref(), Some("abc"));
    }

    #[test]
    fn test_token_roundtrip() {
        let k = key("ARTIST#a1", "VERSION#v2#2024-01-01T00:00:00.000Z");
        let token = create_next_token(Some(&k)).unwrap();
        assert_eq!(parse_next_token(&token).unwrap(), k);
        assert_eq!(create_next_token(None), None);
    }

    #[test]
    fn test_token_is_base64_json() {
        let k = key("RAGA#r1", "#METADATA");
        let token = create_next_token(Some(&k)).unwrap();
        let decoded = BASE64.decode(&token).unwrap();
        let value: Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value, json!({ "PK": "RAGA#r1", "SK": "#METADATA" }));
    }

    #[test]
    fn test_invalid_tokens_rejected() {
        assert!(matches!(
            parse_next_token("!!! not base64 !!!"),
            Err(PaginationError::InvalidToken { .. })
        ));

        let not_json = BASE64.encode(b"{PK: oops");
        assert!(parse_next_token(&not_json).is_err());

        let array = BASE64.encode(b"[1,2,3]");
        let err = parse_next_token(&array).unwrap_err();
        assert!(err.to_string().contains("array"));
    }

    #[test]
    fn test_optional_token() {
        assert_eq!(parse_optional_token(None).unwrap(), None);
        assert_eq!(parse_optional_token(Some("")).unwrap(), None);
        let k = key("TALA#adi", "#METADATA");
        let token = create_next_token(Some(&k)).unwrap();
        assert_eq!(parse_optional_token(Some(&token)).unwrap(), Some(k));
        assert!(parse_optional_token(Some("%%%")).is_err());
    }

    #[test]
    fn test_has_more_follows_token() {
        let k = key("ARTIST#a1", "#METADATA");
        let page = PaginatedResponse::new(vec![1, 2], Some(&k));
        assert!(page.has_more);
        assert!(page.next_token.is_some());

        // A full page with no cursor is still the end of the stream.
        let last = PaginatedResponse::new(vec![1; DEFAULT_PAGE_SIZE], None);
        assert!(!last.has_more);
        assert!(last.next_token.is_none());
    }

    #[test]
    fn test_response_wire_shape() {
        let page: PaginatedResponse<i32> = PaginatedResponse::empty();
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json, json!({ "items": [], "hasMore": false }));

        let mapped = PaginatedResponse::from_token(vec![1, 2], Some("t".to_string())).map(|n| n * 10);
        assert_eq!(mapped.items, vec![10, 20]);
        assert!(mapped.has_more);
    }
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================
