//! KRITI Core - Single-table schema and pure access-layer logic
//!
//! Everything in this crate is free of I/O: key formatting, item helpers,
//! filter evaluation, the pagination codec, relevance scoring, clocks and
//! configuration. `kriti-storage` builds the store-facing layer on top.

use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod item;
pub mod keys;
pub mod pagination;
pub mod relevance;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, RetryConfig, StoreConfig};
pub use error::{
    ConfigError, ErrorKind, KritiError, KritiResult, PaginationError, StorageError,
    ValidationError, VersionError,
};
pub use filter::{FilterExpr, FilterOperator};
pub use item::Item;
pub use keys::{
    extract_id_from_key, format_index_key, format_key, format_version_key, EntityPrefix, ItemKey,
    SecondaryIndex,
};
pub use pagination::{
    create_next_token, normalize_pagination_params, parse_next_token, parse_optional_token,
    NormalizedPage, PageParams, PaginatedResponse, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
pub use relevance::{rank_search_results, score_search_results, ScoredItem, WeightedField};

/// Entity identifier. UUIDv7 so ids sort by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 entity id.
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Render a timestamp the way it is embedded in sort keys
/// (`2024-03-01T10:15:30.123Z`). Millisecond precision keeps the
/// lexicographic order equal to the chronological one.
pub fn format_timestamp(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_entity_id_is_v7() {
        let id = new_entity_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_format_timestamp_sorts_chronologically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let b = a + chrono::Duration::milliseconds(7);
        assert_eq!(format_timestamp(a), "2024-01-02T03:04:05.000Z");
        assert!(format_timestamp(a) < format_timestamp(b));
    }
}
