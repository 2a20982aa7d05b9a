//! KRITI Test Utilities
//!
//! Shared test infrastructure for the Kriti workspace:
//! - Proptest generators for keys, items and pagination input
//! - Item fixtures and a seeded in-memory table
//! - Custom assertions on coded errors
//! - Tracing initialisation for tests

pub use kriti_core::{
    EntityPrefix, ErrorKind, Item, ItemKey, KritiError, KritiResult, ManualClock, PageParams,
    RetryConfig, SecondaryIndex,
};
pub use kriti_storage::{InMemoryTable, TableClient};

use chrono::{TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// TRACING
// ============================================================================

/// Install a test subscriber once; later calls are no-ops. Honours
/// `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Kriti keys and items.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_entity_prefix() -> impl Strategy<Value = EntityPrefix> {
        proptest::sample::select(EntityPrefix::ALL.to_vec())
    }

    pub fn arb_secondary_index() -> impl Strategy<Value = SecondaryIndex> {
        proptest::sample::select(SecondaryIndex::ALL.to_vec())
    }

    /// Id segment without the key separator.
    pub fn arb_id() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9-]{0,23}"
    }

    pub fn arb_item_key() -> impl Strategy<Value = ItemKey> {
        (arb_entity_prefix(), arb_id(), "[A-Z]{1,8}(#[a-z0-9]{1,8})?")
            .prop_map(|(prefix, id, sk)| ItemKey::entity(prefix, &id, sk))
    }

    /// JSON scalars as they appear in stored attributes.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[ -~]{0,24}".prop_map(Value::String),
        ]
    }

    /// An item with a primary key and a few plain attributes.
    pub fn arb_item() -> impl Strategy<Value = Item> {
        (
            arb_item_key(),
            proptest::collection::btree_map("[a-z]{1,10}", arb_scalar(), 0..6),
        )
            .prop_map(|(key, attrs)| {
                let mut item = key.to_item();
                for (name, value) in attrs {
                    item.entry(name).or_insert(value);
                }
                item
            })
    }

    pub fn arb_page_params() -> impl Strategy<Value = PageParams> {
        (proptest::option::of(-50i64..500), Just(None))
            .prop_map(|(limit, token)| PageParams::new(limit, token))
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built items and tables for common scenarios.

    use super::*;
    use serde_json::json;

    /// Object literal to [`Item`].
    #[track_caller]
    pub fn item(value: Value) -> Item {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture item must be a JSON object, got {}", other),
        }
    }

    /// A clock pinned at 2024-01-15T09:30:00Z.
    pub fn fixed_clock() -> Arc<ManualClock> {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 15, 9, 30, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Arc::new(ManualClock::new(start))
    }

    /// Retry settings that keep tests fast.
    pub fn fast_retry() -> RetryConfig {
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(4))
    }

    pub fn raga(id: &str, name: &str, melakarta: Option<u32>) -> Item {
        let mut raga = item(json!({
            "PK": format!("RAGA#{}", id),
            "SK": "#METADATA",
            "id": id,
            "entityType": "RAGA",
            "name": name,
            "GSI1PK": "RAGA",
            "GSI1SK": format!("NAME#{}", name.to_lowercase()),
        }));
        if let Some(number) = melakarta {
            raga.insert("melakarta".to_string(), json!(number));
        }
        raga
    }

    pub fn artist(id: &str, name: &str, tradition: &str) -> Item {
        item(json!({
            "PK": format!("ARTIST#{}", id),
            "SK": "#METADATA",
            "id": id,
            "entityType": "ARTIST",
            "name": name,
            "tradition": tradition,
            "GSI1PK": format!("TRADITION#{}", tradition),
            "GSI1SK": format!("ARTIST#{}", id),
        }))
    }

    pub fn event(id: &str, title: &str, status: &str, date: &str) -> Item {
        item(json!({
            "PK": format!("EVENT#{}", id),
            "SK": "#METADATA",
            "id": id,
            "entityType": "EVENT",
            "title": title,
            "status": status,
            "date": date,
            "GSI2PK": format!("STATUS#{}", status),
            "GSI2SK": format!("DATE#{}", date),
        }))
    }

    /// Three ragas, three artists across two traditions, three events.
    pub fn catalog() -> Vec<Item> {
        vec![
            raga("kalyani", "Kalyani", Some(65)),
            raga("mohanam", "Mohanam", None),
            raga("todi", "Hanumatodi", Some(8)),
            artist("a1", "M. S. Subbulakshmi", "carnatic"),
            artist("a2", "Semmangudi Srinivasa Iyer", "carnatic"),
            artist("a3", "Bhimsen Joshi", "hindustani"),
            event("e1", "Margazhi Opening", "scheduled", "2024-12-15T18:00:00Z"),
            event("e2", "Tyagaraja Aradhana", "scheduled", "2025-01-18T06:00:00Z"),
            event("e3", "Navaratri Series", "completed", "2024-10-05T18:30:00Z"),
        ]
    }

    pub fn seeded_table() -> Arc<InMemoryTable> {
        Arc::new(InMemoryTable::with_items(catalog()))
    }

    /// A client over [`seeded_table`] with [`fast_retry`].
    pub fn seeded_client() -> TableClient<InMemoryTable> {
        TableClient::new(seeded_table()).with_retry(fast_retry())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on coded errors.

    use super::*;

    #[track_caller]
    pub fn assert_error_kind<T: std::fmt::Debug>(result: &KritiResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "unexpected error kind for {:?}", e),
            Ok(value) => panic!("Expected {} error, got Ok({:?})", kind, value),
        }
    }

    /// Assert that items carry exactly these `PK` values, in order.
    #[track_caller]
    pub fn assert_partition_keys(items: &[Item], expected: &[&str]) {
        let actual: Vec<&str> = items
            .iter()
            .map(|item| item.get("PK").and_then(Value::as_str).unwrap_or("<missing>"))
            .collect();
        assert_eq!(actual, expected);
    }
}
