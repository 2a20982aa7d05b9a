//! Property tests for opaque-token pagination
//!
//! Walking every page of a query with the returned token must visit each
//! matching item exactly once, in sort-key order, and the last page must
//! carry no token.

use kriti_core::{PageParams, MAX_PAGE_SIZE};
use kriti_storage::{InMemoryTable, QueryBuilder};
use kriti_test_utils::assertions::assert_error_kind;
use kriti_test_utils::fixtures::{item, seeded_table};
use kriti_test_utils::{init_tracing, ErrorKind};
use proptest::prelude::*;
use serde_json::json;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    Runtime::new().unwrap()
}

fn recordings(count: usize) -> InMemoryTable {
    InMemoryTable::with_items((0..count).map(|i| {
        item(json!({
            "PK": "ARTIST#a1",
            "SK": format!("RECORDING#{:04}", i),
            "title": format!("Recording {}", i),
            "year": 1950 + (i % 40),
        }))
    }))
}

fn recordings_query() -> QueryBuilder {
    QueryBuilder::new()
        .with_partition_key("PK", "ARTIST#a1")
        .with_sort_key_begins_with("SK", "RECORDING#")
}

#[tokio::test]
async fn test_two_of_three_then_last_page() {
    init_tracing();
    let table = seeded_table();
    let ragas = QueryBuilder::new()
        .with_index("GSI1")
        .with_partition_key("GSI1PK", "RAGA");

    let first = ragas
        .execute_paginated(&*table, &PageParams::default().with_limit(2))
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.items[0]["name"], json!("Hanumatodi"));
    assert_eq!(first.items[1]["name"], json!("Kalyani"));
    let token = first.next_token.clone().unwrap();

    let second = ragas
        .execute_paginated(&*table, &PageParams::default().with_limit(2).with_next_token(token))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0]["name"], json!("Mohanam"));
    assert!(!second.has_more);
    assert!(second.next_token.is_none());
}

#[tokio::test]
async fn test_empty_token_means_first_page() {
    let table = recordings(5);
    let page = recordings_query()
        .execute_paginated(&table, &PageParams::default().with_next_token(""))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 5);
    assert!(page.next_token.is_none());
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let table = recordings(5);
    let result = recordings_query()
        .execute_paginated(&table, &PageParams::default().with_next_token("%%%not-base64"))
        .await;
    assert_error_kind(&result, ErrorKind::PaginationTokenInvalid);
    assert_eq!(table.calls().query, 0);
}

#[tokio::test]
async fn test_limit_is_clamped() {
    let table = recordings(MAX_PAGE_SIZE + 10);
    let page = recordings_query()
        .execute_paginated(&table, &PageParams::default().with_limit(10_000))
        .await
        .unwrap();
    assert_eq!(page.items.len(), MAX_PAGE_SIZE);
    assert!(page.has_more);

    let page = recordings_query()
        .execute_paginated(&table, &PageParams::default().with_limit(-3))
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_paging_visits_every_item_once(count in 0usize..60, page_size in 1i64..25) {
        let rt = runtime();
        let table = recordings(count);

        let mut seen: Vec<String> = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let params = PageParams::new(Some(page_size), token.clone());
            let page = rt
                .block_on(recordings_query().execute_paginated(&table, &params))
                .unwrap();
            prop_assert!(page.items.len() <= page_size as usize);
            seen.extend(
                page.items
                    .iter()
                    .map(|i| i["SK"].as_str().unwrap_or_default().to_string()),
            );
            pages += 1;
            prop_assert!(pages <= count + 1);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let expected: Vec<String> = (0..count).map(|i| format!("RECORDING#{:04}", i)).collect();
        prop_assert_eq!(seen, expected);
    }
}
