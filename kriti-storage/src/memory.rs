//! In-memory table
//!
//! A process-local [`TableStore`] that follows the store's observable
//! semantics closely enough for the rest of the crate to be tested against
//! it:
//!
//! - `Limit` counts items read, so it applies before the filter.
//! - The last-evaluated key carries `PK`, `SK` and, for index queries, the
//!   index key attributes. It is only returned when more key-matching items
//!   remain.
//! - Transactions are all-or-nothing, hold at most 25 operations and may
//!   touch each item once.
//! - Batch writes take at most 25 requests, batch gets at most 100 keys.
//!
//! Test hooks can throttle batch writes, inject failures, and count calls
//! per operation.

use async_trait::async_trait;
use kriti_core::item::{compare_values, ATTR_PK, ATTR_SK};
use kriti_core::{Item, ItemKey, KritiError, KritiResult, SecondaryIndex, StorageError};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::RwLock;

use crate::expression::{apply_projection, CompiledQuery, CompiledScan};
use crate::store::{
    QueryOutput, TableStore, TransactWriteOp, WriteRequest, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_ITEMS, MAX_TRANSACT_ITEMS,
};

// ============================================================================
// CALL COUNTERS
// ============================================================================

#[derive(Debug, Default)]
struct CallCounters {
    get_item: AtomicUsize,
    put_item: AtomicUsize,
    delete_item: AtomicUsize,
    query: AtomicUsize,
    scan: AtomicUsize,
    batch_get: AtomicUsize,
    batch_write: AtomicUsize,
    transact_write: AtomicUsize,
}

impl CallCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn snapshot(&self) -> CallCounts {
        CallCounts {
            get_item: self.get_item.load(AtomicOrdering::Relaxed),
            put_item: self.put_item.load(AtomicOrdering::Relaxed),
            delete_item: self.delete_item.load(AtomicOrdering::Relaxed),
            query: self.query.load(AtomicOrdering::Relaxed),
            scan: self.scan.load(AtomicOrdering::Relaxed),
            batch_get: self.batch_get.load(AtomicOrdering::Relaxed),
            batch_write: self.batch_write.load(AtomicOrdering::Relaxed),
            transact_write: self.transact_write.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Number of store calls per operation since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get_item: usize,
    pub put_item: usize,
    pub delete_item: usize,
    pub query: usize,
    pub scan: usize,
    pub batch_get: usize,
    pub batch_write: usize,
    pub transact_write: usize,
}

impl CallCounts {
    /// Calls of any kind.
    pub fn total(&self) -> usize {
        self.get_item
            + self.put_item
            + self.delete_item
            + self.query
            + self.scan
            + self.batch_get
            + self.batch_write
            + self.transact_write
    }
}

// ============================================================================
// TABLE
// ============================================================================

/// A single table held in memory.
#[derive(Debug, Default)]
pub struct InMemoryTable {
    items: RwLock<BTreeMap<ItemKey, Item>>,
    throttled_batch_writes: AtomicUsize,
    injected_failures: AtomicUsize,
    calls: CallCounters,
}

impl InMemoryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table holding `items`. Items without string keys are skipped.
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let table = Self::new();
        if let Ok(mut map) = table.items.write() {
            for item in items {
                if let Some(key) = ItemKey::from_item(&item) {
                    map.insert(key, item);
                }
            }
        }
        table
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.items.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored item in key order.
    pub fn snapshot(&self) -> Vec<Item> {
        self.items
            .read()
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every item.
    pub fn clear(&self) {
        if let Ok(mut map) = self.items.write() {
            map.clear();
        }
    }

    /// Make the next `calls` batch writes process nothing and hand every
    /// request back as unprocessed.
    pub fn throttle_batch_writes(&self, calls: usize) {
        self.throttled_batch_writes
            .store(calls, AtomicOrdering::SeqCst);
    }

    /// Make the next `calls` store calls of any kind fail.
    pub fn fail_next_calls(&self, calls: usize) {
        self.injected_failures.store(calls, AtomicOrdering::SeqCst);
    }

    /// Call counts per operation.
    pub fn calls(&self) -> CallCounts {
        self.calls.snapshot()
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(AtomicOrdering::SeqCst, AtomicOrdering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok()
    }

    fn injected_failure(&self) -> bool {
        Self::take_one(&self.injected_failures)
    }

    fn read_lock(
        &self,
        operation: &str,
    ) -> KritiResult<std::sync::RwLockReadGuard<'_, BTreeMap<ItemKey, Item>>> {
        self.items
            .read()
            .map_err(|_| KritiError::query(operation, "table lock poisoned"))
    }

    fn write_lock(
        &self,
        operation: &str,
    ) -> KritiResult<std::sync::RwLockWriteGuard<'_, BTreeMap<ItemKey, Item>>> {
        self.items
            .write()
            .map_err(|_| KritiError::write(operation, "table lock poisoned"))
    }
}

fn require_key(item: &Item, operation: &str) -> KritiResult<ItemKey> {
    ItemKey::from_item(item)
        .ok_or_else(|| KritiError::write(operation, "item is missing a string PK or SK"))
}

fn sort_attribute(index: Option<&str>, operation: &str) -> KritiResult<String> {
    match index {
        None => Ok(ATTR_SK.to_string()),
        Some(name) => SecondaryIndex::from_name(name)
            .map(|idx| idx.sort_key().to_string())
            .ok_or_else(|| KritiError::query(operation, format!("unknown index {}", name))),
    }
}

fn index_attributes(index: Option<&str>, operation: &str) -> KritiResult<Option<(String, String)>> {
    match index {
        None => Ok(None),
        Some(name) => SecondaryIndex::from_name(name)
            .map(|idx| Some((idx.partition_key().to_string(), idx.sort_key().to_string())))
            .ok_or_else(|| KritiError::query(operation, format!("unknown index {}", name))),
    }
}

fn string_of<'a>(item: &'a Item, attr: &str) -> &'a str {
    item.get(attr).and_then(Value::as_str).unwrap_or("")
}

/// Order by sort attribute, then by table key for a stable total order.
fn position_order(a: &Item, b: &Item, sort_attr: &str) -> Ordering {
    let by_sort = match (a.get(sort_attr), b.get(sort_attr)) {
        (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    };
    by_sort
        .then_with(|| string_of(a, ATTR_PK).cmp(string_of(b, ATTR_PK)))
        .then_with(|| string_of(a, ATTR_SK).cmp(string_of(b, ATTR_SK)))
}

/// Key attributes recorded in a last-evaluated key.
fn cursor_of(item: &Item, extra: &[&str]) -> Item {
    let mut key = Item::new();
    for attr in [ATTR_PK, ATTR_SK].iter().chain(extra.iter()) {
        if let Some(v) = item.get(*attr) {
            key.insert(attr.to_string(), v.clone());
        }
    }
    key
}

/// Split off one page of `limit` evaluated items; the cursor points at the
/// last evaluated item when more remain.
fn take_page<'a>(
    rest: Vec<&'a Item>,
    limit: Option<usize>,
    cursor_attrs: &[&str],
) -> (Vec<&'a Item>, Option<Item>) {
    let limit = limit.unwrap_or(usize::MAX).max(1);
    if rest.len() > limit {
        let page: Vec<&Item> = rest.into_iter().take(limit).collect();
        let cursor = page.last().map(|last| cursor_of(last, cursor_attrs));
        (page, cursor)
    } else {
        (rest, None)
    }
}

fn finish(page: Vec<&Item>, projection: Option<&Vec<String>>, keep: impl Fn(&Item) -> bool) -> Vec<Item> {
    page.into_iter()
        .filter(|item| keep(*item))
        .map(|item| match projection {
            Some(paths) => apply_projection(item, paths),
            None => item.clone(),
        })
        .collect()
}

#[async_trait]
impl TableStore for InMemoryTable {
    async fn get_item(&self, key: &ItemKey) -> KritiResult<Option<Item>> {
        CallCounters::bump(&self.calls.get_item);
        if self.injected_failure() {
            return Err(KritiError::query("get_item", "injected failure"));
        }
        let map = self.read_lock("get_item")?;
        Ok(map.get(key).cloned())
    }

    async fn put_item(
        &self,
        item: Item,
        condition: Option<crate::store::Condition>,
    ) -> KritiResult<()> {
        CallCounters::bump(&self.calls.put_item);
        if self.injected_failure() {
            return Err(KritiError::write("put_item", "injected failure"));
        }
        let key = require_key(&item, "put_item")?;
        let mut map = self.write_lock("put_item")?;
        if let Some(condition) = condition {
            if !condition.evaluate(map.get(&key)) {
                return Err(StorageError::ConditionFailed {
                    reason: format!("condition on {} not met for {}", condition.attribute(), key),
                }
                .into());
            }
        }
        map.insert(key, item);
        Ok(())
    }

    async fn delete_item(&self, key: &ItemKey) -> KritiResult<()> {
        CallCounters::bump(&self.calls.delete_item);
        if self.injected_failure() {
            return Err(KritiError::delete(key.to_string(), "injected failure"));
        }
        let mut map = self
            .items
            .write()
            .map_err(|_| KritiError::delete(key.to_string(), "table lock poisoned"))?;
        map.remove(key);
        Ok(())
    }

    async fn query(&self, query: &CompiledQuery) -> KritiResult<QueryOutput> {
        CallCounters::bump(&self.calls.query);
        if self.injected_failure() {
            return Err(KritiError::query("query", "injected failure"));
        }
        let index = query.index.as_deref();
        let sort_attr = match &query.key.sort {
            Some((attr, _)) => attr.clone(),
            None => sort_attribute(index, "query")?,
        };
        let index_attrs = index_attributes(index, "query")?;

        let map = self.read_lock("query")?;
        let mut matching: Vec<&Item> = map
            .values()
            .filter(|item| item.get(&query.key.partition_attr) == Some(&query.key.partition_value))
            .filter(|item| match item.get(&sort_attr) {
                // Items without the sort attribute are not in the index.
                None => false,
                Some(v) => match &query.key.sort {
                    Some((_, condition)) => condition.matches(v),
                    None => true,
                },
            })
            .collect();

        matching.sort_by(|a, b| position_order(a, b, &sort_attr));
        if !query.scan_forward {
            matching.reverse();
        }

        if let Some(start) = &query.exclusive_start_key {
            let past = if query.scan_forward {
                Ordering::Greater
            } else {
                Ordering::Less
            };
            matching.retain(|item| position_order(item, start, &sort_attr) == past);
        }

        let cursor_attrs: Vec<&str> = match &index_attrs {
            Some((pk, sk)) => vec![pk.as_str(), sk.as_str()],
            None => Vec::new(),
        };
        let (page, last_evaluated_key) = take_page(matching, query.limit, &cursor_attrs);
        let items = finish(page, query.projection.as_ref(), |item| query.passes_filters(item));

        tracing::trace!(
            partition = %query.key.partition_value,
            index = ?query.index,
            returned = items.len(),
            more = last_evaluated_key.is_some(),
            "In-memory query"
        );
        Ok(QueryOutput::new(items, last_evaluated_key))
    }

    async fn scan(&self, scan: &CompiledScan) -> KritiResult<QueryOutput> {
        CallCounters::bump(&self.calls.scan);
        if self.injected_failure() {
            return Err(KritiError::query("scan", "injected failure"));
        }
        let index_attrs = index_attributes(scan.index.as_deref(), "scan")?;
        let start = scan
            .exclusive_start_key
            .as_ref()
            .and_then(ItemKey::from_item);

        let map = self.read_lock("scan")?;
        let candidates: Vec<&Item> = map
            .iter()
            .filter(|(key, _)| match &start {
                Some(s) => *key > s,
                None => true,
            })
            .filter(|(_, item)| match &index_attrs {
                Some((pk, sk)) => item.contains_key(pk) && item.contains_key(sk),
                None => true,
            })
            .map(|(_, item)| item)
            .collect();

        let cursor_attrs: Vec<&str> = match &index_attrs {
            Some((pk, sk)) => vec![pk.as_str(), sk.as_str()],
            None => Vec::new(),
        };
        let (page, last_evaluated_key) = take_page(candidates, scan.limit, &cursor_attrs);
        let items = finish(page, scan.projection.as_ref(), |item| scan.passes_filters(item));
        Ok(QueryOutput::new(items, last_evaluated_key))
    }

    async fn batch_get(&self, keys: &[ItemKey]) -> KritiResult<Vec<Item>> {
        CallCounters::bump(&self.calls.batch_get);
        if self.injected_failure() {
            return Err(KritiError::query("batch_get", "injected failure"));
        }
        if keys.len() > MAX_BATCH_GET_KEYS {
            return Err(KritiError::query(
                "batch_get",
                format!("{} keys exceeds the limit of {}", keys.len(), MAX_BATCH_GET_KEYS),
            ));
        }
        let map = self.read_lock("batch_get")?;
        Ok(keys.iter().filter_map(|k| map.get(k).cloned()).collect())
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> KritiResult<Vec<WriteRequest>> {
        CallCounters::bump(&self.calls.batch_write);
        if self.injected_failure() {
            return Err(KritiError::write("batch_write", "injected failure"));
        }
        if requests.len() > MAX_BATCH_WRITE_ITEMS {
            return Err(KritiError::write(
                "batch_write",
                format!(
                    "{} requests exceeds the limit of {}",
                    requests.len(),
                    MAX_BATCH_WRITE_ITEMS
                ),
            ));
        }
        if Self::take_one(&self.throttled_batch_writes) {
            return Ok(requests);
        }

        let mut map = self.write_lock("batch_write")?;
        for request in requests {
            match request {
                WriteRequest::Put(item) => {
                    let key = require_key(&item, "batch_write")?;
                    map.insert(key, item);
                }
                WriteRequest::Delete(key) => {
                    map.remove(&key);
                }
            }
        }
        Ok(Vec::new())
    }

    async fn transact_write(&self, ops: Vec<TransactWriteOp>) -> KritiResult<()> {
        CallCounters::bump(&self.calls.transact_write);
        if self.injected_failure() {
            return Err(KritiError::write("transact_write", "injected failure"));
        }
        if ops.len() > MAX_TRANSACT_ITEMS {
            return Err(StorageError::TransactionTooLarge {
                count: ops.len(),
                max: MAX_TRANSACT_ITEMS,
            }
            .into());
        }

        let mut keys = Vec::with_capacity(ops.len());
        let mut seen = HashSet::with_capacity(ops.len());
        for op in &ops {
            let key = op
                .key()
                .ok_or_else(|| KritiError::write("transact_write", "item is missing a string PK or SK"))?;
            if !seen.insert(key.clone()) {
                return Err(KritiError::write(
                    "transact_write",
                    format!("multiple operations on {}", key),
                ));
            }
            keys.push(key);
        }

        let mut map = self.write_lock("transact_write")?;
        for (i, (op, key)) in ops.iter().zip(&keys).enumerate() {
            if let Some(condition) = op.condition() {
                if !condition.evaluate(map.get(key)) {
                    return Err(StorageError::ConditionFailed {
                        reason: format!(
                            "transaction cancelled: operation {} on {} failed its condition on {}",
                            i,
                            key,
                            condition.attribute()
                        ),
                    }
                    .into());
                }
            }
        }

        for (op, key) in ops.into_iter().zip(keys) {
            match op {
                TransactWriteOp::Put { item, .. } => {
                    map.insert(key, item);
                }
                TransactWriteOp::Delete { .. } => {
                    map.remove(&key);
                }
                TransactWriteOp::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
