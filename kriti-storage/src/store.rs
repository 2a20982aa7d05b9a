//! Store abstraction
//!
//! [`TableStore`] is the narrow surface this layer needs from a wide-column
//! store: point reads and writes, partition queries, scans, batch reads and
//! writes, and all-or-nothing transactions. Implementations wrap every
//! failure into a typed [`KritiError`](kriti_core::KritiError) and never
//! retry on their own.

use async_trait::async_trait;
use kriti_core::item::{get_path, ATTR_PK};
use kriti_core::{Item, ItemKey, KritiResult};
use serde_json::Value;

use crate::expression::{CompiledQuery, CompiledScan};

/// Most operations allowed in one transaction.
pub const MAX_TRANSACT_ITEMS: usize = 25;

/// Most put/delete requests in one batch write.
pub const MAX_BATCH_WRITE_ITEMS: usize = 25;

/// Most keys in one batch get.
pub const MAX_BATCH_GET_KEYS: usize = 100;

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Condition attached to a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// The attribute must be absent on the stored item (or no item exists)
    AttributeNotExists(String),
    /// The attribute must be present on the stored item
    AttributeExists(String),
    /// The stored attribute must equal the value
    AttributeEquals(String, Value),
}

impl Condition {
    /// Condition that the item does not exist yet.
    pub fn item_not_exists() -> Self {
        Condition::AttributeNotExists(ATTR_PK.to_string())
    }

    /// Evaluate against the currently stored item.
    pub fn evaluate(&self, existing: Option<&Item>) -> bool {
        match self {
            Condition::AttributeNotExists(path) => {
                existing.and_then(|item| get_path(item, path)).is_none()
            }
            Condition::AttributeExists(path) => {
                existing.and_then(|item| get_path(item, path)).is_some()
            }
            Condition::AttributeEquals(path, expected) => {
                existing.and_then(|item| get_path(item, path)) == Some(expected)
            }
        }
    }

    /// The attribute path the condition inspects.
    pub fn attribute(&self) -> &str {
        match self {
            Condition::AttributeNotExists(a)
            | Condition::AttributeExists(a)
            | Condition::AttributeEquals(a, _) => a,
        }
    }
}

/// One request of a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put(Item),
    Delete(ItemKey),
}

impl WriteRequest {
    pub fn key(&self) -> Option<ItemKey> {
        match self {
            WriteRequest::Put(item) => ItemKey::from_item(item),
            WriteRequest::Delete(key) => Some(key.clone()),
        }
    }
}

/// One operation of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactWriteOp {
    Put {
        item: Item,
        condition: Option<Condition>,
    },
    Delete {
        key: ItemKey,
        condition: Option<Condition>,
    },
    /// Assert a condition on an item without writing it
    ConditionCheck { key: ItemKey, condition: Condition },
}

impl TransactWriteOp {
    pub fn put(item: Item) -> Self {
        TransactWriteOp::Put {
            item,
            condition: None,
        }
    }

    pub fn put_if(item: Item, condition: Condition) -> Self {
        TransactWriteOp::Put {
            item,
            condition: Some(condition),
        }
    }

    pub fn delete(key: ItemKey) -> Self {
        TransactWriteOp::Delete {
            key,
            condition: None,
        }
    }

    /// Key of the item the operation touches.
    pub fn key(&self) -> Option<ItemKey> {
        match self {
            TransactWriteOp::Put { item, .. } => ItemKey::from_item(item),
            TransactWriteOp::Delete { key, .. } | TransactWriteOp::ConditionCheck { key, .. } => {
                Some(key.clone())
            }
        }
    }

    pub fn condition(&self) -> Option<&Condition> {
        match self {
            TransactWriteOp::Put { condition, .. } | TransactWriteOp::Delete { condition, .. } => {
                condition.as_ref()
            }
            TransactWriteOp::ConditionCheck { condition, .. } => Some(condition),
        }
    }
}

/// Items of one query or scan page plus the store-native cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    /// Present exactly when more items may follow
    pub last_evaluated_key: Option<Item>,
}

impl QueryOutput {
    pub fn new(items: Vec<Item>, last_evaluated_key: Option<Item>) -> Self {
        Self {
            items,
            last_evaluated_key,
        }
    }

    pub fn has_more(&self) -> bool {
        self.last_evaluated_key.is_some()
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Async access to the single physical table.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Point read; `Ok(None)` when absent.
    async fn get_item(&self, key: &ItemKey) -> KritiResult<Option<Item>>;

    /// Insert or replace an item, optionally guarded by a condition.
    async fn put_item(&self, item: Item, condition: Option<Condition>) -> KritiResult<()>;

    /// Delete an item. Deleting an absent item succeeds.
    async fn delete_item(&self, key: &ItemKey) -> KritiResult<()>;

    /// One page of a partition query.
    async fn query(&self, query: &CompiledQuery) -> KritiResult<QueryOutput>;

    /// One page of a full-table (or index) scan.
    async fn scan(&self, scan: &CompiledScan) -> KritiResult<QueryOutput>;

    /// Read up to `MAX_BATCH_GET_KEYS` items. Missing keys are omitted and
    /// the order of the result is unspecified.
    async fn batch_get(&self, keys: &[ItemKey]) -> KritiResult<Vec<Item>>;

    /// Apply up to `MAX_BATCH_WRITE_ITEMS` requests. Returns the requests
    /// the store did not process (throttling); the caller retries them.
    async fn batch_write(&self, requests: Vec<WriteRequest>) -> KritiResult<Vec<WriteRequest>>;

    /// Apply up to `MAX_TRANSACT_ITEMS` operations atomically.
    async fn transact_write(&self, ops: Vec<TransactWriteOp>) -> KritiResult<()>;
}
