//! Access-pattern helpers
//!
//! [`TableClient`] turns the recurring single-table access patterns into
//! one call each: point reads, partition enumeration, index lookups,
//! date-bounded ranges, related-item transactions and batch operations.
//! Point reads report absence as `None`; range reads report it as an empty
//! page. Every other failure comes back as a typed error carrying the
//! operation name and cause.

use kriti_core::keys::{format_index_key, format_key, HIGH_SENTINEL, METADATA_SORT_KEY};
use kriti_core::relevance::{score_search_results, WeightedField};
use kriti_core::{
    EntityPrefix, FilterExpr, Item, ItemKey, KritiError, KritiResult, RetryConfig,
    SecondaryIndex, StorageError,
};
use std::sync::Arc;

use kriti_core::item::{ATTR_PK, ATTR_SK};

use crate::batch::{get_in_chunks, write_in_chunks};
use crate::query::{QueryBuilder, ScanBuilder};
use crate::store::{QueryOutput, TableStore, TransactWriteOp, WriteRequest, MAX_TRANSACT_ITEMS};

// ============================================================================
// OPTIONS
// ============================================================================

/// Sort key restriction for range reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKeyRange {
    Equals(String),
    Prefix(String),
    /// Inclusive on both ends
    Between(String, String),
}

/// Options shared by the partition and index range reads.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Sort key attribute; defaults to `SK` or the index's sort key
    pub sort_key_name: Option<String>,
    pub sort_key: Option<SortKeyRange>,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Item>,
    pub scan_index_forward: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            sort_key_name: None,
            sort_key: None,
            limit: None,
            exclusive_start_key: None,
            scan_index_forward: true,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort_key_name(mut self, name: impl Into<String>) -> Self {
        self.sort_key_name = Some(name.into());
        self
    }

    pub fn with_sort_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_key = Some(SortKeyRange::Prefix(prefix.into()));
        self
    }

    pub fn with_sort_key_value(mut self, value: impl Into<String>) -> Self {
        self.sort_key = Some(SortKeyRange::Equals(value.into()));
        self
    }

    pub fn with_sort_key_between(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.sort_key = Some(SortKeyRange::Between(start.into(), end.into()));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_start_key(mut self, cursor: Option<Item>) -> Self {
        self.exclusive_start_key = cursor;
        self
    }

    pub fn with_scan_index_forward(mut self, forward: bool) -> Self {
        self.scan_index_forward = forward;
        self
    }

    fn apply(&self, mut builder: QueryBuilder, default_sort_key: &str) -> QueryBuilder {
        let sort_name = self
            .sort_key_name
            .clone()
            .unwrap_or_else(|| default_sort_key.to_string());
        builder = match &self.sort_key {
            Some(SortKeyRange::Equals(v)) => builder.with_sort_key(sort_name, v.as_str()),
            Some(SortKeyRange::Prefix(p)) => builder.with_sort_key_begins_with(sort_name, p.as_str()),
            Some(SortKeyRange::Between(s, e)) => {
                builder.with_sort_key_between(sort_name, s.as_str(), e.as_str())
            }
            None => builder,
        };
        if let Some(limit) = self.limit {
            builder = builder.with_limit(limit);
        }
        builder
            .with_start_key(self.exclusive_start_key.clone())
            .with_sort_order(self.scan_index_forward)
    }
}

/// Inclusive date bounds. The end bound is padded so every key of the end
/// day (or any key extending the end value) is included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Sort key bounds under `prefix`.
    pub fn bounds(&self, prefix: &str) -> (String, String) {
        let low = format_index_key(prefix, &self.start);
        let mut high = format_index_key(prefix, &self.end);
        high.push(HIGH_SENTINEL);
        (low, high)
    }
}

/// A relevance-ranked text search over scanned candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub term: String,
    pub fields: Vec<WeightedField>,
    /// Store-side filters narrowing the candidates (e.g. an entity type)
    pub filters: Vec<FilterExpr>,
    pub limit: Option<usize>,
}

impl SearchRequest {
    pub fn new(term: impl Into<String>, fields: Vec<WeightedField>) -> Self {
        Self {
            term: term.into(),
            fields,
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Access-pattern client over one store.
#[derive(Debug)]
pub struct TableClient<S: ?Sized> {
    store: Arc<S>,
    retry: RetryConfig,
}

impl<S: ?Sized> Clone for TableClient<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
        }
    }
}

impl<S: TableStore + ?Sized> TableClient<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryConfig::default(),
        }
    }

    /// Override the batch-write retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    // ------------------------------------------------------------------------
    // Point reads
    // ------------------------------------------------------------------------

    /// Read one entity record; `sort_key` defaults to `#METADATA`.
    pub async fn get_by_primary_key(
        &self,
        prefix: EntityPrefix,
        id: &str,
        sort_key: Option<&str>,
    ) -> KritiResult<Option<Item>> {
        let key = ItemKey::entity(prefix, id, sort_key.unwrap_or(METADATA_SORT_KEY));
        self.get_item(&key).await
    }

    /// Read one item by its full key.
    pub async fn get_item(&self, key: &ItemKey) -> KritiResult<Option<Item>> {
        tracing::debug!(key = %key, "Get item");
        self.store.get_item(key).await
    }

    /// Whether an item exists.
    pub async fn item_exists(&self, key: &ItemKey) -> KritiResult<bool> {
        Ok(self.store.get_item(key).await?.is_some())
    }

    // ------------------------------------------------------------------------
    // Range reads
    // ------------------------------------------------------------------------

    /// Enumerate one entity partition.
    pub async fn get_all_by_partition_key(
        &self,
        prefix: EntityPrefix,
        id: &str,
        options: &QueryOptions,
    ) -> KritiResult<QueryOutput> {
        let builder = QueryBuilder::new().with_partition_key(ATTR_PK, format_key(prefix, id));
        options.apply(builder, ATTR_SK).execute(&*self.store).await
    }

    /// Read through a secondary index.
    pub async fn get_by_global_index(
        &self,
        index_name: &str,
        partition_key_name: &str,
        partition_key_value: &str,
        options: &QueryOptions,
    ) -> KritiResult<QueryOutput> {
        let default_sort = SecondaryIndex::from_name(index_name)
            .map(|idx| idx.sort_key())
            .unwrap_or(ATTR_SK);
        let builder = QueryBuilder::new()
            .with_index(index_name)
            .with_partition_key(partition_key_name, partition_key_value);
        options.apply(builder, default_sort).execute(&*self.store).await
    }

    /// Items of one status within a date range, via an index whose partition
    /// key is `STATUSPREFIX#status` and sort key `DATEPREFIX#date...`.
    pub async fn get_by_status_and_date_range(
        &self,
        index: SecondaryIndex,
        status_prefix: &str,
        status_value: &str,
        date_prefix: &str,
        range: &DateRange,
    ) -> KritiResult<QueryOutput> {
        let (low, high) = range.bounds(date_prefix);
        QueryBuilder::new()
            .with_index(index.name())
            .with_partition_key(index.partition_key(), format_index_key(status_prefix, status_value))
            .with_sort_key_between(index.sort_key(), low, high)
            .execute(&*self.store)
            .await
    }

    /// Date-bounded items of one entity partition, ascending.
    pub async fn get_by_date_range(
        &self,
        prefix: EntityPrefix,
        id: &str,
        sort_key_prefix: &str,
        range: &DateRange,
    ) -> KritiResult<QueryOutput> {
        let (low, high) = range.bounds(sort_key_prefix);
        QueryBuilder::new()
            .with_partition_key(ATTR_PK, format_key(prefix, id))
            .with_sort_key_between(ATTR_SK, low, high)
            .with_sort_order(true)
            .execute(&*self.store)
            .await
    }

    /// Every item a query matches, following cursors.
    pub async fn query_all(&self, builder: &QueryBuilder) -> KritiResult<Vec<Item>> {
        builder.execute_all(&*self.store).await
    }

    /// Every item a scan matches, following cursors.
    pub async fn scan_all(&self, builder: &ScanBuilder) -> KritiResult<Vec<Item>> {
        builder.execute_all(&*self.store).await
    }

    /// Scan candidates and rank them by relevance. Items scoring zero are
    /// dropped.
    pub async fn search(&self, request: &SearchRequest) -> KritiResult<Vec<Item>> {
        let mut scan = ScanBuilder::new();
        for filter in &request.filters {
            scan = scan.with_filter_expr(filter.clone());
        }
        let candidates = scan.execute_all(&*self.store).await?;
        let candidate_count = candidates.len();

        let mut ranked: Vec<Item> = score_search_results(candidates, &request.term, &request.fields)
            .into_iter()
            .filter(|s| s.score > 0.0)
            .map(|s| s.item)
            .collect();
        if let Some(limit) = request.limit {
            ranked.truncate(limit);
        }
        tracing::debug!(
            term = %request.term,
            candidates = candidate_count,
            matched = ranked.len(),
            "Search ranked"
        );
        Ok(ranked)
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    pub async fn put_item(&self, item: Item) -> KritiResult<()> {
        self.store.put_item(item, None).await
    }

    /// Delete one item; failures surface as `DELETE_ERROR`.
    pub async fn delete_item(&self, key: &ItemKey) -> KritiResult<()> {
        self.store.delete_item(key).await.map_err(|e| match e {
            KritiError::Storage(StorageError::DeleteFailed { .. }) => e,
            other => KritiError::delete(key.to_string(), other),
        })
    }

    /// Apply operations as one transaction. More than `MAX_TRANSACT_ITEMS`
    /// operations are rejected before the store is called.
    pub async fn transact_write(&self, ops: Vec<TransactWriteOp>) -> KritiResult<()> {
        if ops.len() > MAX_TRANSACT_ITEMS {
            tracing::warn!(
                count = ops.len(),
                max = MAX_TRANSACT_ITEMS,
                "Transaction rejected before submission"
            );
            return Err(StorageError::TransactionTooLarge {
                count: ops.len(),
                max: MAX_TRANSACT_ITEMS,
            }
            .into());
        }
        tracing::debug!(ops = ops.len(), "Transact write");
        self.store.transact_write(ops).await
    }

    /// Write a primary item and its related items atomically.
    pub async fn create_related_items(&self, primary: Item, related: Vec<Item>) -> KritiResult<()> {
        let ops: Vec<TransactWriteOp> = std::iter::once(primary)
            .chain(related)
            .map(TransactWriteOp::put)
            .collect();
        self.transact_write(ops).await
    }

    /// Put many items in sequential 25-item chunks with retry.
    pub async fn put_many(&self, items: Vec<Item>) -> KritiResult<()> {
        let requests = items.into_iter().map(WriteRequest::Put).collect();
        write_in_chunks(&*self.store, requests, &self.retry).await
    }

    /// Delete many items in sequential 25-item chunks with retry.
    pub async fn delete_many(&self, keys: Vec<ItemKey>) -> KritiResult<()> {
        let requests = keys.into_iter().map(WriteRequest::Delete).collect();
        write_in_chunks(&*self.store, requests, &self.retry)
            .await
            .map_err(|e| match e {
                KritiError::Storage(StorageError::RetriesExhausted { .. }) => e,
                other => KritiError::delete("batch", other),
            })
    }

    /// Read many items in 100-key chunks, in the order of `keys`.
    pub async fn get_many(&self, keys: &[ItemKey]) -> KritiResult<Vec<Item>> {
        get_in_chunks(&*self.store, keys).await
    }
}

// =============================================================================
// TESTS
// =============================================================================
