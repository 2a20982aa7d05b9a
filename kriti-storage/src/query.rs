//! Immutable query and scan builders
//!
//! Every `with_*` call consumes the builder and returns a new one, so a
//! partially configured builder can be cloned and specialised without
//! shared mutable state:
//!
//! ```ignore
//! let base = QueryBuilder::new()
//!     .with_index("GSI1")
//!     .with_partition_key("GSI1PK", "TRADITION#carnatic");
//! let recent = base.clone().with_sort_order(false).with_limit(10);
//! let page = recent.execute(&store).await?;
//! ```

use kriti_core::pagination::{normalize_pagination_params, parse_optional_token};
use kriti_core::{
    FilterExpr, FilterOperator, Item, KritiError, KritiResult, PageParams, PaginatedResponse,
    StorageError,
};
use serde_json::Value;

use crate::expression::{CompiledQuery, CompiledScan, KeyCondition, SortKeyCondition};
use crate::store::{QueryOutput, TableStore};

// ============================================================================
// QUERY BUILDER
// ============================================================================

/// Accumulates a partition query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    partition: Option<(String, Value)>,
    sort: Option<(String, SortKeyCondition)>,
    filters: Vec<FilterExpr>,
    index: Option<String>,
    limit: Option<usize>,
    scan_forward: bool,
    start_key: Option<Item>,
    projection: Option<Vec<String>>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self {
            partition: None,
            sort: None,
            filters: Vec::new(),
            index: None,
            limit: None,
            scan_forward: true,
            start_key: None,
            projection: None,
        }
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition key equality. Required before execution.
    pub fn with_partition_key(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.partition = Some((attribute.into(), value.into()));
        self
    }

    /// Sort key equality.
    pub fn with_sort_key(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.sort = Some((attribute.into(), SortKeyCondition::Equals(value.into())));
        self
    }

    pub fn with_sort_key_begins_with(
        mut self,
        attribute: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.sort = Some((attribute.into(), SortKeyCondition::BeginsWith(prefix.into())));
        self
    }

    /// Inclusive sort key range.
    pub fn with_sort_key_between(
        mut self,
        attribute: impl Into<String>,
        start: impl Into<Value>,
        end: impl Into<Value>,
    ) -> Self {
        self.sort = Some((
            attribute.into(),
            SortKeyCondition::Between(start.into(), end.into()),
        ));
        self
    }

    /// Post-read filter; does not reduce the items read.
    pub fn with_filter(
        mut self,
        attribute: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.filters
            .push(FilterExpr::new(attribute, operator, value));
        self
    }

    pub fn with_filter_expr(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    /// `true` for ascending sort key order (the default).
    pub fn with_sort_order(mut self, ascending: bool) -> Self {
        self.scan_forward = ascending;
        self
    }

    /// Resume after a store-native cursor. `None` starts from the beginning.
    pub fn with_start_key(mut self, cursor: Option<Item>) -> Self {
        self.start_key = cursor;
        self
    }

    /// Restrict returned attributes. `PK` and `SK` are always included.
    pub fn with_projection<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Compile into an executable descriptor.
    ///
    /// Fails with `NoKeyCondition` when no partition key was given.
    pub fn build(&self) -> KritiResult<CompiledQuery> {
        let (partition_attr, partition_value) = self
            .partition
            .clone()
            .ok_or(KritiError::Storage(StorageError::NoKeyCondition))?;
        CompiledQuery::new(
            self.index.clone(),
            KeyCondition {
                partition_attr,
                partition_value,
                sort: self.sort.clone(),
            },
            self.filters.clone(),
            self.limit,
            self.scan_forward,
            self.start_key.clone(),
            self.projection.clone(),
        )
    }

    /// Run one page.
    pub async fn execute<S: TableStore + ?Sized>(&self, store: &S) -> KritiResult<QueryOutput> {
        let query = self.build()?;
        tracing::debug!(
            key_condition = %query.key_condition_expression,
            filter = ?query.filter_expression,
            index = ?query.index,
            limit = ?query.limit,
            "Executing query"
        );
        store.query(&query).await
    }

    /// Run one page with opaque-token pagination. The page size comes from
    /// `params`, clamped; an empty or missing token selects the first page.
    pub async fn execute_paginated<S: TableStore + ?Sized>(
        &self,
        store: &S,
        params: &PageParams,
    ) -> KritiResult<PaginatedResponse<Item>> {
        let page = normalize_pagination_params(params);
        let start = parse_optional_token(page.next_token.as_deref())?;
        let output = self
            .clone()
            .with_limit(page.limit)
            .with_start_key(start)
            .execute(store)
            .await?;
        Ok(PaginatedResponse::new(
            output.items,
            output.last_evaluated_key.as_ref(),
        ))
    }

    /// Follow cursors until the partition is exhausted.
    pub async fn execute_all<S: TableStore + ?Sized>(&self, store: &S) -> KritiResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut builder = self.clone();
        loop {
            let output = builder.execute(store).await?;
            items.extend(output.items);
            match output.last_evaluated_key {
                Some(cursor) => builder = builder.with_start_key(Some(cursor)),
                None => break,
            }
        }
        Ok(items)
    }
}

// ============================================================================
// SCAN BUILDER
// ============================================================================

/// Accumulates a scan over the whole table or one index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanBuilder {
    filters: Vec<FilterExpr>,
    index: Option<String>,
    limit: Option<usize>,
    start_key: Option<Item>,
    projection: Option<Vec<String>>,
}

impl ScanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(
        mut self,
        attribute: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<Value>,
    ) -> Self {
        self.filters
            .push(FilterExpr::new(attribute, operator, value));
        self
    }

    pub fn with_filter_expr(mut self, filter: FilterExpr) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit.max(1));
        self
    }

    pub fn with_start_key(mut self, cursor: Option<Item>) -> Self {
        self.start_key = cursor;
        self
    }

    pub fn with_projection<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(&self) -> KritiResult<CompiledScan> {
        CompiledScan::new(
            self.index.clone(),
            self.filters.clone(),
            self.limit,
            self.start_key.clone(),
            self.projection.clone(),
        )
    }

    pub async fn execute<S: TableStore + ?Sized>(&self, store: &S) -> KritiResult<QueryOutput> {
        let scan = self.build()?;
        tracing::debug!(
            filter = ?scan.filter_expression,
            index = ?scan.index,
            limit = ?scan.limit,
            "Executing scan"
        );
        store.scan(&scan).await
    }

    pub async fn execute_paginated<S: TableStore + ?Sized>(
        &self,
        store: &S,
        params: &PageParams,
    ) -> KritiResult<PaginatedResponse<Item>> {
        let page = normalize_pagination_params(params);
        let start = parse_optional_token(page.next_token.as_deref())?;
        let output = self
            .clone()
            .with_limit(page.limit)
            .with_start_key(start)
            .execute(store)
            .await?;
        Ok(PaginatedResponse::new(
            output.items,
            output.last_evaluated_key.as_ref(),
        ))
    }

    pub async fn execute_all<S: TableStore + ?Sized>(&self, store: &S) -> KritiResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut builder = self.clone();
        loop {
            let output = builder.execute(store).await?;
            items.extend(output.items);
            match output.last_evaluated_key {
                Some(cursor) => builder = builder.with_start_key(Some(cursor)),
                None => break,
            }
        }
        Ok(items)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryTable;
    use kriti_core::{ErrorKind, PaginationError};
    use serde_json::json;

    fn item(value: Value) -> Item {
        value.as_object().cloned().unwrap()
    }

    fn table() -> InMemoryTable {
        InMemoryTable::with_items(vec![
            item(json!({ "PK": "ARTIST#a1", "SK": "#METADATA", "name": "Semmangudi" })),
            item(json!({ "PK": "ARTIST#a1", "SK": "CONCERT#2024-01-05", "venue": "Music Academy" })),
            item(json!({ "PK": "ARTIST#a1", "SK": "CONCERT#2024-02-11", "venue": "Narada Gana Sabha" })),
            item(json!({ "PK": "ARTIST#a2", "SK": "#METADATA", "name": "Lalgudi" })),
        ])
    }

    #[test]
    fn test_build_without_partition_fails() {
        let err = QueryBuilder::new()
            .with_sort_key("SK", "#METADATA")
            .build()
            .unwrap_err();
        assert_eq!(err, KritiError::Storage(StorageError::NoKeyCondition));
        assert_eq!(err.kind(), ErrorKind::QueryError);
    }

    #[test]
    fn test_builders_are_independent_values() {
        let base = QueryBuilder::new().with_partition_key("PK", "ARTIST#a1");
        let limited = base.clone().with_limit(5);
        assert_eq!(base.limit(), None);
        assert_eq!(limited.limit(), Some(5));
        assert_ne!(base, limited);
    }

    #[test]
    fn test_compiled_expressions() {
        let query = QueryBuilder::new()
            .with_index("GSI1")
            .with_partition_key("GSI1PK", "TRADITION#carnatic")
            .with_sort_key_begins_with("GSI1SK", "NAME#s")
            .with_filter("status", FilterOperator::Eq, "published")
            .with_projection(["name", "details.era"])
            .build()
            .unwrap();
        assert_eq!(query.key_condition_expression, "#n0 = :v0 AND begins_with(#n1, :v1)");
        assert_eq!(query.filter_expression.as_deref(), Some("#n2 = :v2"));
        assert_eq!(
            query.projection_expression.as_deref(),
            Some("#n3, #n4, #n5, #n6.#n7")
        );
        assert_eq!(query.index.as_deref(), Some("GSI1"));
    }

    #[tokio::test]
    async fn test_execute_requires_key_condition() {
        let table = table();
        let err = QueryBuilder::new().execute(&table).await.unwrap_err();
        assert_eq!(err, KritiError::Storage(StorageError::NoKeyCondition));
        assert_eq!(table.calls().query, 0);
    }

    #[tokio::test]
    async fn test_limit_two_of_three_then_resume() {
        let table = table();
        let builder = QueryBuilder::new()
            .with_partition_key("PK", "ARTIST#a1")
            .with_limit(2);

        let first = builder.execute(&table).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.last_evaluated_key.is_some());

        let second = builder
            .clone()
            .with_start_key(first.last_evaluated_key)
            .execute(&table)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.last_evaluated_key.is_none());
    }

    #[tokio::test]
    async fn test_execute_paginated_uses_opaque_tokens() {
        let table = table();
        let builder = QueryBuilder::new().with_partition_key("PK", "ARTIST#a1");

        let first = builder
            .execute_paginated(&table, &PageParams::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.has_more);
        let token = first.next_token.unwrap();

        let second = builder
            .execute_paginated(&table, &PageParams::new(Some(2), Some(token)))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(!second.has_more);
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_execute_paginated_rejects_bad_token() {
        let table = table();
        let err = QueryBuilder::new()
            .with_partition_key("PK", "ARTIST#a1")
            .execute_paginated(&table, &PageParams::default().with_next_token("***"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KritiError::Pagination(PaginationError::InvalidToken { .. })
        ));
        assert_eq!(table.calls().query, 0);
    }

    #[tokio::test]
    async fn test_execute_all_follows_cursors() {
        let table = table();
        let items = QueryBuilder::new()
            .with_partition_key("PK", "ARTIST#a1")
            .with_sort_key_begins_with("SK", "CONCERT#")
            .with_limit(1)
            .execute_all(&table)
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(table.calls().query, 2);
    }

    #[tokio::test]
    async fn test_projection_keeps_keys() {
        let table = table();
        let out = QueryBuilder::new()
            .with_partition_key("PK", "ARTIST#a2")
            .with_projection(["name"])
            .execute(&table)
            .await
            .unwrap();
        assert_eq!(
            Value::Object(out.items[0].clone()),
            json!({ "PK": "ARTIST#a2", "SK": "#METADATA", "name": "Lalgudi" })
        );
    }

    #[tokio::test]
    async fn test_scan_builder_filters_and_pages() {
        let table = table();
        let all = ScanBuilder::new()
            .with_filter_expr(FilterExpr::exists("name"))
            .with_limit(1)
            .execute_all(&table)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let page = ScanBuilder::new()
            .execute_paginated(&table, &PageParams::default().with_limit(3))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.has_more);
    }
}
