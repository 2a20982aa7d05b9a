//! KRITI Storage - Store trait, access patterns, versioning and caching
//!
//! Defines the [`TableStore`] abstraction over a single wide-column table
//! and everything built on it. [`InMemoryTable`] is the reference store used
//! by tests; the DynamoDB backend lives behind the `dynamodb` feature.

pub mod access;
pub mod batch;
pub mod cache;
pub mod expression;
pub mod memory;
pub mod query;
pub mod store;
pub mod versioning;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;

pub use access::{DateRange, QueryOptions, SearchRequest, SortKeyRange, TableClient};
pub use batch::{get_in_chunks, write_in_chunks};
pub use cache::{cache_key, spawn_cache_sweeper, CacheStats, MemoryCache, Memoized};
pub use expression::{CompiledQuery, CompiledScan, KeyCondition, SortKeyCondition};
pub use memory::{CallCounts, InMemoryTable};
pub use query::{QueryBuilder, ScanBuilder};
pub use store::{
    Condition, QueryOutput, TableStore, TransactWriteOp, WriteRequest, MAX_BATCH_GET_KEYS,
    MAX_BATCH_WRITE_ITEMS, MAX_TRANSACT_ITEMS,
};
pub use versioning::{VersionSummary, VersioningEngine, VersioningMode, WriteGuard};

#[cfg(feature = "dynamodb")]
pub use dynamodb::DynamoDbTable;
