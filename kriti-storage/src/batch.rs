//! Chunked batch reads and writes
//!
//! Chunks are processed one after another, never concurrently. Unprocessed
//! write requests are resubmitted with bounded exponential backoff; if any
//! remain once the retries are spent the whole call fails.

use kriti_core::{Item, ItemKey, KritiResult, RetryConfig, StorageError};
use std::collections::HashMap;

use crate::store::{TableStore, WriteRequest, MAX_BATCH_GET_KEYS, MAX_BATCH_WRITE_ITEMS};

/// Write every request in chunks of `MAX_BATCH_WRITE_ITEMS`.
pub async fn write_in_chunks<S: TableStore + ?Sized>(
    store: &S,
    requests: Vec<WriteRequest>,
    retry: &RetryConfig,
) -> KritiResult<()> {
    let total = requests.len();
    let mut requests = requests.into_iter().peekable();
    let mut chunk_index = 0usize;

    while requests.peek().is_some() {
        let chunk: Vec<WriteRequest> = requests.by_ref().take(MAX_BATCH_WRITE_ITEMS).collect();
        write_chunk(store, chunk, retry, chunk_index).await?;
        chunk_index += 1;
    }

    tracing::debug!(requests = total, chunks = chunk_index, "Batch write complete");
    Ok(())
}

async fn write_chunk<S: TableStore + ?Sized>(
    store: &S,
    chunk: Vec<WriteRequest>,
    retry: &RetryConfig,
    chunk_index: usize,
) -> KritiResult<()> {
    let mut pending = store.batch_write(chunk).await?;
    let mut retries = 0u32;

    while !pending.is_empty() {
        if retries >= retry.max_retries {
            tracing::error!(
                chunk = chunk_index,
                remaining = pending.len(),
                attempts = retries + 1,
                "Batch write retries exhausted"
            );
            return Err(StorageError::RetriesExhausted {
                attempts: retries + 1,
                remaining: pending.len(),
            }
            .into());
        }

        let delay = retry.backoff(retries);
        tracing::warn!(
            chunk = chunk_index,
            unprocessed = pending.len(),
            retry = retries + 1,
            delay_ms = delay.as_millis() as u64,
            "Retrying unprocessed batch write items"
        );
        tokio::time::sleep(delay).await;
        pending = store.batch_write(pending).await?;
        retries += 1;
    }
    Ok(())
}

/// Read every key in chunks of `MAX_BATCH_GET_KEYS`. The result follows the
/// order of `keys`; missing items are skipped.
pub async fn get_in_chunks<S: TableStore + ?Sized>(
    store: &S,
    keys: &[ItemKey],
) -> KritiResult<Vec<Item>> {
    let mut found: HashMap<ItemKey, Item> = HashMap::with_capacity(keys.len());
    for chunk in keys.chunks(MAX_BATCH_GET_KEYS) {
        for item in store.batch_get(chunk).await? {
            if let Some(key) = ItemKey::from_item(&item) {
                found.insert(key, item);
            }
        }
    }
    Ok(keys.iter().filter_map(|k| found.get(k).cloned()).collect())
}
