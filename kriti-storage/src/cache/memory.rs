//! DashMap-backed TTL cache

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use kriti_core::{CacheConfig, Clock, KritiResult, SystemClock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    written_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    /// Expired once strictly more than `ttl` has elapsed.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (now - self.written_at).to_std() {
            Ok(age) => age > self.ttl,
            // Written "after" now: clock moved backwards.
            Err(_) => false,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries currently held, expired or not
    pub entries: u64,
    /// Entries dropped because they expired or failed to decode
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory TTL cache keyed by string.
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            clock: Arc::new(SystemClock),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached value for `key`, or `None` if absent or expired. Expired
    /// entries are evicted on the way out.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let now = self.clock.now();
        // Clone out so the shard lock is released before any removal.
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (entry.is_expired(now), entry.data.clone()));

        match lookup {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some((true, _)) => {
                if self
                    .entries
                    .remove_if(key, |_, entry| entry.is_expired(now))
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some((false, data)) => match serde_json::from_value(data) {
                Ok(value) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Evicting undecodable cache entry");
                    if self.entries.remove(key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            },
        }
    }

    /// Store `value` under the default TTL.
    pub fn set<T: Serialize + ?Sized>(&self, key: impl Into<String>, value: &T) -> KritiResult<()> {
        self.set_with_ttl(key, value, self.config.default_ttl)
    }

    pub fn set_with_ttl<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
    ) -> KritiResult<()> {
        let data = serde_json::to_value(value)?;
        self.insert_value(key.into(), data, ttl);
        Ok(())
    }

    pub(crate) fn insert_value(&self, key: String, data: Value, ttl: Duration) {
        let entry = CacheEntry {
            data,
            written_at: self.clock.now(),
            ttl,
        };
        self.entries.insert(key, entry);
    }

    /// Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Evict every expired entry; returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(now);
            if expired {
                removed += 1;
            }
            !expired
        });
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Cache cleanup");
        }
        removed
    }

    /// Delete every entry whose key starts with `prefix`; returns the count.
    pub fn invalidate_pattern(&self, prefix: &str) -> usize {
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let matched = key.starts_with(prefix);
            if matched {
                removed += 1;
            }
            !matched
        });
        tracing::debug!(prefix = %prefix, removed, "Cache pattern invalidated");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kriti_core::ManualClock;
    use serde_json::json;

    fn cache() -> (MemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let cache = MemoryCache::new(
            CacheConfig::default().with_default_ttl(Duration::from_secs(60)),
        )
        .with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_set_then_get() {
        let (cache, _) = cache();
        cache.set("raga:r1", &json!({ "name": "Todi" })).unwrap();
        let value: Option<Value> = cache.get("raga:r1");
        assert_eq!(value, Some(json!({ "name": "Todi" })));
        assert_eq!(cache.get::<Value>("raga:r2"), None);
    }

    #[test]
    fn test_ttl_boundary() {
        let (cache, clock) = cache();
        cache.set("k", &1u32).unwrap();

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(cache.get::<u32>("k"), Some(1));

        clock.advance(chrono::Duration::milliseconds(1));
        assert_eq!(cache.get::<u32>("k"), None);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_per_entry_ttl() {
        let (cache, clock) = cache();
        cache.set_with_ttl("short", &"a", Duration::from_secs(1)).unwrap();
        cache.set("long", &"b").unwrap();
        clock.advance(chrono::Duration::seconds(2));
        assert_eq!(cache.get::<String>("short"), None);
        assert_eq!(cache.get::<String>("long").as_deref(), Some("b"));
    }

    #[test]
    fn test_cleanup_removes_only_expired() {
        let (cache, clock) = cache();
        cache.set_with_ttl("old:1", &1, Duration::from_secs(5)).unwrap();
        cache.set_with_ttl("old:2", &2, Duration::from_secs(5)).unwrap();
        cache.set_with_ttl("fresh", &3, Duration::from_secs(500)).unwrap();
        clock.advance(chrono::Duration::seconds(10));

        assert_eq!(cache.cleanup(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get::<i32>("fresh"), Some(3));
        assert_eq!(cache.cleanup(), 0);
    }

    #[test]
    fn test_invalidate_pattern() {
        let (cache, _) = cache();
        cache.set("foo:1", &1).unwrap();
        cache.set("foo:2", &2).unwrap();
        cache.set("foobar", &3).unwrap();
        cache.set("bar:1", &4).unwrap();

        assert_eq!(cache.invalidate_pattern("foo:"), 2);
        assert_eq!(cache.get::<i32>("foobar"), Some(3));
        assert_eq!(cache.get::<i32>("bar:1"), Some(4));
        assert_eq!(cache.invalidate_pattern("nothing:"), 0);
    }

    #[test]
    fn test_delete_and_clear() {
        let (cache, _) = cache();
        cache.set("a", &1).unwrap();
        cache.set("b", &2).unwrap();
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_undecodable_entry_is_evicted() {
        let (cache, _) = cache();
        cache.set("k", &"not a number").unwrap();
        assert_eq!(cache.get::<u64>("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stats() {
        let (cache, _) = cache();
        cache.set("a", &1).unwrap();
        let _ = cache.get::<i32>("a");
        let _ = cache.get::<i32>("a");
        let _ = cache.get::<i32>("b");
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
