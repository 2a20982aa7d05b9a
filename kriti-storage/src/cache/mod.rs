//! Process-local TTL cache
//!
//! [`MemoryCache`] is an explicitly constructed service: build one at
//! startup, share it through an `Arc`, and hand it to whatever needs it.
//! Nothing here is global, and nothing is coherent across processes;
//! invalidating on one instance does not reach another.
//!
//! Keys follow a colon-delimited convention built by [`cache_key`]: the
//! first segment names a namespace (an entity kind or operation) and the
//! rest are parameter values in call order. [`MemoryCache::invalidate_pattern`]
//! matches on string prefix over that convention, so after a write the
//! caller drops the entity key plus any listing keys that could contain it:
//!
//! ```ignore
//! cache.delete(&cache_key("raga", ["r1"]));
//! cache.invalidate_pattern("raga-list:");
//! ```

pub mod memoize;
pub mod memory;
pub mod sweeper;

pub use memoize::Memoized;
pub use memory::{CacheStats, MemoryCache};
pub use sweeper::spawn_cache_sweeper;

/// Separator between cache-key segments.
pub const CACHE_KEY_SEPARATOR: char = ':';

/// `namespace:seg1:seg2...`
pub fn cache_key<I, S>(namespace: &str, segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut key = namespace.to_string();
    for segment in segments {
        key.push(CACHE_KEY_SEPARATOR);
        key.push_str(segment.as_ref());
    }
    key
}
