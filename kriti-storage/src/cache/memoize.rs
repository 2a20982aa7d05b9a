//! Read-through memoization over [`MemoryCache`]

use kriti_core::KritiResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::memory::MemoryCache;

/// An async function wrapped with a cache lookup.
///
/// Concurrent callers that miss on the same key each run the wrapped
/// function; there is no in-flight de-duplication. Errors and `null`
/// results are returned but never cached.
pub struct Memoized<A, T, K, F> {
    cache: Arc<MemoryCache>,
    key_fn: K,
    ttl: Option<Duration>,
    f: F,
    _marker: PhantomData<fn(A) -> T>,
}

impl MemoryCache {
    /// Wrap `f` so results are served from this cache for `ttl` (the
    /// configured default when `None`). `key_fn` maps the arguments to a
    /// cache key; see [`super::cache_key`].
    pub fn memoize<A, T, K, F, Fut>(
        self: &Arc<Self>,
        key_fn: K,
        ttl: Option<Duration>,
        f: F,
    ) -> Memoized<A, T, K, F>
    where
        K: Fn(&A) -> String,
        F: Fn(A) -> Fut,
        Fut: Future<Output = KritiResult<T>>,
        T: Serialize + DeserializeOwned,
    {
        Memoized {
            cache: Arc::clone(self),
            key_fn,
            ttl,
            f,
            _marker: PhantomData,
        }
    }
}

impl<A, T, K, F, Fut> Memoized<A, T, K, F>
where
    K: Fn(&A) -> String,
    F: Fn(A) -> Fut,
    Fut: Future<Output = KritiResult<T>>,
    T: Serialize + DeserializeOwned,
{
    pub async fn call(&self, args: A) -> KritiResult<T> {
        let key = (self.key_fn)(&args);
        if let Some(cached) = self.cache.get::<T>(&key) {
            tracing::trace!(key = %key, "Memoized hit");
            return Ok(cached);
        }

        let value = (self.f)(args).await?;
        let data = serde_json::to_value(&value)?;
        if !data.is_null() {
            let ttl = self.ttl.unwrap_or(self.cache.config().default_ttl);
            self.cache.insert_value(key, data, ttl);
        }
        Ok(value)
    }

    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }
}
