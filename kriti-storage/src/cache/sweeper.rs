//! Background eviction of expired cache entries

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::memory::MemoryCache;

/// Spawn a task that calls [`MemoryCache::cleanup`] every `every` until
/// `shutdown` turns `true` or its sender is dropped. The handle resolves to
/// the total number of entries evicted.
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let sweeper = spawn_cache_sweeper(Arc::clone(&cache), config.sweep_interval, shutdown_rx);
/// // ...
/// let _ = shutdown_tx.send(true);
/// let evicted = sweeper.await?;
/// ```
pub fn spawn_cache_sweeper(
    cache: Arc<MemoryCache>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut evicted = 0u64;
        let mut cycles = 0u64;

        tracing::info!(interval_ms = every.as_millis() as u64, "Cache sweeper started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    evicted += cache.cleanup() as u64;
                    cycles += 1;
                }
            }
        }

        tracing::info!(evicted, cycles, "Cache sweeper stopped");
        evicted
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use kriti_core::{CacheConfig, ManualClock};

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));
        let cache = Arc::new(
            MemoryCache::new(CacheConfig::default().with_default_ttl(Duration::from_secs(1)))
                .with_clock(clock.clone()),
        );
        cache.set("a", &1).unwrap();
        cache.set("b", &2).unwrap();
        cache
            .set_with_ttl("keep", &3, Duration::from_secs(3600))
            .unwrap();
        clock.advance(chrono::Duration::seconds(5));

        let (tx, rx) = watch::channel(false);
        let handle = spawn_cache_sweeper(Arc::clone(&cache), Duration::from_millis(10), rx);

        for _ in 0..200 {
            if cache.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.len(), 1);

        tx.send(true).unwrap();
        assert_eq!(handle.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sweeper_stops_when_sender_dropped() {
        let cache = Arc::new(MemoryCache::default());
        let (tx, rx) = watch::channel(false);
        let handle = spawn_cache_sweeper(cache, Duration::from_secs(60), rx);
        drop(tx);
        assert_eq!(handle.await.unwrap(), 0);
    }
}
