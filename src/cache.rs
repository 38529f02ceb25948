//! Realtime (L3) cache: TTL with per-key singleflight.
//!
//! On-demand single-symbol queries land here first. A miss triggers exactly
//! one upstream fetch per key; concurrent readers wait on the same flight
//! and share its result. When a refresh fails, a stale entry younger than
//! the grace window is served instead of the error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use polars::prelude::DataFrame;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::SyncResult;

type Key = (String, String);

#[derive(Clone)]
struct Entry {
    value: Arc<DataFrame>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stale_served: AtomicU64,
}

pub struct RealtimeCache {
    ttl: Duration,
    stale_grace: Duration,
    entries: DashMap<Key, Entry>,
    flights: DashMap<Key, Arc<Mutex<()>>>,
    pub metrics: CacheMetrics,
}

impl RealtimeCache {
    pub fn new(ttl: Duration, stale_grace: Duration) -> Self {
        Self {
            ttl,
            stale_grace,
            entries: DashMap::new(),
            flights: DashMap::new(),
            metrics: CacheMetrics::default(),
        }
    }

    /// Look up `(dataset, code)`, fetching through `fetch` on miss.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        dataset: &str,
        code: &str,
        fetch: F,
    ) -> SyncResult<Arc<DataFrame>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = SyncResult<DataFrame>>,
    {
        let key: Key = (dataset.to_string(), code.to_string());

        if let Some(value) = self.fresh(&key) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);

        // Singleflight: losers of this race block on the winner's mutex,
        // then find the entry it wrote. The map reference must drop before
        // awaiting the lock.
        let flight = self
            .flights
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        if let Some(value) = self.fresh(&key) {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        match fetch().await {
            Ok(df) => {
                let value = Arc::new(df);
                self.entries.insert(
                    key,
                    Entry {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(e) => {
                // Serve the previous answer while it is still plausibly
                // current; otherwise the failure surfaces.
                if let Some(entry) = self.entries.get(&key) {
                    if entry.fetched_at.elapsed() <= self.stale_grace {
                        self.metrics.stale_served.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            dataset = %key.0,
                            code = %key.1,
                            "refresh failed, serving stale entry: {e}"
                        );
                        return Ok(entry.value.clone());
                    }
                }
                Err(e)
            }
        }
    }

    fn fresh(&self, key: &Key) -> Option<Arc<DataFrame>> {
        let entry = self.entries.get(key)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            Some(entry.value.clone())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use polars::prelude::*;

    fn quote(price: f64) -> DataFrame {
        df! { "price" => &[price] }.unwrap()
    }

    fn cache() -> RealtimeCache {
        RealtimeCache::new(Duration::from_secs(10), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn hit_within_ttl_skips_fetch() {
        let cache = cache();
        let v = cache
            .get_or_fetch("quote", "600519", || async { Ok(quote(1700.0)) })
            .await
            .unwrap();
        assert_eq!(v.height(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        let v2 = cache
            .get_or_fetch("quote", "600519", || async {
                panic!("fetch must not run on a fresh entry")
            })
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&v, &v2));
        assert_eq!(cache.metrics.hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_refetches() {
        let cache = cache();
        cache
            .get_or_fetch("quote", "600519", || async { Ok(quote(1700.0)) })
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        let v = cache
            .get_or_fetch("quote", "600519", || async { Ok(quote(1710.0)) })
            .await
            .unwrap();
        let price = v.column("price").unwrap().f64().unwrap().get(0).unwrap();
        assert_eq!(price, 1710.0);
        assert_eq!(cache.metrics.misses.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_serves_stale_within_grace() {
        let cache = cache();
        cache
            .get_or_fetch("quote", "600519", || async { Ok(quote(1700.0)) })
            .await
            .unwrap();

        // TTL expired but inside the grace window.
        tokio::time::advance(Duration::from_secs(30)).await;
        let v = cache
            .get_or_fetch("quote", "600519", || async {
                Err(SyncError::UpstreamUnavailable("503".into()))
            })
            .await
            .unwrap();
        let price = v.column("price").unwrap().f64().unwrap().get(0).unwrap();
        assert_eq!(price, 1700.0);
        assert_eq!(cache.metrics.stale_served.load(Ordering::Relaxed), 1);

        // Beyond the grace window the error surfaces.
        tokio::time::advance(Duration::from_secs(61)).await;
        let err = cache
            .get_or_fetch("quote", "600519", || async {
                Err(SyncError::UpstreamUnavailable("503".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "UpstreamUnavailable");
    }

    #[tokio::test]
    async fn singleflight_shares_one_fetch() {
        use std::sync::atomic::AtomicU32;

        let cache = Arc::new(cache());
        let fetches = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let fetches = fetches.clone();
            tasks.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("quote", "600519", || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(quote(1700.0))
                    })
                    .await
                    .unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
