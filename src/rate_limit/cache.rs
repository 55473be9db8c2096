use super::types::BucketKey;
use crate::config::BucketCacheConfig;
use crate::plan::{PlanLimits, PricingPlan};
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Resolved configuration for one identity's bucket. Holds no token state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHandle {
    pub bucket_key: BucketKey,
    pub plan: PricingPlan,
    pub limits: PlanLimits,
}

/// Bounded per-process cache of bucket handles.
///
/// Concurrent first requests for the same key build the handle exactly once;
/// the other callers wait for and share that result.
#[derive(Clone)]
pub struct BucketCache {
    handles: Cache<BucketKey, Arc<BucketHandle>>,
}

impl BucketCache {
    pub fn new(config: &BucketCacheConfig) -> Self {
        let handles = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_idle(Duration::from_secs(config.time_to_idle_secs))
            .build();

        Self { handles }
    }

    /// Cached handle for `key`, building it with `build` on first access.
    /// Nothing is cached when `build` returns `None`.
    pub async fn get_or_build<F>(&self, key: &BucketKey, build: F) -> Option<Arc<BucketHandle>>
    where
        F: FnOnce() -> Option<BucketHandle> + Send,
    {
        self.handles
            .optionally_get_with(key.clone(), async move { build().map(Arc::new) })
            .await
    }

    pub async fn get(&self, key: &BucketKey) -> Option<Arc<BucketHandle>> {
        self.handles.get(key).await
    }

    /// Approximate number of cached handles
    pub fn entry_count(&self) -> u64 {
        self.handles.entry_count()
    }

    /// Apply pending evictions (for testing)
    pub async fn sync(&self) {
        self.handles.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::types::BucketScope;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn handle(key: &BucketKey) -> BucketHandle {
        BucketHandle {
            bucket_key: key.clone(),
            plan: PricingPlan::Free,
            limits: PlanLimits {
                capacity: 1,
                refill_tokens: 1,
                refill_interval: Duration::from_secs(60),
            },
        }
    }

    fn config(max_capacity: u64) -> BucketCacheConfig {
        BucketCacheConfig {
            max_capacity,
            time_to_idle_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_builds_once_per_key() {
        let cache = BucketCache::new(&config(100));
        let key = BucketKey::new(BucketScope::Ip, "a");
        let builds = AtomicUsize::new(0);

        for _ in 0..5 {
            let handle = cache
                .get_or_build(&key, || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Some(handle(&key))
                })
                .await
                .unwrap();
            assert_eq!(handle.bucket_key, key);
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_is_not_cached() {
        let cache = BucketCache::new(&config(100));
        let key = BucketKey::new(BucketScope::Ip, "none");

        assert!(cache.get_or_build(&key, || None).await.is_none());
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_access_builds_once() {
        let cache = BucketCache::new(&config(100));
        let key = BucketKey::new(BucketScope::ApiKey, "stampede");
        let builds = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let builds = builds.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_build(&key, || {
                            builds.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(5));
                            Some(handle(&key))
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();

        let handles: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|h| h.unwrap())
            .collect();

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let cache = BucketCache::new(&config(10));

        for n in 0..100 {
            let key = BucketKey::new(BucketScope::Ip, format!("ip-{}", n));
            cache.get_or_build(&key, || Some(handle(&key))).await;
        }
        cache.sync().await;

        assert!(cache.entry_count() <= 10);
    }
}
