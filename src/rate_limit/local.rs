use super::clock::Clock;
use super::store::{ttl_millis, BucketState, BucketStore};
use super::types::{BucketKey, ConsumeProbe};
use crate::error::Result;
use crate::plan::PlanLimits;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct LocalBucket {
    state: BucketState,
    expires_at_millis: u64,
}

/// Local (in-memory) bucket store.
///
/// Each consume runs under the map's per-key lock, which makes it atomic within
/// this process. It is the single source of truth only for single-instance
/// deployments.
pub struct InMemoryBucketStore {
    buckets: Arc<DashMap<String, LocalBucket>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBucketStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Drop buckets that sat untouched long enough to refill completely
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.expires_at_millis > now);
        before - self.buckets.len()
    }

    /// Periodically purge expired buckets until the store is dropped
    pub fn spawn_purge_task(store: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "Purged idle buckets");
                }
            }
        })
    }

    /// Get the number of live buckets (for testing/monitoring)
    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Current token count of a bucket, without refilling
    pub fn tokens(&self, key: &BucketKey) -> Option<u64> {
        self.buckets
            .get(&key.to_string())
            .map(|bucket| bucket.state.tokens)
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    async fn try_consume(&self, key: &BucketKey, limits: &PlanLimits) -> Result<ConsumeProbe> {
        let now = self.clock.now_millis();
        let ttl = ttl_millis(limits);

        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(bucket = %key, "Creating new bucket");
                LocalBucket {
                    state: BucketState::full(limits, now),
                    expires_at_millis: now.saturating_add(ttl),
                }
            });

        if bucket.expires_at_millis <= now {
            bucket.state = BucketState::full(limits, now);
        }

        let probe = bucket.state.try_consume(limits, now);
        bucket.expires_at_millis = now.saturating_add(ttl);

        Ok(probe)
    }
}
