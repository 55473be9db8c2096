use super::cache::{BucketCache, BucketHandle};
use super::clock::Clock;
use super::local::InMemoryBucketStore;
use super::redis::RedisBucketStore;
use super::store::BucketStore;
use super::types::{BucketKey, RateLimitDecision};
use crate::config::{BucketCacheConfig, PricingConfig, RedisConfig};
use crate::error::{GatewayError, Result};
use crate::identity::Identity;
use crate::plan::PlanResolver;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves an identity's bucket and consumes from it
pub struct RateLimiterService {
    plans: PlanResolver,
    cache: BucketCache,
    store: Arc<dyn BucketStore>,
}

impl RateLimiterService {
    pub fn new(plans: PlanResolver, cache: BucketCache, store: Arc<dyn BucketStore>) -> Self {
        Self {
            plans,
            cache,
            store,
        }
    }

    /// Create a new rate limiter service with local-only buckets
    pub fn local_only(
        pricing: PricingConfig,
        cache: &BucketCacheConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!("Initializing local-only rate limiter");
        Self::new(
            PlanResolver::new(pricing),
            BucketCache::new(cache),
            Arc::new(InMemoryBucketStore::new(clock)),
        )
    }

    /// Create a new rate limiter service with buckets in Redis
    pub async fn with_redis(
        pricing: PricingConfig,
        cache: &BucketCacheConfig,
        redis: &RedisConfig,
        redis_url: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        info!("Initializing rate limiter with Redis backend");

        let store =
            RedisBucketStore::new(redis_url, &redis.bucket_prefix, redis.timeout(), clock).await?;
        store.ping().await?;

        Ok(Self::new(
            PlanResolver::new(pricing),
            BucketCache::new(cache),
            Arc::new(store),
        ))
    }

    /// Consume one token for `identity`. Privileged identities yield `None`.
    ///
    /// The consume runs on its own task so that a dropped request cannot
    /// abandon it halfway.
    pub async fn check(&self, identity: &Identity) -> Result<Option<RateLimitDecision>> {
        let Some(handle) = self.handle_for(identity).await else {
            return Ok(None);
        };

        let store = self.store.clone();
        let task_handle = handle.clone();
        let probe = tokio::spawn(async move {
            store
                .try_consume(&task_handle.bucket_key, &task_handle.limits)
                .await
        })
        .await
        .map_err(|e| GatewayError::Internal(format!("Consume task failed: {}", e)))??;

        let decision = RateLimitDecision::from_probe(&probe);
        debug!(
            bucket = %handle.bucket_key,
            plan = %handle.plan,
            allowed = decision.allowed,
            remaining = decision.remaining_tokens,
            "Rate limit check"
        );

        Ok(Some(decision))
    }

    /// Bucket handle for a rate-limited identity
    pub async fn handle_for(&self, identity: &Identity) -> Option<Arc<BucketHandle>> {
        let key = BucketKey::for_identity(identity)?;
        self.cache
            .get_or_build(&key, || {
                let plan = self.plans.resolve_plan(identity)?;
                debug!(bucket = %key, plan = %plan, "Creating bucket handle");
                Some(BucketHandle {
                    bucket_key: key.clone(),
                    plan,
                    limits: self.plans.limits(plan),
                })
            })
            .await
    }

    pub fn cache(&self) -> &BucketCache {
        &self.cache
    }
}
