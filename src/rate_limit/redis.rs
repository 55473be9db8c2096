use super::clock::Clock;
use super::lua_scripts::TOKEN_BUCKET_SCRIPT;
use super::store::{interval_millis, ttl_millis, BucketStore};
use super::types::{BucketKey, ConsumeProbe};
use crate::error::{GatewayError, Result};
use crate::plan::PlanLimits;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Redis-backed distributed bucket store
pub struct RedisBucketStore {
    /// Redis connection manager
    connection: ConnectionManager,
    script: Script,
    prefix: String,
    /// Upper bound for one consume round trip
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl RedisBucketStore {
    /// Create a new Redis bucket store
    pub async fn new(
        redis_url: &str,
        prefix: &str,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            GatewayError::Config(format!("Failed to create Redis client: {}", e))
        })?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to connect to Redis: {}", e)))?;

        info!(prefix = %prefix, "Connected to Redis bucket store");

        Ok(Self {
            connection,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
            prefix: prefix.to_string(),
            timeout,
            clock,
        })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        match timeout(self.timeout, redis::cmd("PING").query_async::<_, String>(&mut conn)).await
        {
            Ok(result) => result.map(|_| ()).map_err(GatewayError::from),
            Err(_) => Err(GatewayError::StoreUnavailable(
                "bucket store ping timed out".to_string(),
            )),
        }
    }
}

#[async_trait]
impl BucketStore for RedisBucketStore {
    async fn try_consume(&self, key: &BucketKey, limits: &PlanLimits) -> Result<ConsumeProbe> {
        let redis_key = key.to_redis_key(&self.prefix);
        let now = self.clock.now_millis();
        let mut conn = self.connection.clone();

        let mut invocation = self.script.key(&redis_key);
        invocation
            .arg(limits.capacity)
            .arg(limits.refill_tokens)
            .arg(interval_millis(limits))
            .arg(now)
            .arg(ttl_millis(limits));

        let result = match timeout(
            self.timeout,
            invocation.invoke_async::<_, Vec<i64>>(&mut conn),
        )
        .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(bucket = %redis_key, error = %e, "Redis error during consume");
                return Err(e.into());
            }
            Err(_) => {
                error!(bucket = %redis_key, timeout = ?self.timeout, "Redis consume timed out");
                return Err(GatewayError::StoreUnavailable(format!(
                    "bucket store did not answer within {:?}",
                    self.timeout
                )));
            }
        };

        let [consumed, remaining, wait_millis] = result[..] else {
            return Err(GatewayError::Internal(format!(
                "Unexpected token bucket reply: {:?}",
                result
            )));
        };

        let remaining = u64::try_from(remaining).unwrap_or_default();
        let wait_millis = u64::try_from(wait_millis).unwrap_or_default();

        debug!(
            "Token bucket check for key {}: consumed={}, remaining={}, wait_ms={}",
            redis_key, consumed, remaining, wait_millis
        );

        if consumed == 1 {
            Ok(ConsumeProbe::consumed(remaining))
        } else {
            Ok(ConsumeProbe::rejected(
                remaining,
                wait_millis.saturating_mul(NANOS_PER_MILLI),
            ))
        }
    }
}
