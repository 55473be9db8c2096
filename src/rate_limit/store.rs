use super::types::{BucketKey, ConsumeProbe};
use crate::error::Result;
use crate::plan::PlanLimits;
use async_trait::async_trait;

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Authoritative token-bucket state.
///
/// `try_consume` must be atomic for every caller sharing a bucket key,
/// including callers in other processes.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Refill the bucket and try to take one token
    async fn try_consume(&self, key: &BucketKey, limits: &PlanLimits) -> Result<ConsumeProbe>;
}

/// Token bucket with interval refill. Mirrors the Redis script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    pub tokens: u64,
    pub last_refill_millis: u64,
}

impl BucketState {
    /// A bucket created at `now`, holding its full capacity
    pub fn full(limits: &PlanLimits, now_millis: u64) -> Self {
        Self {
            tokens: limits.capacity,
            last_refill_millis: now_millis,
        }
    }

    /// Add `refill_tokens` for every whole interval since the last refill
    pub fn refill(&mut self, limits: &PlanLimits, now_millis: u64) {
        let interval = interval_millis(limits);
        let elapsed = now_millis.saturating_sub(self.last_refill_millis);
        let intervals = elapsed / interval;

        if intervals > 0 {
            self.tokens = self
                .tokens
                .saturating_add(intervals.saturating_mul(limits.refill_tokens));
            self.last_refill_millis += intervals * interval;
        }
        self.tokens = self.tokens.min(limits.capacity);
    }

    pub fn try_consume(&mut self, limits: &PlanLimits, now_millis: u64) -> ConsumeProbe {
        self.refill(limits, now_millis);

        if self.tokens >= 1 {
            self.tokens -= 1;
            ConsumeProbe::consumed(self.tokens)
        } else {
            let next_refill = self.last_refill_millis + interval_millis(limits);
            let wait_millis = next_refill.saturating_sub(now_millis);
            ConsumeProbe::rejected(self.tokens, wait_millis.saturating_mul(NANOS_PER_MILLI))
        }
    }
}

pub(crate) fn interval_millis(limits: &PlanLimits) -> u64 {
    u64::try_from(limits.refill_interval.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}

pub(crate) fn ttl_millis(limits: &PlanLimits) -> u64 {
    u64::try_from(limits.full_refill_time().as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
}
