//! Pricing plans and their bucket limits.
//!
//! API-key callers are assigned a plan from the first characters of the raw
//! key, without consulting the key registry. A key that starts with `PX` is
//! limited as BASIC whether or not it was ever issued.

use crate::config::{PlanQuota, PricingConfig};
use crate::error::GatewayError;
use crate::identity::Identity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Named quota tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PricingPlan {
    Free,
    Basic,
    Pro,
}

impl PricingPlan {
    pub fn name(&self) -> &'static str {
        match self {
            PricingPlan::Free => "FREE",
            PricingPlan::Basic => "BASIC",
            PricingPlan::Pro => "PRO",
        }
    }

    /// Plan implied by the leading characters of a raw API key
    pub fn from_key_prefix(key: &str) -> Self {
        if key.starts_with("PX") {
            PricingPlan::Basic
        } else if key.starts_with("AX") || key.starts_with("PR") {
            PricingPlan::Pro
        } else {
            PricingPlan::Free
        }
    }
}

impl fmt::Display for PricingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PricingPlan {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FREE" => Ok(PricingPlan::Free),
            "BASIC" => Ok(PricingPlan::Basic),
            "PRO" => Ok(PricingPlan::Pro),
            other => Err(GatewayError::InvalidPlan(other.to_string())),
        }
    }
}

/// Token bucket parameters for one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    /// Maximum tokens the bucket can hold
    pub capacity: u64,
    /// Tokens added per elapsed interval
    pub refill_tokens: u64,
    pub refill_interval: Duration,
}

impl PlanLimits {
    /// Time for an empty bucket to refill completely; used as the store TTL
    pub fn full_refill_time(&self) -> Duration {
        let intervals = self.capacity.div_ceil(self.refill_tokens.max(1));
        self.refill_interval
            .saturating_mul(u32::try_from(intervals).unwrap_or(u32::MAX))
    }
}

/// Maps identities to plans and plans to limits
#[derive(Debug, Clone)]
pub struct PlanResolver {
    pricing: PricingConfig,
}

impl PlanResolver {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing }
    }

    /// Plan for a rate-limited identity; privileged callers have none
    pub fn resolve_plan(&self, identity: &Identity) -> Option<PricingPlan> {
        match identity {
            Identity::ApiKey(key) => Some(PricingPlan::from_key_prefix(&key.key_prefix)),
            Identity::Ip(_) => Some(PricingPlan::Free),
            Identity::Privileged => None,
        }
    }

    pub fn limits(&self, plan: PricingPlan) -> PlanLimits {
        plan_limits(plan, &self.pricing)
    }
}

/// Bucket limits for `plan` under the given pricing configuration
pub fn plan_limits(plan: PricingPlan, pricing: &PricingConfig) -> PlanLimits {
    let quota: &PlanQuota = match plan {
        PricingPlan::Free => &pricing.plans.free,
        PricingPlan::Basic => &pricing.plans.basic,
        PricingPlan::Pro => &pricing.plans.pro,
    };

    PlanLimits {
        capacity: quota.capacity,
        refill_tokens: quota.refill_tokens,
        refill_interval: pricing.refill_interval(),
    }
}
