use crate::identity::Identity;
use std::fmt;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Which kind of identity a bucket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketScope {
    ApiKey,
    Ip,
}

impl BucketScope {
    fn as_str(&self) -> &'static str {
        match self {
            BucketScope::ApiKey => "key",
            BucketScope::Ip => "ip",
        }
    }
}

/// Bucket key components
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub scope: BucketScope,
    /// Salted hash of the API key or client address
    pub identifier: String,
}

impl BucketKey {
    pub fn new(scope: BucketScope, identifier: impl Into<String>) -> Self {
        Self {
            scope,
            identifier: identifier.into(),
        }
    }

    /// Bucket for a rate-limited identity; privileged callers have none
    pub fn for_identity(identity: &Identity) -> Option<Self> {
        match identity {
            Identity::ApiKey(key) => Some(Self::new(BucketScope::ApiKey, key.hashed_key.clone())),
            Identity::Ip(ip) => Some(Self::new(BucketScope::Ip, ip.hashed.clone())),
            Identity::Privileged => None,
        }
    }

    /// Convert to a Redis key
    pub fn to_redis_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self)
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope.as_str(), self.identifier)
    }
}

/// Outcome of one consume attempt against the bucket store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeProbe {
    pub consumed: bool,
    /// Tokens left after this attempt
    pub remaining_tokens: u64,
    /// Time until the next refill when nothing was consumed, else zero
    pub nanos_to_refill: u64,
}

impl ConsumeProbe {
    pub fn consumed(remaining_tokens: u64) -> Self {
        Self {
            consumed: true,
            remaining_tokens,
            nanos_to_refill: 0,
        }
    }

    pub fn rejected(remaining_tokens: u64, nanos_to_refill: u64) -> Self {
        Self {
            consumed: false,
            remaining_tokens,
            nanos_to_refill,
        }
    }
}

/// Admission decision reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_tokens: i64,
    pub retry_after_seconds: i64,
}

impl RateLimitDecision {
    pub fn from_probe(probe: &ConsumeProbe) -> Self {
        let remaining_tokens = i64::try_from(probe.remaining_tokens).unwrap_or(i64::MAX);
        if probe.consumed {
            Self {
                allowed: true,
                remaining_tokens,
                retry_after_seconds: 0,
            }
        } else {
            Self {
                allowed: false,
                remaining_tokens,
                retry_after_seconds: i64::try_from(probe.nanos_to_refill / NANOS_PER_SECOND)
                    .unwrap_or(i64::MAX),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{ApiKeyIdentity, IpIdentity};

    #[test]
    fn test_bucket_key_to_redis_key() {
        let key = BucketKey::new(BucketScope::Ip, "abc123");
        assert_eq!(key.to_redis_key("ocr:bucket:"), "ocr:bucket:ip:abc123");

        let key = BucketKey::new(BucketScope::ApiKey, "def456");
        assert_eq!(key.to_string(), "key:def456");
    }

    #[test]
    fn test_bucket_key_for_identity() {
        let key = Identity::ApiKey(ApiKeyIdentity {
            hashed_key: "h".to_string(),
            key_prefix: "PX".to_string(),
        });
        assert_eq!(
            BucketKey::for_identity(&key),
            Some(BucketKey::new(BucketScope::ApiKey, "h"))
        );

        let ip = Identity::Ip(IpIdentity {
            addr: "10.0.0.1".parse().unwrap(),
            hashed: "i".to_string(),
        });
        assert_eq!(
            BucketKey::for_identity(&ip),
            Some(BucketKey::new(BucketScope::Ip, "i"))
        );

        assert_eq!(BucketKey::for_identity(&Identity::Privileged), None);
    }

    #[test]
    fn test_decision_from_probe() {
        let allowed = RateLimitDecision::from_probe(&ConsumeProbe::consumed(4));
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining_tokens, 4);
        assert_eq!(allowed.retry_after_seconds, 0);

        let denied = RateLimitDecision::from_probe(&ConsumeProbe::rejected(0, 59_999_000_000));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining_tokens, 0);
        assert_eq!(denied.retry_after_seconds, 59);
    }
}
