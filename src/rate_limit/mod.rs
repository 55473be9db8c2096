//! Rate limiting module
//!
//! Token buckets per caller identity, refilled in whole intervals according to
//! the caller's pricing plan:
//!
//! - **Store**: the authoritative bucket state, either in Redis (atomic Lua
//!   script, shared by every instance) or in process memory
//! - **Cache**: a bounded map from bucket key to the resolved plan and limits,
//!   built once per key
//! - **Gate**: the axum middleware that turns a consume into `429` or an
//!   `X-Rate-Limit-Remaining` header
//!
//! # Example
//!
//! ```rust,no_run
//! use ocr_gateway::config::GatewayConfig;
//! use ocr_gateway::rate_limit::{RateLimiterService, SystemClock};
//! use std::sync::Arc;
//!
//! let config = GatewayConfig::default_config();
//!
//! // Create local-only rate limiter
//! let service =
//!     RateLimiterService::local_only(config.pricing, &config.cache, Arc::new(SystemClock));
//! ```

pub mod cache;
pub mod clock;
pub mod local;
pub mod lua_scripts;
pub mod middleware;
pub mod redis;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::{BucketCache, BucketHandle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use local::InMemoryBucketStore;
pub use middleware::{
    add_rate_limit_headers, admission_middleware, create_rate_limit_response, Admission,
    AdmissionGate, REMAINING_HEADER, RETRY_AFTER_HEADER,
};
pub use redis::RedisBucketStore;
pub use service::RateLimiterService;
pub use store::{BucketState, BucketStore};
pub use types::{BucketKey, BucketScope, ConsumeProbe, RateLimitDecision};
