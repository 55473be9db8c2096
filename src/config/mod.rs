use crate::error::{GatewayError, Result};
use argon2::PasswordHash;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `OCR_GATEWAY__SERVER__PORT=9000`
pub const ENV_PREFIX: &str = "OCR_GATEWAY";

/// Longest accepted refill interval (one week)
pub const MAX_REFILL_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// Main service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Shared stores for buckets and keys
    #[serde(default)]
    pub redis: RedisConfig,
    /// Pricing plans and refill interval
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Key hashing, headers and privileged principals
    pub security: SecurityConfig,
    /// Admission gate behavior
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Per-process bucket handle cache
    #[serde(default)]
    pub cache: BucketCacheConfig,
    /// External OCR engine
    pub ocr: OcrConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Redis configuration. A missing URL selects the in-process store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis URL holding token buckets
    #[serde(default)]
    pub bucket_url: Option<String>,
    /// Redis URL holding hashed API keys
    #[serde(default)]
    pub key_url: Option<String>,
    /// Upper bound for a single store round trip
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
    /// Key prefix for bucket entries
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,
    /// Key prefix for API key entries
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

/// Pricing plan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Interval between refills, shared by every plan
    #[serde(default = "default_refill_interval_minutes")]
    pub refill_interval_minutes: u64,
    #[serde(default)]
    pub plans: PlansConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlansConfig {
    #[serde(default)]
    pub free: PlanQuota,
    #[serde(default)]
    pub basic: PlanQuota,
    #[serde(default)]
    pub pro: PlanQuota,
}

/// Bucket size and tokens added per refill interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanQuota {
    #[serde(default = "default_one")]
    pub capacity: u64,
    #[serde(default = "default_one")]
    pub refill_tokens: u64,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Server-side salt mixed into every key and IP digest
    pub salt: String,
    /// Header carrying the caller's API key
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
    /// Roles exempt from rate limiting
    #[serde(default = "default_privileged_roles")]
    pub privileged_roles: Vec<String>,
    /// Operator accounts accepted through HTTP basic auth
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

/// Operator account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    /// Argon2 PHC string, e.g. `$argon2id$v=19$m=19456,t=2,p=1$...`
    pub password_hash: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// What the gate does when the bucket store cannot answer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    /// Reject with 503
    #[default]
    FailClosed,
    /// Let the request through without rate-limit headers
    FailOpen,
}

/// Admission gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default)]
    pub on_store_error: StoreErrorPolicy,
    /// Ignore API keys that are not in the registry and limit by IP instead
    #[serde(default)]
    pub require_registered_keys: bool,
}

/// Bucket handle cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketCacheConfig {
    /// Maximum number of cached handles
    #[serde(default = "default_cache_capacity")]
    pub max_capacity: u64,
    /// Evict handles unused for this long
    #[serde(default = "default_cache_idle_secs")]
    pub time_to_idle_secs: u64,
}

/// OCR engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// URL receiving the image as a multipart upload
    pub endpoint: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

fn default_one() -> u64 {
    1
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_redis_timeout_ms() -> u64 {
    500
}

fn default_bucket_prefix() -> String {
    "ocr:bucket:".to_string()
}

fn default_key_prefix() -> String {
    "ocr:apikey:".to_string()
}

fn default_refill_interval_minutes() -> u64 {
    1
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

fn default_privileged_roles() -> Vec<String> {
    vec!["ROLE_ADMIN".to_string(), "ROLE_SUPERUSER".to_string()]
}

fn default_cache_capacity() -> u64 {
    10_000
}

fn default_cache_idle_secs() -> u64 {
    3600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            bucket_url: None,
            key_url: None,
            timeout_ms: default_redis_timeout_ms(),
            bucket_prefix: default_bucket_prefix(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            refill_interval_minutes: default_refill_interval_minutes(),
            plans: PlansConfig::default(),
        }
    }
}

impl Default for PlanQuota {
    fn default() -> Self {
        Self {
            capacity: 1,
            refill_tokens: 1,
        }
    }
}

impl Default for BucketCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_cache_capacity(),
            time_to_idle_secs: default_cache_idle_secs(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl OcrConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PricingConfig {
    pub fn refill_interval(&self) -> Duration {
        Duration::from_secs(self.refill_interval_minutes.saturating_mul(60))
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, then apply `OCR_GATEWAY__*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GatewayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to read config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.security.salt.trim().is_empty() {
            return Err(GatewayError::Config(
                "security.salt cannot be empty".to_string(),
            ));
        }

        if self.security.api_key_header.parse::<http::HeaderName>().is_err() {
            return Err(GatewayError::Config(format!(
                "Invalid API key header name: {}",
                self.security.api_key_header
            )));
        }

        if self.pricing.refill_interval_minutes == 0 {
            return Err(GatewayError::Config(
                "pricing.refill_interval_minutes must be > 0".to_string(),
            ));
        }
        if self.pricing.refill_interval_minutes > MAX_REFILL_INTERVAL_MINUTES {
            return Err(GatewayError::Config(format!(
                "pricing.refill_interval_minutes must be <= {}",
                MAX_REFILL_INTERVAL_MINUTES
            )));
        }

        let plans = [
            ("free", &self.pricing.plans.free),
            ("basic", &self.pricing.plans.basic),
            ("pro", &self.pricing.plans.pro),
        ];
        for (name, quota) in plans {
            if quota.capacity == 0 {
                return Err(GatewayError::Config(format!(
                    "Capacity must be > 0 for plan: {}",
                    name
                )));
            }
            if quota.refill_tokens == 0 {
                return Err(GatewayError::Config(format!(
                    "Refill tokens must be > 0 for plan: {}",
                    name
                )));
            }
        }

        if self.redis.timeout_ms == 0 {
            return Err(GatewayError::Config(
                "redis.timeout_ms must be > 0".to_string(),
            ));
        }

        if self.cache.max_capacity == 0 {
            return Err(GatewayError::Config(
                "cache.max_capacity must be > 0".to_string(),
            ));
        }

        let endpoint = url::Url::parse(&self.ocr.endpoint).map_err(|e| {
            GatewayError::Config(format!("Invalid OCR endpoint '{}': {}", self.ocr.endpoint, e))
        })?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            return Err(GatewayError::Config(format!(
                "OCR endpoint must use http or https: {}",
                self.ocr.endpoint
            )));
        }

        for account in &self.security.accounts {
            if account.username.is_empty() {
                return Err(GatewayError::Config(
                    "Account username cannot be empty".to_string(),
                ));
            }
            if let Err(e) = PasswordHash::new(&account.password_hash) {
                return Err(GatewayError::Config(format!(
                    "password_hash must be a PHC string for account {}: {}",
                    account.username, e
                )));
            }
        }

        Ok(())
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            pricing: PricingConfig {
                refill_interval_minutes: 1,
                plans: PlansConfig::default(),
            },
            security: SecurityConfig {
                salt: "test-salt".to_string(),
                api_key_header: default_api_key_header(),
                privileged_roles: default_privileged_roles(),
                accounts: vec![],
            },
            admission: AdmissionConfig::default(),
            cache: BucketCacheConfig::default(),
            ocr: OcrConfig {
                endpoint: "http://localhost:8884/tesseract".to_string(),
                timeout_secs: default_timeout(),
            },
            logging: LoggingConfig::default(),
        }
    }
}
