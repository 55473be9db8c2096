//! API key issuance and validation.
//!
//! Raw keys have the form `<PLAN>-<sha256 hex of a random nonce>` and are
//! handed to the caller exactly once. Only `sha256(raw_key + salt)` is written
//! to the [`KeyStore`].

pub mod handler;
pub mod store;

pub use store::{InMemoryKeyStore, KeyStore, RedisKeyStore};

use crate::error::{GatewayError, Result};
use crate::hashing::{hex_digest, HashingService};
use crate::plan::PricingPlan;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::RngCore;
use std::sync::Arc;
use tracing::{info, warn};

/// Collisions tolerated before issuance gives up
pub const MAX_ISSUE_ATTEMPTS: usize = 5;

const NONCE_BYTES: usize = 32;

/// A freshly issued key. `raw_key` is never persisted.
#[derive(Debug, Clone)]
pub struct IssuedKey {
    pub raw_key: String,
    pub hashed_key: String,
    pub plan: PricingPlan,
    pub issued_at: DateTime<Utc>,
}

/// Issues and validates API keys
#[derive(Clone)]
pub struct KeyRegistry {
    store: Arc<dyn KeyStore>,
    hashing: Arc<HashingService>,
}

impl KeyRegistry {
    pub fn new(store: Arc<dyn KeyStore>, hashing: Arc<HashingService>) -> Self {
        Self { store, hashing }
    }

    /// Issue a new key for `plan`
    pub async fn issue(&self, plan: PricingPlan) -> Result<IssuedKey> {
        self.issue_with(plan, random_nonce).await
    }

    async fn issue_with(
        &self,
        plan: PricingPlan,
        mut nonce: impl FnMut() -> String,
    ) -> Result<IssuedKey> {
        for attempt in 1..=MAX_ISSUE_ATTEMPTS {
            let raw_key = format!("{}-{}", plan.name(), self.hashing.hash(&nonce()));
            let hashed_key = self.hash_for_lookup(&raw_key);
            let issued_at = Utc::now();
            let timestamp = issued_at.to_rfc3339_opts(SecondsFormat::Millis, true);

            if self.store.insert_if_absent(&hashed_key, &timestamp).await? {
                info!(plan = %plan, attempt, "Issued API key");
                metrics::counter!("ocr_gateway_keys_issued_total", "plan" => plan.name())
                    .increment(1);
                return Ok(IssuedKey {
                    raw_key,
                    hashed_key,
                    plan,
                    issued_at,
                });
            }

            warn!(plan = %plan, attempt, "Generated API key collided, regenerating");
        }

        Err(GatewayError::KeyIssuance(format!(
            "no unique key after {} attempts",
            MAX_ISSUE_ATTEMPTS
        )))
    }

    /// Storage form of a raw key
    pub fn hash_for_lookup(&self, raw_key: &str) -> String {
        self.hashing.salted_hash(raw_key)
    }

    pub async fn exists(&self, hashed_key: &str) -> Result<bool> {
        self.store.exists(hashed_key).await
    }

    /// Whether `raw_key` was issued by this registry
    pub async fn is_valid(&self, raw_key: &str) -> Result<bool> {
        self.exists(&self.hash_for_lookup(raw_key)).await
    }
}

fn random_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_digest(&bytes)
}
