use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Durable map of hashed API keys to their issue timestamp
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Check whether a hashed key is registered
    async fn exists(&self, hashed_key: &str) -> Result<bool>;

    /// Store `hashed_key -> issued_at` unless the key is already present.
    /// Returns `false` on collision.
    async fn insert_if_absent(&self, hashed_key: &str, issued_at: &str) -> Result<bool>;

    /// Issue timestamp of a registered key
    async fn issued_at(&self, hashed_key: &str) -> Result<Option<String>>;
}

/// In-process key store
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyStore {
    keys: Arc<DashMap<String, String>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every stored entry (for inspection in tests and tooling)
    pub fn entries(&self) -> Vec<(String, String)> {
        self.keys
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn exists(&self, hashed_key: &str) -> Result<bool> {
        Ok(self.keys.contains_key(hashed_key))
    }

    async fn insert_if_absent(&self, hashed_key: &str, issued_at: &str) -> Result<bool> {
        match self.keys.entry(hashed_key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(issued_at.to_string());
                Ok(true)
            }
        }
    }

    async fn issued_at(&self, hashed_key: &str) -> Result<Option<String>> {
        Ok(self.keys.get(hashed_key).map(|entry| entry.value().clone()))
    }
}

/// Redis-backed key store
#[derive(Clone)]
pub struct RedisKeyStore {
    connection: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl RedisKeyStore {
    /// Connect to the key Redis instance
    pub async fn connect(redis_url: &str, prefix: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            GatewayError::Config(format!("Failed to create Redis client: {}", e))
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::Config(format!("Failed to connect to Redis: {}", e)))?;

        info!(prefix = %prefix, "Connected to Redis key store");

        Ok(Self {
            connection,
            prefix: prefix.to_string(),
            timeout,
        })
    }

    fn redis_key(&self, hashed_key: &str) -> String {
        format!("{}{}", self.prefix, hashed_key)
    }

    async fn bounded<T>(
        &self,
        op: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> Result<T> {
        match timeout(self.timeout, op).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::StoreUnavailable(format!(
                "key store did not answer within {:?}",
                self.timeout
            ))),
        }
    }
}

#[async_trait]
impl KeyStore for RedisKeyStore {
    async fn exists(&self, hashed_key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let redis_key = self.redis_key(hashed_key);
        self.bounded(async move { conn.exists(&redis_key).await })
            .await
    }

    async fn insert_if_absent(&self, hashed_key: &str, issued_at: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let redis_key = self.redis_key(hashed_key);
        let value = issued_at.to_string();
        let inserted = self
            .bounded(async move { conn.set_nx(&redis_key, value).await })
            .await?;

        debug!(inserted, "Stored hashed API key");
        Ok(inserted)
    }

    async fn issued_at(&self, hashed_key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let redis_key = self.redis_key(hashed_key);
        self.bounded(async move { conn.get(&redis_key).await })
            .await
    }
}
