//! One-way digests for API keys, client addresses and operator passwords.
//!
//! Everything that identifies a caller is hashed with a server-side salt before
//! it is used as a storage key, so the stores never see a usable key or a raw
//! client address. Operator passwords are Argon2id PHC strings with their own
//! per-password salt.

use crate::error::{GatewayError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
};
use secrecy::{ExposeSecret, Secret, SecretString};
use sha2::{Digest, Sha256};

/// SHA-256 hashing with a fixed server-side salt
pub struct HashingService {
    salt: SecretString,
}

impl HashingService {
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: Secret::new(salt.into()),
        }
    }

    /// Unsalted lowercase hex SHA-256
    pub fn hash(&self, input: &str) -> String {
        hex_digest(input.as_bytes())
    }

    /// Lowercase hex SHA-256 of `input` followed by the server salt
    pub fn salted_hash(&self, input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        hasher.update(self.salt.expose_secret().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl std::fmt::Debug for HashingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashingService")
            .field("salt", &"[REDACTED]")
            .finish()
    }
}

/// Lowercase hex SHA-256 of raw bytes
pub fn hex_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Argon2id hashing for operator passwords
#[derive(Debug, Clone, Default)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// Argon2 default cost: 19 MiB, 2 iterations, 1 lane
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| GatewayError::Config(format!("Invalid Argon2 parameters: {}", e)))?;
        Ok(Self { params })
    }

    /// PHC string for `password` under a fresh random salt
    pub fn hash(&self, password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| GatewayError::Internal(format!("Failed to hash password: {}", e)))
    }

    /// Check `password` against a PHC string. Cost parameters are read from the
    /// string; unparseable hashes never verify.
    pub fn verify(&self, password: &str, hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(hash) else {
            return false;
        };

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }
}
