//! Caller identity resolution.
//!
//! Rules, first match wins:
//!
//! 1. a caller holding a privileged role is [`Identity::Privileged`]
//! 2. a non-empty API key header yields [`Identity::ApiKey`], registered or not
//! 3. otherwise the client IP: the first `X-Forwarded-For` entry when it is a
//!    valid address, else the directly observed peer address
//!
//! When none of these apply the request has no identity and must be rejected.

use crate::auth::RoleChecker;
use crate::config::SecurityConfig;
use crate::error::{GatewayError, Result};
use crate::hashing::HashingService;
use axum::http::{HeaderMap, HeaderName};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Caller identified by an API key. Only the salted hash is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyIdentity {
    pub hashed_key: String,
    /// First two characters of the raw key, used for plan lookup
    pub key_prefix: String,
}

/// Caller identified by client address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpIdentity {
    pub addr: IpAddr,
    /// Salted hash of the normalized address
    pub hashed: String,
}

/// Resolved caller reference, the rate-limit partition key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    ApiKey(ApiKeyIdentity),
    Ip(IpIdentity),
    Privileged,
}

impl Identity {
    pub fn kind(&self) -> &'static str {
        match self {
            Identity::ApiKey(_) => "api_key",
            Identity::Ip(_) => "ip",
            Identity::Privileged => "privileged",
        }
    }
}

/// Resolves request metadata into an [`Identity`]
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    api_key_header: HeaderName,
    privileged_roles: Vec<String>,
    hashing: Arc<HashingService>,
}

impl IdentityResolver {
    pub fn new(config: &SecurityConfig, hashing: Arc<HashingService>) -> Result<Self> {
        let api_key_header = config.api_key_header.parse::<HeaderName>().map_err(|e| {
            GatewayError::Config(format!(
                "Invalid API key header '{}': {}",
                config.api_key_header, e
            ))
        })?;

        Ok(Self {
            api_key_header,
            privileged_roles: config.privileged_roles.clone(),
            hashing,
        })
    }

    /// Resolve the caller's identity
    pub fn resolve(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<IpAddr>,
        roles: &impl RoleChecker,
    ) -> Result<Identity> {
        if self.is_privileged(roles) {
            return Ok(Identity::Privileged);
        }

        if let Some(raw_key) = self.api_key(headers) {
            return Ok(self.key_identity(raw_key));
        }

        self.resolve_client_ip(headers, remote_addr)
            .map(Identity::Ip)
            .ok_or(GatewayError::MissingIdentity)
    }

    pub fn is_privileged(&self, roles: &impl RoleChecker) -> bool {
        self.privileged_roles.iter().any(|role| roles.has_role(role))
    }

    /// Raw API key from the configured header, if present and non-empty
    pub fn api_key<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        headers
            .get(&self.api_key_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn key_identity(&self, raw_key: &str) -> Identity {
        Identity::ApiKey(ApiKeyIdentity {
            hashed_key: self.hashing.salted_hash(raw_key),
            key_prefix: raw_key.chars().take(2).collect(),
        })
    }

    /// Client address identity, ignoring any API key
    pub fn resolve_client_ip(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<IpAddr>,
    ) -> Option<IpIdentity> {
        let addr = client_ip(headers, remote_addr)?;
        Some(IpIdentity {
            addr,
            hashed: self.hashing.salted_hash(&addr.to_string()),
        })
    }
}

/// First forwarded-for entry when it is a valid address, else the peer address
pub fn client_ip(headers: &HeaderMap, remote_addr: Option<IpAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|candidate| !candidate.is_empty());

    match forwarded {
        Some(candidate) => match parse_strict_ip(candidate) {
            Some(addr) => Some(addr),
            None => {
                debug!(candidate = %candidate, "Ignoring malformed forwarded address");
                remote_addr
            }
        },
        None => remote_addr,
    }
}

/// Parse a bare IPv4 or IPv6 address; ports, brackets and zone ids are rejected
pub fn parse_strict_ip(candidate: &str) -> Option<IpAddr> {
    candidate.parse::<IpAddr>().ok()
}
