//! Operator authentication.
//!
//! Accounts come from configuration and are checked with HTTP basic auth. A
//! successful login inserts a [`Principal`] into the request extensions, where
//! the admission gate and the key endpoint read its roles.

use crate::config::AccountConfig;
use crate::error::{GatewayError, Result};
use crate::hashing::PasswordHasher;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Answers role membership for the current caller
pub trait RoleChecker {
    fn has_role(&self, name: &str) -> bool;
}

/// Authenticated operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub roles: Vec<String>,
}

impl RoleChecker for Principal {
    fn has_role(&self, name: &str) -> bool {
        self.roles.iter().any(|role| role == name)
    }
}

/// Anonymous callers hold no roles
impl<T: RoleChecker> RoleChecker for Option<T> {
    fn has_role(&self, name: &str) -> bool {
        self.as_ref().is_some_and(|checker| checker.has_role(name))
    }
}

/// Basic-auth validator over the configured accounts
#[derive(Debug, Clone)]
pub struct BasicAuthenticator {
    accounts: Arc<HashMap<String, AccountConfig>>,
    hasher: PasswordHasher,
}

impl BasicAuthenticator {
    pub fn new(accounts: &[AccountConfig]) -> Self {
        let accounts = accounts
            .iter()
            .map(|account| (account.username.clone(), account.clone()))
            .collect();

        Self {
            accounts: Arc::new(accounts),
            hasher: PasswordHasher::new(),
        }
    }

    /// Authenticate the `Authorization` header, if any.
    ///
    /// Returns `Ok(None)` for anonymous requests and an error for malformed or
    /// wrong credentials.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Principal>> {
        let Some(value) = headers.get(AUTHORIZATION) else {
            return Ok(None);
        };

        let value = value
            .to_str()
            .map_err(|_| GatewayError::InvalidCredentials)?;
        let encoded = value
            .strip_prefix("Basic ")
            .ok_or(GatewayError::MissingCredentials)?;
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| GatewayError::InvalidCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| GatewayError::InvalidCredentials)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(GatewayError::InvalidCredentials)?;

        let account = self
            .accounts
            .get(username)
            .ok_or(GatewayError::InvalidCredentials)?;

        if !self.hasher.verify(password, &account.password_hash) {
            return Err(GatewayError::InvalidCredentials);
        }

        Ok(Some(Principal {
            username: account.username.clone(),
            roles: account.roles.clone(),
        }))
    }
}

/// Axum middleware attaching a [`Principal`] to authenticated requests.
///
/// Password verification is CPU-bound and runs on the blocking pool.
pub async fn basic_auth_middleware(
    State(authenticator): State<BasicAuthenticator>,
    mut request: Request,
    next: Next,
) -> Response {
    if !request.headers().contains_key(AUTHORIZATION) {
        return next.run(request).await;
    }

    let headers = request.headers().clone();
    let outcome = tokio::task::spawn_blocking(move || authenticator.authenticate(&headers))
        .await
        .unwrap_or_else(|e| Err(GatewayError::Internal(format!("Auth task failed: {}", e))));

    match outcome {
        Ok(Some(principal)) => {
            debug!(username = %principal.username, "Authenticated operator");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(e) => {
            warn!(error = %e, "Rejected basic auth credentials");
            e.into_response()
        }
    }
}

/// Require one of `roles`; anonymous callers get 401, others 403
pub fn require_any_role(principal: Option<&Principal>, roles: &[String]) -> Result<()> {
    let principal = principal.ok_or(GatewayError::MissingCredentials)?;
    if roles.iter().any(|role| principal.has_role(role)) {
        Ok(())
    } else {
        Err(GatewayError::Forbidden(format!(
            "{} lacks a privileged role",
            principal.username
        )))
    }
}
