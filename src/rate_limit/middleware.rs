use super::service::RateLimiterService;
use super::types::RateLimitDecision;
use crate::auth::{Principal, RoleChecker};
use crate::config::StoreErrorPolicy;
use crate::error::{GatewayError, Result};
use crate::identity::{Identity, IdentityResolver};
use crate::keys::KeyRegistry;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-rate-limit-remaining");
pub const RETRY_AFTER_HEADER: HeaderName =
    HeaderName::from_static("x-rate-limit-retry-after-seconds");

/// Outcome of the admission check for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Privileged caller; no bucket was touched
    Privileged,
    Allowed(RateLimitDecision),
    Limited(RateLimitDecision),
    /// Bucket store unavailable and the policy lets the request through
    Unmetered,
}

impl Admission {
    fn outcome(&self) -> &'static str {
        match self {
            Admission::Privileged => "privileged",
            Admission::Allowed(_) => "allowed",
            Admission::Limited(_) => "limited",
            Admission::Unmetered => "unmetered",
        }
    }
}

/// Admission control in front of the OCR operation
#[derive(Clone)]
pub struct AdmissionGate {
    resolver: IdentityResolver,
    limiter: Arc<RateLimiterService>,
    /// Set when only registered keys count as key identities
    registry: Option<KeyRegistry>,
    on_store_error: StoreErrorPolicy,
}

impl AdmissionGate {
    pub fn new(
        resolver: IdentityResolver,
        limiter: Arc<RateLimiterService>,
        on_store_error: StoreErrorPolicy,
    ) -> Self {
        Self {
            resolver,
            limiter,
            registry: None,
            on_store_error,
        }
    }

    /// Ignore API keys the registry does not know
    pub fn with_registered_keys(mut self, registry: KeyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Decide whether a request may run
    pub async fn admit(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<IpAddr>,
        roles: &impl RoleChecker,
    ) -> Result<Admission> {
        let result = self.decide(headers, remote_addr, roles).await;

        let result = match result {
            Err(GatewayError::StoreUnavailable(reason)) => {
                metrics::counter!("ocr_gateway_store_errors_total").increment(1);
                match self.on_store_error {
                    StoreErrorPolicy::FailOpen => {
                        warn!(error = %reason, "Bucket store unavailable, admitting unmetered");
                        Ok(Admission::Unmetered)
                    }
                    StoreErrorPolicy::FailClosed => {
                        warn!(error = %reason, "Bucket store unavailable, rejecting");
                        Err(GatewayError::StoreUnavailable(reason))
                    }
                }
            }
            other => other,
        };

        let outcome = match &result {
            Ok(admission) => admission.outcome(),
            Err(GatewayError::StoreUnavailable(_)) => "unavailable",
            Err(_) => "unidentified",
        };
        metrics::counter!("ocr_gateway_admission_total", "outcome" => outcome).increment(1);

        result
    }

    async fn decide(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<IpAddr>,
        roles: &impl RoleChecker,
    ) -> Result<Admission> {
        let identity = self.identify(headers, remote_addr, roles).await?;
        debug!(kind = identity.kind(), "Resolved caller identity");

        match self.limiter.check(&identity).await? {
            None => Ok(Admission::Privileged),
            Some(decision) if decision.allowed => Ok(Admission::Allowed(decision)),
            Some(decision) => {
                warn!(
                    kind = identity.kind(),
                    retry_after = decision.retry_after_seconds,
                    "Rate limit exceeded"
                );
                Ok(Admission::Limited(decision))
            }
        }
    }

    async fn identify(
        &self,
        headers: &HeaderMap,
        remote_addr: Option<IpAddr>,
        roles: &impl RoleChecker,
    ) -> Result<Identity> {
        let Some(registry) = &self.registry else {
            return self.resolver.resolve(headers, remote_addr, roles);
        };

        if self.resolver.is_privileged(roles) {
            return Ok(Identity::Privileged);
        }

        if let Some(raw_key) = self.resolver.api_key(headers) {
            if registry.is_valid(raw_key).await? {
                return Ok(self.resolver.key_identity(raw_key));
            }
            debug!("Unregistered API key, falling back to client address");
        }

        self.resolver
            .resolve_client_ip(headers, remote_addr)
            .map(Identity::Ip)
            .ok_or(GatewayError::MissingIdentity)
    }
}

/// Create a 429 Too Many Requests response with the retry header
pub fn create_rate_limit_response(decision: &RateLimitDecision) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(RETRY_AFTER_HEADER, HeaderValue::from(decision.retry_after_seconds));

    let body = serde_json::json!({
        "error": "Rate limit exceeded",
        "status": StatusCode::TOO_MANY_REQUESTS.as_u16(),
        "retry_after_seconds": decision.retry_after_seconds,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, axum::Json(body)).into_response()
}

/// Add the remaining-tokens header to an admitted response
pub fn add_rate_limit_headers(mut response: Response, remaining: i64) -> Response {
    response
        .headers_mut()
        .insert(REMAINING_HEADER, HeaderValue::from(remaining));
    response
}

/// Axum middleware running the admission gate
pub async fn admission_middleware(
    State(gate): State<AdmissionGate>,
    request: Request,
    next: Next,
) -> Response {
    let remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let principal = request.extensions().get::<Principal>().cloned();

    match gate.admit(request.headers(), remote_addr, &principal).await {
        Ok(Admission::Privileged) | Ok(Admission::Unmetered) => next.run(request).await,
        Ok(Admission::Allowed(decision)) => {
            let response = next.run(request).await;
            add_rate_limit_headers(response, decision.remaining_tokens)
        }
        Ok(Admission::Limited(decision)) => create_rate_limit_response(&decision),
        Err(e) => e.into_response(),
    }
}
