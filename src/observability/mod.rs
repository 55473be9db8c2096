use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Request as HttpRequest},
    middleware::Next,
    response::Response,
};
use tracing::{info, Span};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::LogFormat;
use crate::error::{GatewayError, Result};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const DEFAULT_FILTER: &str = "ocr_gateway=debug,tower_http=debug";

/// Initialize tracing in the configured output format.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let installed = match format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .with_current_span(true)
            .try_init(),
    };

    installed
        .map_err(|e| GatewayError::Internal(format!("Failed to install subscriber: {}", e)))?;

    info!(format = ?format, "Tracing initialized");
    Ok(())
}

/// Middleware to add request ID to requests
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    // Reuse the caller's request ID when it is a valid header value
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Span::current().record("request_id", request_id.as_str());

    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Request ID extension type
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Extract request ID from request extensions
pub fn get_request_id(req: &HttpRequest<Body>) -> Option<String> {
    req.extensions().get::<RequestId>().map(|id| id.0.clone())
}
