use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No API key or valid client address on request")]
    MissingIdentity,

    #[error("Missing authentication credentials")]
    MissingCredentials,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid key type: {0}")]
    InvalidPlan(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Unsupported media: {0}")]
    UnsupportedMedia(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Key issuance failed: {0}")]
    KeyIssuance(String),

    #[error("OCR backend error: {0}")]
    Ocr(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::MissingIdentity => StatusCode::UNAUTHORIZED,
            GatewayError::MissingCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::InvalidPlan(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            GatewayError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            GatewayError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::KeyIssuance(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Ocr(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::StoreUnavailable(err.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::MissingIdentity.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::StoreUnavailable("timeout".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::UnsupportedMedia("gif".to_string()).status_code(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            GatewayError::InvalidPlan("GOLD".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::InvalidPlan("GOLD".to_string());
        assert_eq!(err.to_string(), "Invalid key type: GOLD");
    }

    #[test]
    fn test_redis_error_maps_to_store_unavailable() {
        let err: GatewayError =
            redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
