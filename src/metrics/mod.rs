use crate::auth::{require_any_role, Principal};
use crate::error::{GatewayError, Result};
use axum::{
    extract::State,
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    Extension,
};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the Prometheus recorder as the global recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        // Register all metrics with descriptions
        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// A recorder that is not installed globally (for testing)
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: Arc::new(recorder.handle()),
        }
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "ocr_gateway_admission_total",
            "Admission decisions on the OCR route, labelled by outcome"
        );
        describe_counter!(
            "ocr_gateway_keys_issued_total",
            "API keys issued, labelled by plan"
        );
        describe_counter!(
            "ocr_gateway_store_errors_total",
            "Bucket store calls that failed or timed out"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[derive(Clone)]
pub struct MetricsState {
    pub service: MetricsService,
    pub privileged_roles: Arc<Vec<String>>,
}

/// Metrics endpoint handler, restricted to privileged operators
pub async fn metrics_handler(
    State(state): State<MetricsState>,
    principal: Option<Extension<Principal>>,
) -> Result<impl IntoResponse> {
    let principal = principal.map(|Extension(p)| p);
    require_any_role(principal.as_ref(), &state.privileged_roles)?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.service.render(),
    ))
}
