pub mod auth;
pub mod config;
pub mod error;
pub mod hashing;
pub mod identity;
pub mod keys;
pub mod metrics;
pub mod observability;
pub mod ocr;
pub mod plan;
pub mod rate_limit;

use crate::auth::{basic_auth_middleware, BasicAuthenticator};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::hashing::HashingService;
use crate::identity::IdentityResolver;
use crate::keys::handler::{issue_key_handler, KeyEndpointState};
use crate::keys::{InMemoryKeyStore, KeyRegistry, KeyStore, RedisKeyStore};
use crate::metrics::{metrics_handler, MetricsService, MetricsState};
use crate::observability::request_id_middleware;
use crate::ocr::{ocr_handler, HttpTextExtractor, OcrState, TextExtractor};
use crate::plan::PlanResolver;
use crate::rate_limit::{
    admission_middleware, AdmissionGate, BucketCache, Clock, InMemoryBucketStore,
    RateLimiterService, SystemClock,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

const BUCKET_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Everything the router needs, built once at startup
#[derive(Clone)]
pub struct GatewayServices {
    pub authenticator: BasicAuthenticator,
    pub gate: AdmissionGate,
    pub keys: KeyEndpointState,
    pub ocr: OcrState,
    pub metrics: MetricsState,
    pub request_timeout: Duration,
}

impl GatewayServices {
    /// Connect the configured stores; Redis when a URL is set, process memory otherwise
    pub async fn from_config(config: &GatewayConfig, metrics: MetricsService) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let limiter = match &config.redis.bucket_url {
            Some(url) => {
                RateLimiterService::with_redis(
                    config.pricing.clone(),
                    &config.cache,
                    &config.redis,
                    url,
                    clock,
                )
                .await?
            }
            None => {
                warn!("No redis.bucket_url configured, buckets are local to this instance");
                let store = Arc::new(InMemoryBucketStore::new(clock));
                InMemoryBucketStore::spawn_purge_task(&store, BUCKET_PURGE_INTERVAL);
                RateLimiterService::new(
                    PlanResolver::new(config.pricing.clone()),
                    BucketCache::new(&config.cache),
                    store,
                )
            }
        };

        let key_store: Arc<dyn KeyStore> = match &config.redis.key_url {
            Some(url) => Arc::new(
                RedisKeyStore::connect(url, &config.redis.key_prefix, config.redis.timeout())
                    .await?,
            ),
            None => {
                warn!("No redis.key_url configured, issued keys live in memory");
                Arc::new(InMemoryKeyStore::new())
            }
        };

        let extractor = Arc::new(HttpTextExtractor::new(&config.ocr)?);

        Self::assemble(config, limiter, key_store, extractor, metrics)
    }

    /// Wire already-built stores into the gateway services
    pub fn assemble(
        config: &GatewayConfig,
        limiter: RateLimiterService,
        key_store: Arc<dyn KeyStore>,
        extractor: Arc<dyn TextExtractor>,
        metrics: MetricsService,
    ) -> Result<Self> {
        let hashing = Arc::new(HashingService::new(config.security.salt.clone()));
        let privileged_roles = Arc::new(config.security.privileged_roles.clone());
        let registry = KeyRegistry::new(key_store, hashing.clone());

        let resolver = IdentityResolver::new(&config.security, hashing)?;
        let mut gate = AdmissionGate::new(
            resolver,
            Arc::new(limiter),
            config.admission.on_store_error,
        );
        if config.admission.require_registered_keys {
            gate = gate.with_registered_keys(registry.clone());
        }

        Ok(Self {
            authenticator: BasicAuthenticator::new(&config.security.accounts),
            gate,
            keys: KeyEndpointState {
                registry,
                privileged_roles: privileged_roles.clone(),
            },
            ocr: OcrState { extractor },
            metrics: MetricsState {
                service: metrics,
                privileged_roles,
            },
            request_timeout: Duration::from_secs(config.server.timeout_secs),
        })
    }
}

/// Build the HTTP router. The admission gate guards only the OCR route.
pub fn build_router(services: GatewayServices) -> Router {
    let ocr_routes = Router::new()
        .route("/getOCR", post(ocr_handler))
        .route_layer(middleware::from_fn_with_state(
            services.gate,
            admission_middleware,
        ))
        .with_state(services.ocr);

    let key_routes = Router::new()
        .route("/key", get(issue_key_handler))
        .with_state(services.keys);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(services.metrics);

    Router::new()
        .route("/health", get(health_handler))
        .merge(ocr_routes)
        .merge(key_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn_with_state(
            services.authenticator,
            basic_auth_middleware,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TimeoutLayer::new(services.request_timeout))
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Initialize the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    // Validate configuration
    config.validate()?;

    info!("Starting OCR gateway");

    let metrics = MetricsService::new()?;
    let services = GatewayServices::from_config(&config, metrics).await?;
    let app = build_router(services);

    // Bind and serve
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(address = %addr, "Gateway ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
