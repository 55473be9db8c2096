use async_trait::async_trait;
use axum::{body::Body, extract::ConnectInfo, Router};
use base64::{engine::general_purpose::STANDARD, Engine};
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use ocr_gateway::{
    build_router,
    config::{AccountConfig, GatewayConfig, PlanQuota},
    error::Result,
    hashing::PasswordHasher,
    keys::InMemoryKeyStore,
    metrics::MetricsService,
    ocr::{ImageUpload, TextExtractor},
    rate_limit::{ManualClock, RateLimiterService},
    GatewayServices,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "GATEWAYTESTBOUNDARY";
const REMAINING: &str = "x-rate-limit-remaining";
const RETRY_AFTER: &str = "x-rate-limit-retry-after-seconds";

/// Counts OCR calls and answers with fixed text
#[derive(Default)]
struct CountingExtractor {
    calls: AtomicUsize,
}

#[async_trait]
impl TextExtractor for CountingExtractor {
    async fn extract_text(&self, _image: ImageUpload) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("HELLO WORLD".to_string())
    }
}

struct TestGateway {
    app: Router,
    clock: Arc<ManualClock>,
    extractor: Arc<CountingExtractor>,
}

fn account(username: &str, password: &str, roles: &[&str]) -> AccountConfig {
    AccountConfig {
        username: username.to_string(),
        password_hash: PasswordHasher::with_params(64, 1, 1)
            .unwrap()
            .hash(password)
            .unwrap(),
        roles: roles.iter().map(|r| r.to_string()).collect(),
    }
}

fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default_config();
    config.security.accounts = vec![
        account("admin", "admin-pass", &["ROLE_ADMIN"]),
        account("viewer", "viewer-pass", &["ROLE_VIEWER"]),
    ];
    config
}

fn setup(config: GatewayConfig) -> TestGateway {
    let clock = Arc::new(ManualClock::new(0));
    let extractor = Arc::new(CountingExtractor::default());

    let limiter =
        RateLimiterService::local_only(config.pricing.clone(), &config.cache, clock.clone());
    let services = GatewayServices::assemble(
        &config,
        limiter,
        Arc::new(InMemoryKeyStore::new()),
        extractor.clone(),
        MetricsService::detached(),
    )
    .unwrap();

    TestGateway {
        app: build_router(services),
        clock,
        extractor,
    }
}

fn peer(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().unwrap(), 40000)
}

fn basic(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", username, password))
    )
}

fn image_body(file_name: &str) -> String {
    format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\nfake-png-bytes\r\n--{b}--\r\n",
        b = BOUNDARY,
    )
}

/// Builder for `POST /getOCR` requests
struct OcrRequest {
    remote: Option<SocketAddr>,
    headers: Vec<(&'static str, String)>,
    file_name: &'static str,
}

impl OcrRequest {
    fn from(ip: &str) -> Self {
        Self {
            remote: Some(peer(ip)),
            headers: Vec::new(),
            file_name: "scan.png",
        }
    }

    fn anonymous() -> Self {
        Self {
            remote: None,
            headers: Vec::new(),
            file_name: "scan.png",
        }
    }

    fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn file_name(mut self, file_name: &'static str) -> Self {
        self.file_name = file_name;
        self
    }

    fn build(self) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/getOCR")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }

        let mut request = builder.body(Body::from(image_body(self.file_name))).unwrap();
        if let Some(remote) = self.remote {
            request.extensions_mut().insert(ConnectInfo(remote));
        }
        request
    }
}

async fn send(app: &Router, request: Request<Body>) -> http::Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

fn header(response: &http::Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .map(|v| v.to_str().unwrap().to_string())
}

async fn body_text(response: http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_free_plan_exhausts_and_refills() {
    let gateway = setup(test_config());

    let first = send(&gateway.app, OcrRequest::from("203.0.113.10").build()).await;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(header(&first, REMAINING).as_deref(), Some("0"));
    assert_eq!(body_text(first).await, "HELLO WORLD");

    let second = send(&gateway.app, OcrRequest::from("203.0.113.10").build()).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry: i64 = header(&second, RETRY_AFTER).unwrap().parse().unwrap();
    assert!((59..=60).contains(&retry));
    assert!(header(&second, REMAINING).is_none());

    let body: serde_json::Value = serde_json::from_str(&body_text(second).await).unwrap();
    assert_eq!(body["status"], 429);

    gateway.clock.advance(Duration::from_secs(61));

    let third = send(&gateway.app, OcrRequest::from("203.0.113.10").build()).await;
    assert_eq!(third.status(), StatusCode::OK);
    assert_eq!(header(&third, REMAINING).as_deref(), Some("0"));

    assert_eq!(gateway.extractor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_privileged_operator_is_never_limited() {
    let gateway = setup(test_config());
    let credentials = basic("admin", "admin-pass");

    for _ in 0..1000 {
        let response = send(
            &gateway.app,
            OcrRequest::from("203.0.113.11")
                .header("authorization", credentials.clone())
                .build(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, REMAINING).is_none());
    }
}

#[tokio::test]
async fn test_operator_without_privileged_role_is_limited() {
    let gateway = setup(test_config());
    let credentials = basic("viewer", "viewer-pass");

    let request = || {
        OcrRequest::from("203.0.113.12")
            .header("authorization", credentials.clone())
            .build()
    };

    assert_eq!(send(&gateway.app, request()).await.status(), StatusCode::OK);
    assert_eq!(
        send(&gateway.app, request()).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let gateway = setup(test_config());

    let response = send(
        &gateway.app,
        OcrRequest::from("203.0.113.13")
            .header("authorization", basic("admin", "guess"))
            .build(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(gateway.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let gateway = setup(test_config());

    let response = send(&gateway.app, OcrRequest::anonymous().build()).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(header(&response, REMAINING).is_none());
    assert_eq!(gateway.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_key_prefix_selects_plan() {
    let mut config = test_config();
    config.pricing.plans.basic = PlanQuota {
        capacity: 3,
        refill_tokens: 3,
    };
    config.pricing.plans.pro = PlanQuota {
        capacity: 5,
        refill_tokens: 5,
    };
    let gateway = setup(config);

    let with_key = |key: &str| {
        OcrRequest::from("203.0.113.14")
            .header("x-api-key", key)
            .build()
    };

    let basic = send(&gateway.app, with_key("PX-basic-key")).await;
    assert_eq!(header(&basic, REMAINING).as_deref(), Some("2"));

    let pro = send(&gateway.app, with_key("AX-pro-key")).await;
    assert_eq!(header(&pro, REMAINING).as_deref(), Some("4"));

    let pro = send(&gateway.app, with_key("PRO-issued-style")).await;
    assert_eq!(header(&pro, REMAINING).as_deref(), Some("4"));

    let free = send(&gateway.app, with_key("BASIC-issued-style")).await;
    assert_eq!(header(&free, REMAINING).as_deref(), Some("0"));
}

#[tokio::test]
async fn test_forwarded_for_identifies_client() {
    let gateway = setup(test_config());

    let via_proxy = send(
        &gateway.app,
        OcrRequest::from("10.0.0.1")
            .header("x-forwarded-for", "8.8.8.8, 10.0.0.1")
            .build(),
    )
    .await;
    assert_eq!(via_proxy.status(), StatusCode::OK);

    // Same client through another proxy shares the bucket
    let again = send(
        &gateway.app,
        OcrRequest::from("10.0.0.2")
            .header("x-forwarded-for", "8.8.8.8")
            .build(),
    )
    .await;
    assert_eq!(again.status(), StatusCode::TOO_MANY_REQUESTS);

    // An invalid forwarded entry falls back to the peer address
    let bogus = send(
        &gateway.app,
        OcrRequest::from("198.51.100.20")
            .header("x-forwarded-for", "not-an-ip, 10.0.0.1")
            .build(),
    )
    .await;
    assert_eq!(bogus.status(), StatusCode::OK);

    let direct = send(&gateway.app, OcrRequest::from("198.51.100.20").build()).await;
    assert_eq!(direct.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_admit_exactly_capacity() {
    let mut config = test_config();
    config.pricing.plans.free = PlanQuota {
        capacity: 5,
        refill_tokens: 1,
    };
    let gateway = setup(config);

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let app = gateway.app.clone();
            tokio::spawn(async move {
                app.oneshot(OcrRequest::from("203.0.113.15").build())
                    .await
                    .unwrap()
                    .status()
            })
        })
        .collect();

    let statuses: Vec<StatusCode> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|status| status.unwrap())
        .collect();

    let allowed = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let limited = statuses
        .iter()
        .filter(|s| **s == StatusCode::TOO_MANY_REQUESTS)
        .count();
    assert_eq!(allowed, 5);
    assert_eq!(limited, 45);
}

#[tokio::test]
async fn test_gate_runs_before_upload_validation() {
    let gateway = setup(test_config());

    let invalid = send(
        &gateway.app,
        OcrRequest::from("203.0.113.16").file_name("scan.gif").build(),
    )
    .await;
    assert_eq!(invalid.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(header(&invalid, REMAINING).as_deref(), Some("0"));

    let limited = send(&gateway.app, OcrRequest::from("203.0.113.16").build()).await;
    assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
}

fn key_request(plan: &str, credentials: Option<String>) -> Request<Body> {
    let mut builder = Request::builder().uri(format!("/key?plan={}", plan));
    if let Some(credentials) = credentials {
        builder = builder.header("authorization", credentials);
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_key_endpoint_requires_privileged_operator() {
    let gateway = setup(test_config());

    let anonymous = send(&gateway.app, key_request("PRO", None)).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let viewer = send(
        &gateway.app,
        key_request("PRO", Some(basic("viewer", "viewer-pass"))),
    )
    .await;
    assert_eq!(viewer.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_key_endpoint_checks_role_before_query() {
    let gateway = setup(test_config());
    let bare = |credentials: Option<String>| {
        let mut builder = Request::builder().uri("/key");
        if let Some(credentials) = credentials {
            builder = builder.header("authorization", credentials);
        }
        builder.body(Body::empty()).unwrap()
    };

    let anonymous = send(&gateway.app, bare(None)).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let viewer = send(&gateway.app, bare(Some(basic("viewer", "viewer-pass")))).await;
    assert_eq!(viewer.status(), StatusCode::FORBIDDEN);

    let admin = send(&gateway.app, bare(Some(basic("admin", "admin-pass")))).await;
    assert_eq!(admin.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(admin).await.contains("Invalid key type"));
}

#[tokio::test]
async fn test_key_endpoint_rejects_unknown_plan() {
    let gateway = setup(test_config());

    let response = send(
        &gateway.app,
        key_request("GOLD", Some(basic("admin", "admin-pass"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response).await.contains("Invalid key type"));
}

#[tokio::test]
async fn test_issued_key_is_metered_by_its_plan() {
    let mut config = test_config();
    config.admission.require_registered_keys = true;
    config.pricing.plans.pro = PlanQuota {
        capacity: 10,
        refill_tokens: 10,
    };
    let gateway = setup(config);

    let response = send(
        &gateway.app,
        key_request("PRO", Some(basic("admin", "admin-pass"))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(header(&response, "content-type")
        .unwrap()
        .starts_with("text/plain"));
    let raw_key = body_text(response).await;
    assert!(raw_key.starts_with("PRO-"));

    let admitted = send(
        &gateway.app,
        OcrRequest::from("203.0.113.17")
            .header("x-api-key", raw_key)
            .build(),
    )
    .await;
    assert_eq!(admitted.status(), StatusCode::OK);
    assert_eq!(header(&admitted, REMAINING).as_deref(), Some("9"));

    // An unregistered key is limited by address instead
    let forged = send(
        &gateway.app,
        OcrRequest::from("203.0.113.17")
            .header("x-api-key", "PRO-forged")
            .build(),
    )
    .await;
    assert_eq!(header(&forged, REMAINING).as_deref(), Some("0"));
}

#[tokio::test]
async fn test_health_and_request_id() {
    let gateway = setup(test_config());

    let response = send(
        &gateway.app,
        Request::builder()
            .uri("/health")
            .header("x-request-id", "req-42")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-request-id").as_deref(), Some("req-42"));
    assert_eq!(body_text(response).await, "OK");
}

#[tokio::test]
async fn test_health_is_not_rate_limited() {
    let gateway = setup(test_config());

    for _ in 0..10 {
        let mut request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(peer("203.0.113.18")));
        assert_eq!(send(&gateway.app, request).await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_metrics_endpoint_for_admin() {
    let gateway = setup(test_config());

    let request = |credentials: Option<String>| {
        let mut builder = Request::builder().uri("/metrics");
        if let Some(credentials) = credentials {
            builder = builder.header("authorization", credentials);
        }
        builder.body(Body::empty()).unwrap()
    };

    assert_eq!(
        send(&gateway.app, request(None)).await.status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        send(&gateway.app, request(Some(basic("admin", "admin-pass"))))
            .await
            .status(),
        StatusCode::OK
    );
}
