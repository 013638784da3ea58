use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use quotaguard::ratelimit::{Bucket, FailurePolicy, Identity, RateLimitConfig, RateLimiter};
use quotaguard::store::{BucketStore, StoreError, StoreKind, StoreResult};
use quotaguard::web::with_rate_limit;

/// Stands in for an authentication layer: trusts an `x-user` header.
async fn authenticate(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get("x-user")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    if let Some(user) = user {
        request.extensions_mut().insert(Identity::new(user));
    }
    next.run(request).await
}

fn routes() -> Router {
    Router::new()
        .route("/", get(|| async { "Hello!" }).options(|| async { StatusCode::NO_CONTENT }))
        .route("/api/a", get(|| async { "a" }))
        .route("/api/b", get(|| async { "b" }))
}

fn app_with(limiter: RateLimiter) -> Router {
    with_rate_limit(routes(), Arc::new(limiter)).layer(middleware::from_fn(authenticate))
}

fn app(config: RateLimitConfig) -> Router {
    app_with(RateLimiter::new(config).unwrap())
}

async fn send(app: &Router, method: Method, path: &str, headers: &[(&str, &str)]) -> Response {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    app.clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_path(app: &Router, path: &str) -> StatusCode {
    send(app, Method::GET, path, &[]).await.status()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_default_quota_then_refill() {
    let app = app(RateLimitConfig::with_default_quota(100, 60));

    for i in 1..=100 {
        assert_eq!(get_path(&app, "/").await, StatusCode::OK, "request {} should pass", i);
    }

    let response = send(&app, Method::GET, "/", &[]).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    assert!(response.headers().contains_key("retry-after"));
    assert!(response.headers().contains_key("x-ratelimit-reset"));

    let body = body_json(response).await;
    assert_eq!(body["status"], false);
    assert_eq!(body["message"], "Too Many Requests");
    assert!(body["detail"]
        .as_str()
        .unwrap()
        .starts_with("Rate limit exceeded. Retry after "));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(get_path(&app, "/").await, StatusCode::OK);
}

#[tokio::test]
async fn test_options_never_limited() {
    let app = app(RateLimitConfig::with_default_quota(1, 60));

    assert_eq!(get_path(&app, "/").await, StatusCode::OK);
    assert_eq!(get_path(&app, "/").await, StatusCode::TOO_MANY_REQUESTS);

    for _ in 0..10 {
        let response = send(&app, Method::OPTIONS, "/", &[]).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn test_path_overrides_are_isolated() {
    let config = RateLimitConfig::with_default_quota(100, 60)
        .with_override("/api/a", 3, 60)
        .with_override("/api/b", 10, 60);
    let app = app(config);

    for _ in 0..3 {
        assert_eq!(get_path(&app, "/api/a").await, StatusCode::OK);
    }
    let response = send(&app, Method::GET, "/api/a", &[]).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "3");

    for _ in 0..10 {
        assert_eq!(get_path(&app, "/api/b").await, StatusCode::OK);
    }
    assert_eq!(get_path(&app, "/api/b").await, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_users_do_not_share_buckets() {
    let app = app(RateLimitConfig::with_default_quota(2, 60));
    let alice = [("x-user", "alice"), ("x-forwarded-for", "10.0.0.1")];
    let bob = [("x-user", "bob"), ("x-forwarded-for", "10.0.0.1")];

    for _ in 0..2 {
        assert_eq!(send(&app, Method::GET, "/", &alice).await.status(), StatusCode::OK);
    }
    assert_eq!(
        send(&app, Method::GET, "/", &alice).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    for _ in 0..2 {
        assert_eq!(send(&app, Method::GET, "/", &bob).await.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_per_user_disabled_keys_by_address() {
    let config = RateLimitConfig {
        limit_per_user: false,
        ..RateLimitConfig::with_default_quota(2, 60)
    };
    let app = app(config);

    let alice = [("x-user", "alice"), ("x-forwarded-for", "10.0.0.1")];
    let bob = [("x-user", "bob"), ("x-forwarded-for", "10.0.0.1")];

    assert_eq!(send(&app, Method::GET, "/", &alice).await.status(), StatusCode::OK);
    assert_eq!(send(&app, Method::GET, "/", &bob).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, Method::GET, "/", &alice).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_bearer_tokens_tracked_separately() {
    let app = app(RateLimitConfig::with_default_quota(1, 60));
    let first = [("authorization", "Bearer token-one"), ("x-real-ip", "10.0.0.5")];
    let second = [("authorization", "Bearer token-two"), ("x-real-ip", "10.0.0.5")];

    assert_eq!(send(&app, Method::GET, "/", &first).await.status(), StatusCode::OK);
    assert_eq!(send(&app, Method::GET, "/", &second).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, Method::GET, "/", &first).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_forwarded_clients_tracked_separately() {
    let app = app(RateLimitConfig::with_default_quota(1, 60));

    let a = [("x-forwarded-for", "203.0.113.1, 10.0.0.1")];
    let b = [("x-forwarded-for", "203.0.113.2, 10.0.0.1")];

    assert_eq!(send(&app, Method::GET, "/", &a).await.status(), StatusCode::OK);
    assert_eq!(send(&app, Method::GET, "/", &b).await.status(), StatusCode::OK);
    assert_eq!(
        send(&app, Method::GET, "/", &a).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

struct DownStore;

#[async_trait]
impl BucketStore for DownStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Shared
    }

    async fn get_bucket(&self, _key: &str) -> StoreResult<Option<Bucket>> {
        Err(StoreError::Timeout(Duration::from_millis(100)))
    }

    async fn set_bucket(&self, _key: &str, _bucket: Bucket, _ttl: Option<Duration>) -> StoreResult<()> {
        Err(StoreError::Timeout(Duration::from_millis(100)))
    }

    async fn delete_bucket(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Timeout(Duration::from_millis(100)))
    }

    async fn get_last_path(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(StoreError::Timeout(Duration::from_millis(100)))
    }
}

#[tokio::test]
async fn test_store_down_fail_open() {
    let limiter = RateLimiter::with_store(
        RateLimitConfig::with_default_quota(1, 60),
        Arc::new(DownStore),
    )
    .unwrap();
    let app = app_with(limiter);

    for _ in 0..3 {
        assert_eq!(get_path(&app, "/").await, StatusCode::OK);
    }
}

#[tokio::test]
async fn test_store_down_fail_closed() {
    let config = RateLimitConfig {
        failure_policy: FailurePolicy::Closed,
        ..RateLimitConfig::default()
    };
    let app = app_with(RateLimiter::with_store(config, Arc::new(DownStore)).unwrap());

    let response = send(&app, Method::GET, "/", &[]).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Rate limiter backend unavailable.");
}
