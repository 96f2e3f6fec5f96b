#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use dermalens_core::image_source::{ImageSourcePolicy, DEFAULT_TRUSTED_HOST};
use dermalens_core::types::AppEnv;
use dermalens_detectors::stub::StubSet;
use dermalens_pipeline::{Backoff, Orchestrator, PipelineConfig};
use dermalens_store::{
    CacheConfig, JobQueue, MemoryCounterStore, MemoryJobQueue, RateLimiter, ResponseCache,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use dermalens_api::config::{RateLimitConfig, ServerConfig};
use dermalens_api::router::build_app_router;
use dermalens_api::state::AppState;

/// An image URL on trusted storage, accepted in every environment.
pub const IMAGE_URL: &str = "https://acct.blob.core.windows.net/uploads/face.jpg";

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default),
/// the default 60-second request timeout and a generous rate limit.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 60,
        app_env: AppEnv::Development,
        redis_url: None,
        rate_limit: RateLimitConfig {
            max_requests: 100,
            window: Duration::from_secs(60),
            bypass: false,
        },
        trusted_hosts: vec![DEFAULT_TRUSTED_HOST.to_string()],
        queue_key: "test:jobs".to_string(),
        admin_token: None,
    }
}

/// A running test application and handles to its collaborators.
pub struct TestApp {
    pub router: Router,
    pub stubs: StubSet,
    pub cache: Arc<ResponseCache>,
    pub queue: Option<Arc<MemoryJobQueue>>,
}

/// Options for [`build_test_app_with`].
#[derive(Default)]
pub struct TestOptions {
    pub config: Option<ServerConfig>,
    /// Attach an in-memory job queue.
    pub with_queue: bool,
}

/// Build the full application router around healthy stub detectors.
pub fn build_test_app() -> TestApp {
    build_test_app_with(TestOptions::default())
}

/// Build the full application router with all middleware layers.
///
/// This mirrors the composition in `main.rs`, replacing the detectors with
/// in-process stubs, the store with local tiers, and disabling retry backoff
/// so failure paths run instantly.
pub fn build_test_app_with(options: TestOptions) -> TestApp {
    let config = options.config.unwrap_or_else(test_config);
    let stubs = StubSet::healthy();
    let cache = Arc::new(ResponseCache::local_only(CacheConfig::default()));

    let pipeline = PipelineConfig {
        backoff: Backoff::none(),
        ..PipelineConfig::default()
    };
    pipeline
        .check_request_timeout(config.request_timeout())
        .expect("pipeline deadlines must fit the request timeout");
    let orchestrator = Orchestrator::new(stubs.detector_set(), cache.clone(), &pipeline);

    let rate_limiter = if config.rate_limit.bypass {
        RateLimiter::bypass()
    } else {
        RateLimiter::new(Arc::new(MemoryCounterStore::new()))
    };

    let queue = options.with_queue.then(|| Arc::new(MemoryJobQueue::new()));

    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::new(orchestrator),
        rate_limiter: Arc::new(rate_limiter),
        image_policy: Arc::new(ImageSourcePolicy::for_env(
            config.app_env,
            config.trusted_hosts.clone(),
        )),
        job_queue: queue.clone().map(|q| q as Arc<dyn JobQueue>),
        store: None,
    };

    TestApp {
        router: build_app_router(state, &config),
        stubs,
        cache,
        queue,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: &Router, uri: &str) -> Response {
    send(app, Request::builder().method(Method::GET).uri(uri), Body::empty()).await
}

pub async fn post_json(app: &Router, uri: &str, body: Value) -> Response {
    send_json(app, Method::POST, uri, body, &[]).await
}

pub async fn delete_json(app: &Router, uri: &str, body: Value) -> Response {
    send_json(app, Method::DELETE, uri, body, &[]).await
}

pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> Response {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder, Body::from(body.to_string())).await
}

async fn send(app: &Router, builder: axum::http::request::Builder, body: Body) -> Response {
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
