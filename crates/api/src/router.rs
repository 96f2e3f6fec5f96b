//! HTTP surface of the inference service.
//!
//! [`build_app_router`] is shared by `main.rs` and `tests/common/mod.rs`, so
//! the integration tests run behind the same layers as production. Layers
//! wrap outermost first:
//!
//! ```text
//! set request id ─▶ trace ─▶ propagate request id ─▶ cors ─▶ catch panic ─▶ timeout ─▶ routes
//! ```
//!
//! The id is assigned before the trace span opens so every log line of a
//! request carries it, and CORS sits inside the trace so preflights are
//! logged too. `POST /infer` additionally sits behind the rate limiter. Its
//! pipeline runs detached from the request, so the timeout bounds how long a
//! client waits, not how long the fan-out runs.

use std::time::Duration;

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, Request, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{Level, Span};

use crate::config::ServerConfig;
use crate::middleware::rate_limit::USER_ID_HEADER;
use crate::routes;
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application [`Router`]: health, inference and admin routes
/// behind the shared middleware stack.
pub fn build_app_router(state: AppState, config: &ServerConfig) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let middleware = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(PropagateRequestIdLayer::new(request_id))
        .layer(cors_layer(config))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ));

    Router::new()
        .merge(routes::health::router())
        .merge(routes::inference::router(state.clone()))
        .nest("/api/v1", routes::api_routes())
        .layer(middleware)
        .with_state(state)
}

/// One span per request, tagged with the id set by the outer layer.
fn request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "request",
        method = %request.method(),
        uri = %request.uri(),
        request_id,
    )
}

/// CORS for the browser upload client: the inference and admin verbs, plus
/// the user header the rate limiter keys on.
///
/// Panics at startup on an unparsable origin.
pub fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<_> = config
        .cors_origins
        .iter()
        .map(|o| {
            o.parse()
                .unwrap_or_else(|e| panic!("Invalid CORS origin '{o}': {e}"))
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(USER_ID_HEADER),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
