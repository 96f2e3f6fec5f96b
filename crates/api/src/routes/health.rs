use axum::extract::State;
use axum::{routing::get, Json, Router};
use dermalens_pipeline::CircuitState;
use futures::future::OptionFuture;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the store is unreachable or a breaker is open.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the shared store answers. `true` when running without one.
    pub store_healthy: bool,
    pub breakers: Vec<BreakerHealth>,
}

#[derive(Serialize)]
pub struct BreakerHealth {
    pub name: String,
    pub state: CircuitState,
}

/// GET /health -- returns service, store and breaker health. Always 200.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_healthy = OptionFuture::from(state.store.as_ref().map(dermalens_store::health_check))
        .await
        .is_none_or(|ping| ping.is_ok());

    let breakers: Vec<BreakerHealth> = state
        .orchestrator
        .breakers()
        .all()
        .into_iter()
        .map(|b| BreakerHealth {
            name: b.name().to_string(),
            state: b.state(),
        })
        .collect();

    let any_open = breakers.iter().any(|b| b.state == CircuitState::Open);
    let status = if store_healthy && !any_open {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        store_healthy,
        breakers,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
