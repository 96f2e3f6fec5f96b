//! Handlers for the `/admin` resource (breaker status, cache invalidation).
//!
//! All handlers require [`AdminAccess`].

use axum::extract::State;
use axum::Json;
use dermalens_pipeline::BreakerSnapshot;
use dermalens_store::StoreError;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::admin::AdminAccess;
use crate::state::AppState;

/// Request body for `DELETE /admin/cache`.
#[derive(Debug, Deserialize)]
pub struct InvalidateCacheRequest {
    /// Glob over cache keys, `*` matching any run of characters.
    pub pattern: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateCacheResponse {
    pub invalidated: u64,
}

/// GET /api/v1/admin/breakers
pub async fn list_breakers(
    State(state): State<AppState>,
    _admin: AdminAccess,
) -> Json<Vec<BreakerSnapshot>> {
    Json(state.orchestrator.breakers().snapshots())
}

/// DELETE /api/v1/admin/cache
///
/// Drop every cached result whose key matches `pattern`, in both tiers.
pub async fn invalidate_cache(
    State(state): State<AppState>,
    _admin: AdminAccess,
    Json(input): Json<InvalidateCacheRequest>,
) -> AppResult<Json<InvalidateCacheResponse>> {
    let pattern = input.pattern.trim();
    if pattern.is_empty() {
        return Err(AppError::BadRequest("pattern must not be empty".into()));
    }

    let invalidated = state
        .orchestrator
        .cache()
        .invalidate(pattern)
        .await
        .map_err(|e| match e {
            StoreError::Pattern(msg) => AppError::BadRequest(msg),
            other => AppError::InternalError(format!("Cache invalidation failed: {other}")),
        })?;

    Ok(Json(InvalidateCacheResponse { invalidated }))
}
