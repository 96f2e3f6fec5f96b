//! Route definitions for the `/admin` resource.

use axum::routing::{delete, get};
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// GET    /breakers                -> list_breakers
/// DELETE /cache                   -> invalidate_cache
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/breakers", get(admin::list_breakers))
        .route("/cache", delete(admin::invalidate_cache))
}
