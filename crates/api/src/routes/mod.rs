pub mod admin;
pub mod health;
pub mod inference;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /admin/breakers                                   breaker snapshots (GET)
/// /admin/cache                                      invalidate by glob (DELETE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/admin", admin::router())
}
