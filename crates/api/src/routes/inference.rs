//! Route definition for the inference endpoint.

use axum::routing::post;
use axum::Router;

use crate::handlers::inference;
use crate::middleware::rate_limit;
use crate::state::AppState;

/// Routes mounted at the root.
///
/// ```text
/// POST   /infer                   -> infer (rate limited)
/// ```
pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/infer", post(inference::infer))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            rate_limit::enforce,
        ))
}
