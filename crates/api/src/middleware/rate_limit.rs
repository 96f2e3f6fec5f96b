//! Front-door rate limiting for the inference route.
//!
//! Clients are identified by the `x-user-id` header, falling back to the
//! first address in `x-forwarded-for`. Denied requests get a 429 from
//! [`AppError::RateLimited`]; allowed ones carry the same `X-RateLimit-*`
//! headers on their response.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{insert_rate_limit_headers, AppError};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const ANONYMOUS: &str = "anonymous";

/// Count the request against its client's window before running the handler.
pub async fn enforce(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.rate_limiter.is_bypassed() {
        return Ok(next.run(request).await);
    }

    let identity = client_identity(request.headers());
    let limits = &state.config.rate_limit;
    let decision = state
        .rate_limiter
        .check_and_increment(&identity, limits.max_requests, limits.window)
        .await;

    if !decision.allowed {
        return Err(AppError::RateLimited(decision));
    }

    let mut response = next.run(request).await;
    insert_rate_limit_headers(response.headers_mut(), &decision);
    Ok(response)
}

/// Identity a request is counted under.
pub fn client_identity(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(user) = header(USER_ID_HEADER) {
        return format!("user:{user}");
    }
    header(FORWARDED_FOR_HEADER)
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| ANONYMOUS.to_string())
}
