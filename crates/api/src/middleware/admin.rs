//! Bearer-token guard for the admin endpoints.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the caller may use the admin endpoints.
///
/// When `ADMIN_TOKEN` is configured the request must carry
/// `Authorization: Bearer <token>`. Without one the endpoints are open,
/// except in production, where they are closed to everyone.
#[derive(Debug, Clone, Copy)]
pub struct AdminAccess;

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_token.as_deref() else {
            if state.config.app_env.is_production() {
                return Err(AppError::Unauthorized("Admin endpoints are disabled".into()));
            }
            return Ok(AdminAccess);
        };

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized("Invalid Authorization format. Expected: Bearer <token>".into())
        })?;

        if token != expected {
            return Err(AppError::Unauthorized("Invalid admin token".into()));
        }
        Ok(AdminAccess)
    }
}
