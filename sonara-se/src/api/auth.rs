//! Bearer token authentication middleware
//!
//! When `api_token` is configured, every `/api` route requires an
//! `Authorization: Bearer <token>` header. When no token is configured
//! the middleware passes requests through unchanged, which keeps local
//! development friction-free.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;
use crate::AppState;

/// Reject requests missing the configured bearer token.
pub async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.api_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => next.run(request).await,
        _ => ApiError::Unauthorized("missing or invalid bearer token".to_string())
            .into_response(),
    }
}
