//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (e.g., "ok", "degraded", "error")
    pub status: String,
    /// Module name ("sonara-se")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Queued pipeline tasks waiting for a worker
    pub pending_tasks: i64,
}

/// GET /health
///
/// Health check endpoint for monitoring. Unauthenticated.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let pending_tasks = state.queue.pending_count().await.unwrap_or(-1);

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "sonara-se".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        pending_tasks,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
