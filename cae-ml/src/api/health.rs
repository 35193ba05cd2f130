//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use cae_common::NEW_WORK_QUEUE;
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::worker::WorkerPhase;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the broker cannot be read
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub phase: WorkerPhase,
    pub processed: u64,
    pub dropped: u64,
    /// Messages waiting on `new-work`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_letters: Option<i64>,
    /// Last error message if any (for diagnostics)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let pending = state.queue.depth(NEW_WORK_QUEUE).await;
    let dead_letters = state.queue.dead_letter_count().await;
    let status = if pending.is_ok() && dead_letters.is_ok() {
        "ok"
    } else {
        warn!("Health check could not read broker state");
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: "cae-ml".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        phase: state.status.phase().await,
        processed: state.status.processed(),
        dropped: state.status.dropped(),
        pending: pending.ok(),
        dead_letters: dead_letters.ok(),
        last_error: state.status.last_error().await,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
