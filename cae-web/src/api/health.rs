//! Health check endpoint

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use cae_common::{NEW_WORK_QUEUE, WORK_DONE_QUEUE};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the broker cannot be read
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Pending message count per queue
    pub queues: BTreeMap<String, i64>,
    /// Capture requests waiting for a result
    pub pending_requests: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let mut status = "ok";
    let mut queues = BTreeMap::new();
    for name in [NEW_WORK_QUEUE, WORK_DONE_QUEUE] {
        match state.queue.depth(name).await {
            Ok(depth) => {
                queues.insert(name.to_string(), depth);
            }
            Err(e) => {
                warn!(queue = name, error = %e, "Health check could not read queue depth");
                status = "degraded";
            }
        }
    }

    Json(HealthResponse {
        status: status.to_string(),
        module: "cae-web".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        queues,
        pending_requests: state.coordinator.pending_count().await,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
