//! cae-ml library - analysis worker module
//!
//! Runs the [`AnalysisWorker`](worker::AnalysisWorker) against the shared
//! store and broker, and serves a small health endpoint next to it.

use std::sync::Arc;

use axum::Router;
use cae_common::WorkQueue;
use chrono::{DateTime, Utc};

pub mod api;
pub mod worker;

use worker::WorkerStatus;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub status: Arc<WorkerStatus>,
    /// Broker handle, for queue depth and dead-letter reporting
    pub queue: WorkQueue,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(status: Arc<WorkerStatus>, queue: WorkQueue) -> Self {
        Self {
            status,
            queue,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .with_state(state)
}
