//! cae-web library - capture front end
//!
//! Accepts uploads, hands them to the analysis pipeline through the
//! [`RequestCoordinator`](coordinator::RequestCoordinator) and serves results.

use std::time::Duration;

use axum::Router;
use cae_common::events::EventBus;
use cae_common::WorkQueue;
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod coordinator;
pub mod error;

use coordinator::RequestCoordinator;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: RequestCoordinator,
    /// Broker handle, for queue depth reporting
    pub queue: WorkQueue,
    /// Event broadcaster for SSE clients
    pub event_bus: EventBus,
    /// How long a capture request waits for its result
    pub result_timeout: Duration,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        coordinator: RequestCoordinator,
        queue: WorkQueue,
        event_bus: EventBus,
        result_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            queue,
            event_bus,
            result_timeout,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let pages = Router::new()
        .route("/", get(api::serve_index))
        .route("/color_display", get(api::color_display))
        .route("/events", get(api::event_stream));

    let results = Router::new()
        .route("/api/results/latest", get(api::latest_result))
        .route("/api/results/image/:image_id", get(api::result_for_image))
        .route("/api/results/:result_id", get(api::result_by_id));

    Router::new()
        .merge(pages)
        .merge(results)
        .merge(api::capture_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
