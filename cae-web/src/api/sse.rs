//! Server-Sent Events (SSE) for analysis progress

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events
///
/// Streams `ImageSubmitted`, `AnalysisCompleted` and `AnalysisTimedOut`
/// events, with periodic heartbeats.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    cae_common::sse::create_event_sse_stream("cae-web", &state.event_bus)
}
