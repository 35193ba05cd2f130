//! Server-Sent Events (SSE) utilities

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::EventBus;

/// Interval between keep-alive comments
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// SSE stream forwarding every [`EventBus`] event to one client
///
/// Sends `ConnectionStatus: connected` first, then each event as JSON under
/// its event type name. Heartbeat comments keep idle connections open.
pub fn create_event_sse_stream(
    service_name: &'static str,
    event_bus: &EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} events", service_name);
    let mut rx = event_bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let name = event.event_type().to_string();
                    match serde_json::to_string(&event) {
                        Ok(data) => {
                            debug!("SSE: Sending {}", name);
                            yield Ok(Event::default().event(name).data(data));
                        }
                        Err(e) => warn!("SSE: Failed to serialize {}: {}", name, e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE: {} client lagged, skipped {} events", service_name, skipped);
                }
                Err(RecvError::Closed) => {
                    info!("SSE: {} event bus closed", service_name);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
