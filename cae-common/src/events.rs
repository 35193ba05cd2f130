//! Event types for the CAE event system
//!
//! Events are broadcast in-process through [`EventBus`] and forwarded to
//! browsers over SSE.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::ColorResult;

/// CAE event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CaeEvent {
    /// Upload stored and analysis requested
    ImageSubmitted {
        correlation_id: Uuid,
        image_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A result arrived on the work-done queue.
    ///
    /// `correlation_id` is absent for completions from producers that only
    /// send the bare result id.
    AnalysisCompleted {
        correlation_id: Option<Uuid>,
        result: ColorResult,
        timestamp: DateTime<Utc>,
    },

    /// A capture request gave up waiting for its result
    AnalysisTimedOut {
        correlation_id: Uuid,
        image_id: String,
        timestamp: DateTime<Utc>,
    },
}

impl CaeEvent {
    /// SSE event name
    pub fn event_type(&self) -> &str {
        match self {
            CaeEvent::ImageSubmitted { .. } => "ImageSubmitted",
            CaeEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            CaeEvent::AnalysisTimedOut { .. } => "AnalysisTimedOut",
        }
    }
}

/// In-process broadcast of [`CaeEvent`]s
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CaeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Receiver for every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<CaeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is subscribed
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CaeEvent) -> Result<usize, broadcast::error::SendError<CaeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CaeEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> ColorResult {
        ColorResult {
            id: "r1".to_string(),
            image_id: "i1".to_string(),
            rgb: [255, 0, 0],
            hex: "#ff0000".to_string(),
            name: "red".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let correlation_id = Uuid::new_v4();

        let delivered = bus
            .emit(CaeEvent::AnalysisCompleted {
                correlation_id: Some(correlation_id),
                result: sample_result(),
                timestamp: Utc::now(),
            })
            .unwrap();
        assert_eq!(delivered, 1);

        match rx.recv().await.unwrap() {
            CaeEvent::AnalysisCompleted {
                correlation_id: got,
                result,
                ..
            } => {
                assert_eq!(got, Some(correlation_id));
                assert_eq!(result.hex, "#ff0000");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus
            .emit(CaeEvent::ImageSubmitted {
                correlation_id: Uuid::new_v4(),
                image_id: "i1".to_string(),
                timestamp: Utc::now(),
            })
            .is_err());
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let event = CaeEvent::AnalysisTimedOut {
            correlation_id: Uuid::nil(),
            image_id: "i1".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "AnalysisTimedOut");
        assert_eq!(event.event_type(), "AnalysisTimedOut");
    }
}
