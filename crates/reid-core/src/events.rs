//! Investigation progress events and the broadcast bus that carries them.
//!
//! The orchestrator emits events at phase boundaries and on completion.
//! Emission is fire-and-forget: a bus with no subscribers drops the event,
//! and nothing on the emitting side depends on delivery.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{InvestigationStatus, Phase, VerificationPriority};
use crate::traits::EventSink;

/// Domain payload of an investigation event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum InvestigationEvent {
    /// Accepted by the worker queue.
    InvestigationQueued { investigation_id: Uuid },
    PhaseStarted {
        investigation_id: Uuid,
        phase: Phase,
    },
    PhaseCompleted {
        investigation_id: Uuid,
        phase: Phase,
        duration_ms: u64,
        /// True when the phase recorded an error.
        degraded: bool,
    },
    VerificationQueued {
        investigation_id: Uuid,
        queue_id: Uuid,
        entity_type: String,
        priority: VerificationPriority,
    },
    InvestigationCompleted {
        investigation_id: Uuid,
        status: InvestigationStatus,
        error_count: usize,
    },
}

impl InvestigationEvent {
    /// Namespaced event type (e.g. `"phase.started"`).
    pub fn event_type(&self) -> &'static str {
        match self {
            InvestigationEvent::InvestigationQueued { .. } => "investigation.queued",
            InvestigationEvent::PhaseStarted { .. } => "phase.started",
            InvestigationEvent::PhaseCompleted { .. } => "phase.completed",
            InvestigationEvent::VerificationQueued { .. } => "verification.queued",
            InvestigationEvent::InvestigationCompleted { .. } => "investigation.completed",
        }
    }

    pub fn investigation_id(&self) -> Uuid {
        match self {
            InvestigationEvent::InvestigationQueued { investigation_id }
            | InvestigationEvent::PhaseStarted {
                investigation_id, ..
            }
            | InvestigationEvent::PhaseCompleted {
                investigation_id, ..
            }
            | InvestigationEvent::VerificationQueued {
                investigation_id, ..
            }
            | InvestigationEvent::InvestigationCompleted {
                investigation_id, ..
            } => *investigation_id,
        }
    }
}

/// Self-describing wrapper delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// UUIDv7, so envelopes sort by emission time.
    pub event_id: Uuid,
    pub event_type: String,
    pub occurred_at: DateTime<Utc>,
    pub investigation_id: Uuid,
    /// Starts at 1; bumped on breaking payload changes.
    pub payload_version: u32,
    pub payload: InvestigationEvent,
}

impl EventEnvelope {
    pub fn new(event: InvestigationEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.event_type().to_string(),
            occurred_at: Utc::now(),
            investigation_id: event.investigation_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

/// Broadcast bus for investigation events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with the given buffer capacity. Slow subscribers lag
    /// rather than block the sender.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to enveloped events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: InvestigationEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            investigation_id = %envelope.investigation_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        // No subscribers is not an error.
        let _ = self.tx.send(envelope);
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: InvestigationEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.emit(InvestigationEvent::PhaseStarted {
            investigation_id: id,
            phase: Phase::Detect,
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "phase.started");
        assert_eq!(envelope.investigation_id, id);
        assert_eq!(envelope.payload_version, 1);
        assert!(matches!(
            envelope.payload,
            InvestigationEvent::PhaseStarted {
                phase: Phase::Detect,
                ..
            }
        ));
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(InvestigationEvent::InvestigationQueued {
            investigation_id: Uuid::nil(),
        });
        NoOpEventSink.emit(InvestigationEvent::InvestigationQueued {
            investigation_id: Uuid::nil(),
        });
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = InvestigationEvent::InvestigationCompleted {
            investigation_id: Uuid::nil(),
            status: InvestigationStatus::Failed,
            error_count: 2,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "InvestigationCompleted");
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_count"], 2);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(InvestigationEvent::VerificationQueued {
            investigation_id: Uuid::nil(),
            queue_id: Uuid::nil(),
            entity_type: "individual".to_string(),
            priority: VerificationPriority::Medium,
        });
        assert_eq!(a.recv().await.unwrap().event_type, "verification.queued");
        assert_eq!(b.recv().await.unwrap().event_type, "verification.queued");
    }
}
