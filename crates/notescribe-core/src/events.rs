//! Processor event types and event bus.
//!
//! The execution engine and orchestrator emit [`ProcessorEvent`]s describing
//! run and operation lifecycle. Consumers (the metrics collector, the CLI's
//! progress output) subscribe independently; processing never depends on
//! whether anyone is listening.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Event Envelope
// ============================================================================

/// Event wrapper carrying identity and timing metadata.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"operation.started"`).
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    pub payload: ProcessorEvent,
}

impl EventEnvelope {
    pub fn new(event: ProcessorEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            payload: event,
        }
    }
}

// ============================================================================
// Processor Event (domain payloads)
// ============================================================================

/// Lifecycle events of a vault run.
///
/// Serialized as JSON with a `type` tag field, e.g.
/// `{"type":"FileProcessed","note":"daily/note.md","attachment":"rec.m4a",...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ProcessorEvent {
    /// A vault run began.
    RunStarted { vault: String, dry_run: bool },
    /// A vault run finished.
    RunCompleted {
        notes_scanned: usize,
        newly_processed: usize,
        failed: usize,
        duration_ms: u64,
    },
    /// An operation attempt started.
    OperationStarted {
        operation: String,
        note: String,
        attachment: String,
        attempt: u32,
    },
    /// An operation attempt ended.
    OperationFinished {
        operation: String,
        note: String,
        attachment: String,
        success: bool,
        duration_ms: u64,
    },
    /// An attachment reached `completed`.
    FileProcessed {
        operation: String,
        note: String,
        attachment: String,
    },
    /// An attachment reached `failed` or `broken`.
    FileFailed {
        operation: String,
        note: String,
        attachment: String,
        error: String,
    },
    /// A script processor ran its command.
    ScriptExecuted {
        operation: String,
        exit_code: Option<i32>,
        duration_ms: u64,
    },
    /// A note's frontmatter needed a lossy parse strategy or was unreadable.
    FrontmatterError { note: String, error: String },
}

impl ProcessorEvent {
    /// Returns the namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            ProcessorEvent::RunStarted { .. } => "run.started",
            ProcessorEvent::RunCompleted { .. } => "run.completed",
            ProcessorEvent::OperationStarted { .. } => "operation.started",
            ProcessorEvent::OperationFinished { .. } => "operation.finished",
            ProcessorEvent::FileProcessed { .. } => "file.processed",
            ProcessorEvent::FileFailed { .. } => "file.failed",
            ProcessorEvent::ScriptExecuted { .. } => "script.executed",
            ProcessorEvent::FrontmatterError { .. } => "frontmatter.error",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing processor events.
///
/// Uses `tokio::sync::broadcast`. Slow receivers that fall behind get a
/// `Lagged` error and miss events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: ProcessorEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(ProcessorEvent::FileProcessed {
            operation: "transcribe".to_string(),
            note: "note.md".to_string(),
            attachment: "rec.m4a".to_string(),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event_type, "file.processed");
        assert!(matches!(
            envelope.payload,
            ProcessorEvent::FileProcessed { ref attachment, .. } if attachment == "rec.m4a"
        ));
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(ProcessorEvent::RunStarted {
            vault: "/vault".to_string(),
            dry_run: false,
        });

        assert_eq!(rx1.recv().await.unwrap().event_type, "run.started");
        assert_eq!(rx2.recv().await.unwrap().event_type, "run.started");
    }

    #[test]
    fn test_event_bus_no_subscribers_ok() {
        let bus = EventBus::new(4);
        bus.emit(ProcessorEvent::FrontmatterError {
            note: "a.md".to_string(),
            error: "bad".to_string(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ProcessorEvent::ScriptExecuted {
            operation: "transcribe".to_string(),
            exit_code: Some(0),
            duration_ms: 12,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ScriptExecuted");
        assert_eq!(json["exit_code"], 0);
    }
}
