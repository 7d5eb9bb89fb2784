//! EventBus service for outbound orchestration events.
//!
//! Provides a broadcast-based event system with sequence numbering,
//! severity and category tagging. Publishing is synchronous so callers can
//! append to an execution log and publish under the same lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::models::{Enforcement, EventPayload};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number assigned by EventBus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Event category for filtering and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Orchestrator,
    Execution,
    Phase,
    Task,
    Agent,
    Recovery,
    Sla,
    Notification,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orchestrator => write!(f, "orchestrator"),
            Self::Execution => write!(f, "execution"),
            Self::Phase => write!(f, "phase"),
            Self::Task => write!(f, "task"),
            Self::Agent => write!(f, "agent"),
            Self::Recovery => write!(f, "recovery"),
            Self::Sla => write!(f, "sla"),
            Self::Notification => write!(f, "notification"),
        }
    }
}

/// Event envelope containing all event metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub category: EventCategory,
    pub execution_id: Option<Uuid>,
    pub payload: EventPayload,
}

impl OrchestrationEvent {
    fn new(sequence: SequenceNumber, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sequence,
            timestamp: Utc::now(),
            severity: severity_of(&payload),
            category: category_of(&payload),
            execution_id: payload.execution_id(),
            payload,
        }
    }
}

fn severity_of(payload: &EventPayload) -> EventSeverity {
    match payload {
        EventPayload::ExecutionFailed { .. } => EventSeverity::Critical,
        EventPayload::PhaseFailed { .. }
        | EventPayload::TaskFailed { .. }
        | EventPayload::Escalated { .. } => EventSeverity::Error,
        EventPayload::ConstraintViolated {
            enforcement: Enforcement::Advisory,
            ..
        } => EventSeverity::Info,
        EventPayload::PhaseRolledBack { .. }
        | EventPayload::TaskCompensated { .. }
        | EventPayload::RecoveryApplied { .. }
        | EventPayload::SlaViolated { .. }
        | EventPayload::ConstraintViolated { .. }
        | EventPayload::AgentSlaBreached { .. }
        | EventPayload::ExecutionCancelled { .. } => EventSeverity::Warning,
        EventPayload::TaskDispatched { .. } | EventPayload::OrchestrationCycle { .. } => {
            EventSeverity::Debug
        }
        _ => EventSeverity::Info,
    }
}

fn category_of(payload: &EventPayload) -> EventCategory {
    match payload {
        EventPayload::ExecutionStarted { .. }
        | EventPayload::ExecutionCompleted { .. }
        | EventPayload::ExecutionFailed { .. }
        | EventPayload::ExecutionCancelled { .. }
        | EventPayload::ExecutionPaused { .. }
        | EventPayload::ExecutionResumed { .. }
        | EventPayload::CheckpointRecorded { .. } => EventCategory::Execution,
        EventPayload::PhaseStarted { .. }
        | EventPayload::PhaseCompleted { .. }
        | EventPayload::PhaseFailed { .. }
        | EventPayload::PhaseSkipped { .. }
        | EventPayload::PhaseRolledBack { .. } => EventCategory::Phase,
        EventPayload::TaskDispatched { .. }
        | EventPayload::TaskCompleted { .. }
        | EventPayload::TaskFailed { .. }
        | EventPayload::TaskCompensated { .. } => EventCategory::Task,
        EventPayload::RecoveryApplied { .. } | EventPayload::Escalated { .. } => {
            EventCategory::Recovery
        }
        EventPayload::SlaViolated { .. } | EventPayload::ConstraintViolated { .. } => {
            EventCategory::Sla
        }
        EventPayload::AgentSlaBreached { .. } => EventCategory::Agent,
        EventPayload::NotificationSent { .. } => EventCategory::Notification,
        EventPayload::OrchestrationCycle { .. } => EventCategory::Orchestrator,
    }
}

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting events to multiple consumers.
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    /// Create a new EventBus with the given configuration.
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Wrap, sequence and broadcast a payload. Returns the envelope.
    pub fn publish(&self, payload: EventPayload) -> OrchestrationEvent {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = OrchestrationEvent::new(SequenceNumber(seq), payload);

        tracing::trace!(
            sequence = seq,
            event = event.payload.name(),
            execution_id = ?event.execution_id,
            "event published"
        );

        // Broadcast to subscribers (ignore send errors - may have no subscribers)
        let _ = self.sender.send(event.clone());
        event
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_sequence_assignment() {
        let bus = EventBus::new(EventBusConfig::default());

        assert_eq!(bus.current_sequence().0, 0);

        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.publish(EventPayload::ExecutionStarted {
            execution_id: id,
            workflow_id: "wf".to_string(),
        });
        let event1 = rx.recv().await.unwrap();
        assert_eq!(event1.sequence.0, 0);
        assert_eq!(event1.execution_id, Some(id));
        assert_eq!(event1.category, EventCategory::Execution);

        bus.publish(EventPayload::ExecutionFailed {
            execution_id: id,
            error: "boom".to_string(),
        });
        let event2 = rx.recv().await.unwrap();
        assert_eq!(event2.sequence.0, 1);
        assert_eq!(event2.severity, EventSeverity::Critical);

        assert_eq!(bus.current_sequence().0, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        let event = bus.publish(EventPayload::AgentSlaBreached {
            agent_id: "a".to_string(),
            task_key: "k".to_string(),
            detail: "slow".to_string(),
        });
        assert_eq!(event.execution_id, None);
        assert_eq!(event.category, EventCategory::Agent);
    }
}
