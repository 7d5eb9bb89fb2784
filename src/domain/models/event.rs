//! Outbound orchestration events.
//!
//! Payloads are appended to the owning execution's log and published on the
//! event bus. Ordering is guaranteed per execution id only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::execution::{RecoveryActionKind, SkipReason};
use super::status::SystemStatus;
use super::workflow::{ConstraintKind, Enforcement, EscalationLevel, RollbackStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventPayload {
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: String,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        duration_ms: u64,
    },
    ExecutionFailed {
        execution_id: Uuid,
        error: String,
    },
    ExecutionCancelled {
        execution_id: Uuid,
    },
    ExecutionPaused {
        execution_id: Uuid,
        reason: String,
    },
    ExecutionResumed {
        execution_id: Uuid,
    },
    PhaseStarted {
        execution_id: Uuid,
        phase_id: String,
        attempt: u32,
    },
    PhaseCompleted {
        execution_id: Uuid,
        phase_id: String,
        duration_ms: u64,
    },
    PhaseFailed {
        execution_id: Uuid,
        phase_id: String,
        error: String,
    },
    PhaseSkipped {
        execution_id: Uuid,
        phase_id: String,
        reason: SkipReason,
    },
    PhaseRolledBack {
        execution_id: Uuid,
        phase_id: String,
        strategy: RollbackStrategy,
        checkpoint_id: Option<String>,
    },
    TaskDispatched {
        execution_id: Uuid,
        task_id: String,
        agent_id: String,
        attempt: u32,
    },
    TaskCompleted {
        execution_id: Uuid,
        task_id: String,
        agent_id: String,
    },
    TaskFailed {
        execution_id: Uuid,
        task_id: String,
        agent_id: Option<String>,
        error: String,
        attempt: u32,
    },
    TaskCompensated {
        execution_id: Uuid,
        task_id: String,
        action: String,
    },
    CheckpointRecorded {
        execution_id: Uuid,
        checkpoint_id: String,
        phase_id: String,
    },
    RecoveryApplied {
        execution_id: Uuid,
        action: RecoveryActionKind,
        detail: String,
    },
    Escalated {
        execution_id: Uuid,
        level: EscalationLevel,
        awaiting_human: bool,
    },
    SlaViolated {
        execution_id: Uuid,
        violation: String,
    },
    ConstraintViolated {
        execution_id: Uuid,
        constraint: ConstraintKind,
        enforcement: Enforcement,
        detail: String,
    },
    AgentSlaBreached {
        agent_id: String,
        task_key: String,
        detail: String,
    },
    NotificationSent {
        execution_id: Uuid,
        channel: String,
        subject: String,
    },
    OrchestrationCycle {
        timestamp: DateTime<Utc>,
        metrics: Box<SystemStatus>,
    },
}

impl EventPayload {
    /// Owning execution, if the event is execution-scoped.
    pub const fn execution_id(&self) -> Option<Uuid> {
        match self {
            Self::ExecutionStarted { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionCancelled { execution_id }
            | Self::ExecutionPaused { execution_id, .. }
            | Self::ExecutionResumed { execution_id }
            | Self::PhaseStarted { execution_id, .. }
            | Self::PhaseCompleted { execution_id, .. }
            | Self::PhaseFailed { execution_id, .. }
            | Self::PhaseSkipped { execution_id, .. }
            | Self::PhaseRolledBack { execution_id, .. }
            | Self::TaskDispatched { execution_id, .. }
            | Self::TaskCompleted { execution_id, .. }
            | Self::TaskFailed { execution_id, .. }
            | Self::TaskCompensated { execution_id, .. }
            | Self::CheckpointRecorded { execution_id, .. }
            | Self::RecoveryApplied { execution_id, .. }
            | Self::Escalated { execution_id, .. }
            | Self::SlaViolated { execution_id, .. }
            | Self::ConstraintViolated { execution_id, .. }
            | Self::NotificationSent { execution_id, .. } => Some(*execution_id),
            Self::AgentSlaBreached { .. } | Self::OrchestrationCycle { .. } => None,
        }
    }

    /// Kebab-case event name, as serialized in the `type` tag.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ExecutionStarted { .. } => "execution-started",
            Self::ExecutionCompleted { .. } => "execution-completed",
            Self::ExecutionFailed { .. } => "execution-failed",
            Self::ExecutionCancelled { .. } => "execution-cancelled",
            Self::ExecutionPaused { .. } => "execution-paused",
            Self::ExecutionResumed { .. } => "execution-resumed",
            Self::PhaseStarted { .. } => "phase-started",
            Self::PhaseCompleted { .. } => "phase-completed",
            Self::PhaseFailed { .. } => "phase-failed",
            Self::PhaseSkipped { .. } => "phase-skipped",
            Self::PhaseRolledBack { .. } => "phase-rolled-back",
            Self::TaskDispatched { .. } => "task-dispatched",
            Self::TaskCompleted { .. } => "task-completed",
            Self::TaskFailed { .. } => "task-failed",
            Self::TaskCompensated { .. } => "task-compensated",
            Self::CheckpointRecorded { .. } => "checkpoint-recorded",
            Self::RecoveryApplied { .. } => "recovery-applied",
            Self::Escalated { .. } => "escalated",
            Self::SlaViolated { .. } => "sla-violated",
            Self::ConstraintViolated { .. } => "constraint-violated",
            Self::AgentSlaBreached { .. } => "agent-sla-breached",
            Self::NotificationSent { .. } => "notification-sent",
            Self::OrchestrationCycle { .. } => "orchestration-cycle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serializes_with_kebab_tag() {
        let id = Uuid::new_v4();
        let payload = EventPayload::TaskFailed {
            execution_id: id,
            task_id: "build".to_string(),
            agent_id: Some("dev-1".to_string()),
            error: "boom".to_string(),
            attempt: 2,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "task-failed");
        assert_eq!(json["attempt"], 2);
        assert_eq!(payload.name(), "task-failed");
        assert_eq!(payload.execution_id(), Some(id));
    }
}
