//! Domain errors for the conductor orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Format a cycle path as a human-readable string: `a -> b -> c -> a`.
fn format_cycle_path(path: &[String]) -> String {
    path.join(" -> ")
}

/// Errors raised by the orchestration core.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("Dependency cycle detected: {}", format_cycle_path(.0))]
    CyclicDependency(Vec<String>),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(Uuid),

    #[error("Workflow {id} version {version} is already registered")]
    DuplicateWorkflow { id: String, version: String },

    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("No agent can serve capability '{capability}'")]
    AgentUnavailable { capability: String },

    #[error("Timed out after {waited_ms}ms waiting for an agent with capability '{capability}'")]
    AgentTimeout { capability: String, waited_ms: u64 },

    #[error("Task {task_id} failed validation: {reason}")]
    TaskValidation { task_id: String, reason: String },

    #[error("Phase {phase_id} exceeded its {timeout_ms}ms deadline")]
    PhaseTimeout { phase_id: String, timeout_ms: u64 },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Capability execution failed: {0}")]
    Capability(String),

    #[error("Execution store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OrchestrationError {
    /// Whether a retry with backoff could plausibly succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AgentUnavailable { .. }
                | Self::AgentTimeout { .. }
                | Self::TaskValidation { .. }
                | Self::Capability(_)
        )
    }

    /// Errors the caller made; surfaced immediately and never retried.
    pub const fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::WorkflowNotFound(_)
                | Self::ExecutionNotFound(_)
                | Self::DuplicateWorkflow { .. }
                | Self::InvalidDefinition(_)
                | Self::CyclicDependency(_)
        )
    }
}

pub type DomainResult<T> = Result<T, OrchestrationError>;

impl From<serde_json::Error> for OrchestrationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestrationError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
