use thiserror::Error;

use crate::domain::errors::OrchestrationError;
use crate::domain::models::FailureCause;

/// Errors reported by a capability executor
#[derive(Debug, Clone, Error)]
pub enum CapabilityError {
    #[error("Capability failed: {0}")]
    Failed(String),

    #[error("Capability timed out: {0}")]
    Timeout(String),

    #[error("Agent fault: {0}")]
    AgentFault(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CapabilityError {
    /// Invalid input will fail the same way on every attempt.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidInput(_))
    }

    pub const fn cause(&self) -> FailureCause {
        match self {
            Self::Timeout(_) => FailureCause::Timeout,
            Self::Failed(_) | Self::AgentFault(_) | Self::InvalidInput(_) => {
                FailureCause::ExecutionFailed
            }
        }
    }
}

impl From<CapabilityError> for OrchestrationError {
    fn from(err: CapabilityError) -> Self {
        Self::Capability(err.to_string())
    }
}

/// Execution store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt snapshot {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<StoreError> for OrchestrationError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}
