use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::ports::errors::CapabilityError;

/// Work handed to a capability executor for one task attempt.
#[derive(Debug, Clone)]
pub struct CapabilityRequest {
    pub execution_id: Uuid,
    pub task_id: String,
    pub capability: String,
    pub agent_id: String,
    pub attempt: u32,
    pub inputs: HashMap<String, Value>,
    /// Declared output names the task must produce
    pub expected_outputs: Vec<String>,
    pub estimated_duration_ms: u64,
}

/// Result of a successful capability invocation
#[derive(Debug, Clone, Default)]
pub struct CapabilityResult {
    pub outputs: HashMap<String, Value>,
    pub quality_score: Option<f64>,
    pub cost: f64,
}

/// Progress callback handed to executors; values are percentages.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new(sink: impl Fn(f64) + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report progress, clamped to 0-100.
    pub fn report(&self, progress: f64) {
        (self.sink)(progress.clamp(0.0, 100.0));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// Opaque executor of a capability on behalf of an agent
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    async fn execute(
        &self,
        request: CapabilityRequest,
        progress: ProgressReporter,
    ) -> Result<CapabilityResult, CapabilityError>;
}
