//! Simulated capability executor.
//!
//! Sleeps a scaled version of each task's estimated duration, reports
//! progress in even steps and fabricates the declared outputs. Per-task
//! overrides script failures, quality and cost for tests and demos.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::ports::{
    CapabilityError, CapabilityExecutor, CapabilityRequest, CapabilityResult, ProgressReporter,
};

/// Scripted behaviour for one task id.
#[derive(Debug, Clone)]
pub struct SimulatedResponse {
    /// Overrides the scaled estimate.
    pub duration_ms: Option<u64>,
    pub quality: Option<f64>,
    pub cost: f64,
    /// Extra outputs merged over the fabricated ones.
    pub outputs: HashMap<String, Value>,
    /// Attempts `1..=failures` fail.
    pub failures: u32,
    pub error: String,
}

impl Default for SimulatedResponse {
    fn default() -> Self {
        Self {
            duration_ms: None,
            quality: Some(0.9),
            cost: 1.0,
            outputs: HashMap::new(),
            failures: 0,
            error: "simulated failure".to_string(),
        }
    }
}

impl SimulatedResponse {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn always_fail(error: impl Into<String>) -> Self {
        Self {
            failures: u32::MAX,
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn fail_times(failures: u32, error: impl Into<String>) -> Self {
        Self {
            failures,
            error: error.into(),
            ..Self::default()
        }
    }

    pub const fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub const fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }

    pub const fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, value: Value) -> Self {
        self.outputs.insert(name.into(), value);
        self
    }
}

/// Configuration for the simulated executor.
#[derive(Debug, Clone)]
pub struct SimulatedConfig {
    /// Multiplier applied to each task's estimated duration.
    pub time_scale: f64,
    /// Progress reports per task.
    pub progress_steps: u32,
    /// Used when a task declares no estimate.
    pub default_duration_ms: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            time_scale: 0.001,
            progress_steps: 4,
            default_duration_ms: 10,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    config: SimulatedConfig,
    default_response: SimulatedResponse,
    overrides: RwLock<HashMap<String, SimulatedResponse>>,
    invocations: RwLock<Vec<CapabilityRequest>>,
}

impl SimulatedExecutor {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_default_response(mut self, response: SimulatedResponse) -> Self {
        self.default_response = response;
        self
    }

    /// Script the behaviour of one task id.
    pub async fn set_response(&self, task_id: impl Into<String>, response: SimulatedResponse) {
        self.overrides.write().await.insert(task_id.into(), response);
    }

    /// Every request received, in arrival order.
    pub async fn invocations(&self) -> Vec<CapabilityRequest> {
        self.invocations.read().await.clone()
    }

    /// Invocation count for one task id.
    pub async fn invocation_count(&self, task_id: &str) -> usize {
        self.invocations
            .read()
            .await
            .iter()
            .filter(|r| r.task_id == task_id)
            .count()
    }

    async fn response_for(&self, task_id: &str) -> SimulatedResponse {
        self.overrides
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone())
    }

    fn duration_for(&self, request: &CapabilityRequest, response: &SimulatedResponse) -> Duration {
        let ms = response.duration_ms.unwrap_or_else(|| {
            if request.estimated_duration_ms == 0 {
                self.config.default_duration_ms
            } else {
                (request.estimated_duration_ms as f64 * self.config.time_scale.max(0.0)) as u64
            }
        });
        Duration::from_millis(ms)
    }
}

#[async_trait]
impl CapabilityExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        request: CapabilityRequest,
        progress: ProgressReporter,
    ) -> Result<CapabilityResult, CapabilityError> {
        self.invocations.write().await.push(request.clone());
        let response = self.response_for(&request.task_id).await;

        let steps = self.config.progress_steps.max(1);
        let step = self.duration_for(&request, &response) / steps;
        for done in 1..=steps {
            tokio::time::sleep(step).await;
            if done < steps {
                progress.report(f64::from(done) * 100.0 / f64::from(steps));
            }
        }

        if request.attempt <= response.failures {
            return Err(CapabilityError::Failed(response.error));
        }

        let mut outputs: HashMap<String, Value> = request
            .expected_outputs
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    Value::String(format!("{}:{name}", request.task_id)),
                )
            })
            .collect();
        outputs.extend(response.outputs);

        Ok(CapabilityResult {
            outputs,
            quality_score: response.quality,
            cost: response.cost,
        })
    }
}
