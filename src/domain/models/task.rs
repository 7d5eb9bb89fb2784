//! Task domain model.
//!
//! Tasks are discrete units of work routed to an agent by capability. Their
//! declarations are immutable; run state lives in [`TaskState`] on the
//! execution record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a task within one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Declared, not yet considered
    #[default]
    Pending,
    /// Waiting on dependencies or agent capacity
    Waiting,
    /// Dispatched to an agent
    Running,
    /// Finished and passed validation
    Completed,
    /// Failed but resolved by a compensation action
    Compensated,
    /// Retry budget exhausted without compensation
    Failed,
    /// Never dispatched because the execution was cancelled
    Cancelled,
    /// Not run (skipped phase or skip compensation)
    Skipped,
}

impl TaskStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Compensated => "compensated",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "waiting" => Some(Self::Waiting),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "compensated" => Some(Self::Compensated),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Compensated | Self::Failed | Self::Cancelled | Self::Skipped
        )
    }

    /// Completed or compensated: the task's contract was honored.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated)
    }

    /// Whether downstream output-dependencies may proceed.
    pub const fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Skipped)
    }

    /// Whether downstream dependents can never proceed.
    pub const fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared task input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIo {
    pub name: String,
    #[serde(default)]
    pub semantic_type: String,
    #[serde(default = "default_required")]
    pub required: bool,
}

const fn default_required() -> bool {
    true
}

impl TaskIo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type: String::new(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::new(name)
        }
    }
}

/// What a task dependency points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyTarget {
    /// A single producer task.
    Task(String),
    /// Every task declaring this branch name.
    Branch(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskDependencyKind {
    /// Producer must fully complete.
    #[default]
    Output,
    /// Producer progress must reach `threshold * 100`.
    Partial { threshold: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDependency {
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub on: DependencyTarget,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub kind: TaskDependencyKind,
}

impl TaskDependency {
    pub fn output(task_id: impl Into<String>) -> Self {
        Self {
            on: DependencyTarget::Task(task_id.into()),
            kind: TaskDependencyKind::Output,
        }
    }

    pub fn partial(task_id: impl Into<String>, threshold: f64) -> Self {
        Self {
            on: DependencyTarget::Task(task_id.into()),
            kind: TaskDependencyKind::Partial { threshold },
        }
    }

    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            on: DependencyTarget::Branch(name.into()),
            kind: TaskDependencyKind::Output,
        }
    }

    /// Producer task id, when the target is a single task.
    pub fn task_id(&self) -> Option<&str> {
        match &self.on {
            DependencyTarget::Task(id) => Some(id),
            DependencyTarget::Branch(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskConstraintKind {
    MaxCost,
    MinQuality,
    MaxDurationMs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConstraint {
    pub kind: TaskConstraintKind,
    pub value: f64,
}

/// Post-completion check on a task's metrics or outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationRule {
    /// `metric` is `quality`, `cost`, `duration-ms` or a numeric output name.
    Threshold {
        metric: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// The named output must be present and truthy.
    Required { output: String },
}

/// Why a task attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCause {
    ValidationFailed,
    ExecutionFailed,
    Timeout,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ValidationFailed => write!(f, "validation-failed"),
            Self::ExecutionFailed => write!(f, "execution-failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCondition {
    ValidationFailed,
    ExecutionFailed,
    Timeout,
    Any,
}

impl FailureCondition {
    pub const fn matches(self, cause: FailureCause) -> bool {
        matches!(
            (self, cause),
            (Self::Any, _)
                | (Self::ValidationFailed, FailureCause::ValidationFailed)
                | (Self::ExecutionFailed, FailureCause::ExecutionFailed)
                | (Self::Timeout, FailureCause::Timeout)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompensationKind {
    /// Mark the task skipped; dependents proceed.
    Skip,
    /// Publish the given outputs as if the task had produced them.
    UseDefaults {
        #[serde(default)]
        outputs: HashMap<String, Value>,
    },
    /// Dispatch a substitute capability once.
    RunCapability { capability: String },
}

impl std::fmt::Display for CompensationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "skip"),
            Self::UseDefaults { .. } => write!(f, "use-defaults"),
            Self::RunCapability { capability } => write!(f, "run-capability({capability})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationAction {
    pub on: FailureCondition,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub action: CompensationKind,
}

/// Declared unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,

    /// Capability an agent must advertise to run this task.
    pub capability: String,

    #[serde(default)]
    pub name: String,

    /// Lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: u32,

    #[serde(default)]
    pub estimated_duration_ms: u64,

    /// Fork-join branch this task belongs to.
    #[serde(default)]
    pub branch: Option<String>,

    #[serde(default)]
    pub inputs: Vec<TaskIo>,

    #[serde(default)]
    pub outputs: Vec<TaskIo>,

    #[serde(default)]
    pub dependencies: Vec<TaskDependency>,

    #[serde(default)]
    pub constraints: Vec<TaskConstraint>,

    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub validation: Vec<ValidationRule>,

    #[serde(default)]
    pub compensation: Vec<CompensationAction>,
}

const fn default_priority() -> u32 {
    5
}

impl Task {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capability: capability.into(),
            priority: default_priority(),
            estimated_duration_ms: 0,
            branch: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            constraints: Vec::new(),
            validation: Vec::new(),
            compensation: Vec::new(),
        }
    }

    pub const fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub const fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    pub fn in_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_input(mut self, input: TaskIo) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(TaskIo::new(name));
        self
    }

    pub fn depends_on(mut self, dependency: TaskDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_constraint(mut self, kind: TaskConstraintKind, value: f64) -> Self {
        self.constraints.push(TaskConstraint { kind, value });
        self
    }

    pub fn with_validation(mut self, rule: ValidationRule) -> Self {
        self.validation.push(rule);
        self
    }

    pub fn with_compensation(mut self, on: FailureCondition, action: CompensationKind) -> Self {
        self.compensation.push(CompensationAction { on, action });
        self
    }

    /// First compensation action matching the failure cause.
    pub fn compensation_for(&self, cause: FailureCause) -> Option<&CompensationAction> {
        self.compensation.iter().find(|c| c.on.matches(cause))
    }
}

/// Metrics gathered for a finished task attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskMetrics {
    pub duration_ms: u64,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub cost: f64,
    /// Estimated over actual duration; 1.0 when no estimate exists.
    #[serde(default)]
    pub efficiency: f64,
}

/// Mutable run state of one task within an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub status: TaskStatus,
    /// 0-100
    pub progress: f64,
    /// Dispatches made, including the first.
    pub attempts: u32,
    /// Retries consumed from the phase retry budget.
    pub retries: u32,
    pub agent_id: Option<String>,
    pub outputs: HashMap<String, Value>,
    pub metrics: TaskMetrics,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskState {
    /// Clear everything an attempt produced, keeping counters.
    pub fn reset_for_retry(&mut self) {
        self.status = TaskStatus::Pending;
        self.progress = 0.0;
        self.agent_id = None;
        self.outputs.clear();
        self.started_at = None;
        self.completed_at = None;
    }
}
