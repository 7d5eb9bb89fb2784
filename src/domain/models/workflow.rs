use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::task::Task;
use crate::domain::errors::{DomainResult, OrchestrationError};

/// Declarative workflow: an ordered phase graph plus the policies that govern it.
///
/// Definitions are immutable once registered in the catalog; mutable run state
/// lives in [`WorkflowExecution`](super::execution::WorkflowExecution).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Semantic version; (id, version) pairs are unique in the catalog.
    #[serde(default = "default_version")]
    pub version: Version,

    #[serde(default)]
    pub description: String,

    pub phases: Vec<Phase>,

    /// Workflow-level edges between phases.
    #[serde(default)]
    pub dependencies: Vec<WorkflowDependency>,

    #[serde(default)]
    pub constraints: Vec<WorkflowConstraint>,

    #[serde(default)]
    pub sla: WorkflowSla,

    #[serde(default)]
    pub recovery: RecoveryPolicy,

    #[serde(default)]
    pub notifications: NotificationPolicy,

    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_version() -> Version {
    Version::new(1, 0, 0)
}

impl WorkflowDefinition {
    /// Create an empty definition at version 1.0.0.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: default_version(),
            description: String::new(),
            phases: Vec::new(),
            dependencies: Vec::new(),
            constraints: Vec::new(),
            sla: WorkflowSla::default(),
            recovery: RecoveryPolicy::default(),
            notifications: NotificationPolicy::default(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn with_dependency(mut self, dependency: WorkflowDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn with_constraint(mut self, constraint: WorkflowConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_sla(mut self, sla: WorkflowSla) -> Self {
        self.sla = sla;
        self
    }

    /// Parse a definition from YAML (JSON is accepted as well).
    pub fn from_yaml(source: &str) -> DomainResult<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn phase(&self, phase_id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == phase_id)
    }

    /// Find a task and the phase that owns it.
    pub fn task(&self, task_id: &str) -> Option<(&Phase, &Task)> {
        self.phases.iter().find_map(|phase| {
            phase
                .tasks
                .iter()
                .find(|t| t.id == task_id)
                .map(|task| (phase, task))
        })
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.phases.iter().flat_map(|p| p.tasks.iter())
    }

    /// Every dependency of a phase: its own entries plus workflow-level edges
    /// pointing at it.
    pub fn phase_dependencies(&self, phase_id: &str) -> Vec<PhaseDependency> {
        let mut deps: Vec<PhaseDependency> = self
            .phase(phase_id)
            .map(|p| p.dependencies.clone())
            .unwrap_or_default();

        for edge in self.dependencies.iter().filter(|e| e.to == phase_id) {
            if !deps.iter().any(|d| d.phase == edge.from) {
                deps.push(PhaseDependency {
                    phase: edge.from.clone(),
                    condition: default_condition(),
                    strength: edge.strength,
                });
            }
        }

        deps
    }
}

/// Kind of a workflow-level edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    Data,
    #[default]
    Control,
    Resource,
    Temporal,
}

/// How binding a dependency is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyStrength {
    #[default]
    Hard,
    Soft,
    Preference,
}

/// Edge `from -> to` between two phases of the same workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDependency {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default)]
    pub strength: DependencyStrength,
}

impl WorkflowDependency {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: DependencyKind::default(),
            strength: DependencyStrength::default(),
        }
    }

    pub fn with_strength(mut self, strength: DependencyStrength) -> Self {
        self.strength = strength;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintKind {
    /// Maximum wall-clock duration in milliseconds.
    Time,
    /// Maximum number of tasks in flight at once.
    Resource,
    /// Maximum accumulated task cost.
    Cost,
    /// Minimum average quality score.
    Quality,
    /// Minimum SLA compliance ratio (0-1).
    Compliance,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::Resource => write!(f, "resource"),
            Self::Cost => write!(f, "cost"),
            Self::Quality => write!(f, "quality"),
            Self::Compliance => write!(f, "compliance"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Enforcement {
    /// Violation fails the execution.
    Strict,
    /// Violation warns and notifies.
    #[default]
    Flexible,
    /// Violation is recorded only.
    Advisory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConstraint {
    pub kind: ConstraintKind,
    pub value: f64,
    #[serde(default)]
    pub enforcement: Enforcement,
    #[serde(default)]
    pub description: String,
}

impl WorkflowConstraint {
    pub fn new(kind: ConstraintKind, value: f64, enforcement: Enforcement) -> Self {
        Self {
            kind,
            value,
            enforcement,
            description: String::new(),
        }
    }
}

/// Metric an SLA penalty or reward is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlaMetric {
    Duration,
    Quality,
    SuccessRate,
    Cost,
}

impl fmt::Display for SlaMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duration => write!(f, "duration"),
            Self::Quality => write!(f, "quality"),
            Self::SuccessRate => write!(f, "success-rate"),
            Self::Cost => write!(f, "cost"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
    #[serde(default)]
    pub max_duration_ms: Option<u64>,
    #[serde(default)]
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub min_success_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessThresholds {
    #[serde(default)]
    pub max_cost: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaAdjustment {
    pub metric: SlaMetric,
    pub amount: f64,
}

/// Performance and business thresholds with their penalties and rewards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSla {
    #[serde(default)]
    pub performance: PerformanceThresholds,
    #[serde(default)]
    pub business: BusinessThresholds,
    /// Applied when the metric is violated.
    #[serde(default)]
    pub penalties: Vec<SlaAdjustment>,
    /// Applied when the metric is met at completion.
    #[serde(default)]
    pub rewards: Vec<SlaAdjustment>,
}

/// How much completed work a failure discards before retrying.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackGranularity {
    /// Retry only the failed task.
    #[default]
    Task,
    /// Reset the whole phase to its last checkpoint and rerun it.
    Phase,
    /// Abort; a fresh execution is required.
    Workflow,
}

/// Ordered recovery tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EscalationLevel {
    #[default]
    Automatic,
    TechnicalLead,
    Management,
}

impl EscalationLevel {
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Automatic => Some(Self::TechnicalLead),
            Self::TechnicalLead => Some(Self::Management),
            Self::Management => None,
        }
    }

    /// Levels above `automatic` wait for a person to resume or cancel.
    pub const fn requires_human(self) -> bool {
        !matches!(self, Self::Automatic)
    }
}

impl fmt::Display for EscalationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automatic => write!(f, "automatic"),
            Self::TechnicalLead => write!(f, "technical-lead"),
            Self::Management => write!(f, "management"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    #[serde(default)]
    pub granularity: RollbackGranularity,
    /// Workflow id to restart against once retries are exhausted.
    #[serde(default)]
    pub alternative_workflow: Option<String>,
    #[serde(default)]
    pub escalation_level: EscalationLevel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationChannel {
    Email { address: String },
    Chat { channel: String },
    Dashboard,
}

impl fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Email { address } => write!(f, "email:{address}"),
            Self::Chat { channel } => write!(f, "chat:{channel}"),
            Self::Dashboard => write!(f, "dashboard"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPolicy {
    #[serde(default = "default_channels")]
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub on_completion: bool,
    #[serde(default = "default_true")]
    pub on_failure: bool,
    #[serde(default = "default_true")]
    pub on_escalation: bool,
    #[serde(default = "default_true")]
    pub on_sla_violation: bool,
}

fn default_channels() -> Vec<NotificationChannel> {
    vec![NotificationChannel::Dashboard]
}

const fn default_true() -> bool {
    true
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            on_completion: false,
            on_failure: true,
            on_escalation: true,
            on_sla_violation: true,
        }
    }
}

/// Mode an individual task set runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InnerMode {
    #[default]
    Sequential,
    Parallel,
    ForkJoin,
}

/// How a phase drives its tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
    ForkJoin,
    /// Tasks run only if the named condition holds; otherwise the phase is skipped.
    Conditional {
        condition: String,
        #[serde(default)]
        inner: InnerMode,
    },
    /// Task set repeats until `until` holds or `max_iterations` is reached.
    Loop {
        until: String,
        max_iterations: u32,
        #[serde(default)]
        inner: InnerMode,
    },
}

impl ExecutionMode {
    /// The task-set mode each run of the phase uses.
    pub const fn inner(&self) -> InnerMode {
        match self {
            Self::Sequential => InnerMode::Sequential,
            Self::Parallel => InnerMode::Parallel,
            Self::ForkJoin => InnerMode::ForkJoin,
            Self::Conditional { inner, .. } | Self::Loop { inner, .. } => *inner,
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::ForkJoin => write!(f, "fork-join"),
            Self::Conditional { condition, .. } => write!(f, "conditional({condition})"),
            Self::Loop {
                until,
                max_iterations,
                ..
            } => write!(f, "loop(until {until}, max {max_iterations})"),
        }
    }
}

/// Completion condition attached to a phase dependency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompletionCondition {
    Completed,
    CompletedOrSkipped,
    /// Referenced phase progress (0-100) must reach the value.
    MinProgress(f64),
}

impl FromStr for CompletionCondition {
    type Err = OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match normalized.to_lowercase().as_str() {
            "" | "completed" | "complete" => Ok(Self::Completed),
            "completed-or-skipped" | "any" => Ok(Self::CompletedOrSkipped),
            other => other
                .strip_prefix("progress>=")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| (0.0..=100.0).contains(v))
                .map(Self::MinProgress)
                .ok_or_else(|| {
                    OrchestrationError::InvalidDefinition(format!(
                        "unknown completion condition '{s}'"
                    ))
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseDependency {
    pub phase: String,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default)]
    pub strength: DependencyStrength,
}

fn default_condition() -> String {
    "completed".to_string()
}

impl PhaseDependency {
    pub fn on(phase: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            condition: default_condition(),
            strength: DependencyStrength::Hard,
        }
    }

    pub fn with_strength(mut self, strength: DependencyStrength) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }

    pub fn completion(&self) -> DomainResult<CompletionCondition> {
        self.condition.parse()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    Linear,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retry budget: re-dispatches allowed after the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffStrategy::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, backoff: BackoffStrategy, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff,
            base_delay_ms,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    pub const fn none() -> Self {
        Self::new(0, BackoffStrategy::Linear, 0)
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Linear: `base * attempt`. Exponential: `base * 2^attempt`. Both capped
    /// at `max_delay_ms`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = match self.backoff {
            BackoffStrategy::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            BackoffStrategy::Exponential => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                self.base_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackStrategy {
    None,
    /// Clear the failed phase's task state.
    #[default]
    DiscardPhase,
    /// Restore the most recent recorded checkpoint.
    LastCheckpoint,
}

impl fmt::Display for RollbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::DiscardPhase => write!(f, "discard-phase"),
            Self::LastCheckpoint => write!(f, "last-checkpoint"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackPolicy {
    #[serde(default)]
    pub strategy: RollbackStrategy,
    #[serde(default = "default_true")]
    pub automated: bool,
}

impl Default for RollbackPolicy {
    fn default() -> Self {
        Self {
            strategy: RollbackStrategy::default(),
            automated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointGate {
    #[default]
    Automated,
    /// Execution pauses after the checkpoint until resumed.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSpec {
    pub id: String,
    #[serde(default)]
    pub gate: CheckpointGate,
    /// Empty means always record.
    #[serde(default)]
    pub condition: String,
}

impl CheckpointSpec {
    pub fn automated(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gate: CheckpointGate::Automated,
            condition: String::new(),
        }
    }

    pub fn manual(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            gate: CheckpointGate::Manual,
            condition: String::new(),
        }
    }
}

/// A named group of tasks sharing an execution mode and dependency gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// `sequential`, or a single-key map such as `loop: { until: .., max_iterations: .. }`.
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub mode: ExecutionMode,

    pub tasks: Vec<Task>,

    #[serde(default)]
    pub dependencies: Vec<PhaseDependency>,

    /// Hard deadline measured from phase start.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub rollback: RollbackPolicy,

    #[serde(default)]
    pub checkpoints: Vec<CheckpointSpec>,
}

impl Phase {
    pub fn new(id: impl Into<String>, mode: ExecutionMode) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            mode,
            tasks: Vec::new(),
            dependencies: Vec::new(),
            timeout_ms: None,
            retry: RetryPolicy::default(),
            rollback: RollbackPolicy::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn depends_on(mut self, dependency: PhaseDependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackPolicy) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: CheckpointSpec) -> Self {
        self.checkpoints.push(checkpoint);
        self
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|t| t.id == task_id)
    }

    /// Tasks in sequential start order: ascending priority, then declaration order.
    pub fn ordered_tasks(&self) -> Vec<&Task> {
        let mut ordered: Vec<(usize, &Task)> = self.tasks.iter().enumerate().collect();
        ordered.sort_by_key(|(index, task)| (task.priority, *index));
        ordered.into_iter().map(|(_, task)| task).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delays_strictly_increase() {
        let policy = RetryPolicy::new(3, BackoffStrategy::Exponential, 10);
        let delays: Vec<Duration> = (1..=policy.max_attempts).map(|a| policy.delay(a)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(80)
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_linear_delay_and_cap() {
        let mut policy = RetryPolicy::new(5, BackoffStrategy::Linear, 100);
        assert_eq!(policy.delay(3), Duration::from_millis(300));
        policy.max_delay_ms = 250;
        assert_eq!(policy.delay(3), Duration::from_millis(250));

        let huge = RetryPolicy::new(100, BackoffStrategy::Exponential, 1_000);
        assert_eq!(huge.delay(90), Duration::from_millis(huge.max_delay_ms));
    }

    #[test]
    fn test_completion_condition_parsing() {
        assert_eq!(
            "completed".parse::<CompletionCondition>().unwrap(),
            CompletionCondition::Completed
        );
        assert_eq!(
            "any".parse::<CompletionCondition>().unwrap(),
            CompletionCondition::CompletedOrSkipped
        );
        assert_eq!(
            "progress >= 50".parse::<CompletionCondition>().unwrap(),
            CompletionCondition::MinProgress(50.0)
        );
        assert!("progress>=150".parse::<CompletionCondition>().is_err());
        assert!("whenever".parse::<CompletionCondition>().is_err());
    }

    #[test]
    fn test_escalation_chain_order() {
        assert!(EscalationLevel::Automatic < EscalationLevel::TechnicalLead);
        assert_eq!(
            EscalationLevel::TechnicalLead.next(),
            Some(EscalationLevel::Management)
        );
        assert_eq!(EscalationLevel::Management.next(), None);
        assert!(!EscalationLevel::Automatic.requires_human());
    }

    #[test]
    fn test_phase_dependencies_merge_workflow_edges() {
        let def = WorkflowDefinition::new("wf")
            .with_phase(Phase::new("a", ExecutionMode::Sequential))
            .with_phase(Phase::new("b", ExecutionMode::Parallel))
            .with_dependency(
                WorkflowDependency::new("a", "b").with_strength(DependencyStrength::Soft),
            );

        let deps = def.phase_dependencies("b");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].phase, "a");
        assert_eq!(deps[0].strength, DependencyStrength::Soft);
        assert!(def.phase_dependencies("a").is_empty());
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
id: website-launch
version: 2.1.0
phases:
  - id: design
    mode: sequential
    tasks:
      - id: mockups
        capability: design
        priority: 1
  - id: build
    mode:
      loop:
        until: review.approved
        max_iterations: 3
        inner: parallel
    dependencies:
      - phase: design
    retry:
      max_attempts: 2
      backoff: linear
    tasks:
      - id: frontend
        capability: development
        dependencies:
          - on: { task: mockups }
            kind: { partial: { threshold: 0.5 } }
recovery:
  granularity: phase
  escalation_level: technical-lead
";
        let def = WorkflowDefinition::from_yaml(yaml).expect("YAML should parse");
        assert_eq!(def.version, Version::new(2, 1, 0));
        assert_eq!(def.phases.len(), 2);
        assert_eq!(def.phases[1].mode.inner(), InnerMode::Parallel);
        assert_eq!(def.phases[1].retry.backoff, BackoffStrategy::Linear);
        assert_eq!(def.recovery.granularity, RollbackGranularity::Phase);
        assert_eq!(def.recovery.escalation_level, EscalationLevel::TechnicalLead);
        assert!(def.task("frontend").is_some());
    }

    #[test]
    fn test_yaml_execution_modes() {
        let yaml = r"
id: modes
phases:
  - id: plain
    tasks: []
  - id: fan-out
    mode: parallel
    tasks: []
  - id: branches
    mode: fork-join
    tasks: []
  - id: gated
    mode:
      conditional:
        condition: design.approved
        inner: fork-join
    tasks: []
  - id: polish
    mode:
      loop: { until: review.approved, max_iterations: 4 }
    tasks: []
notifications:
  channels:
    - type: chat
      channel: releases
";
        let expected = vec![
            ExecutionMode::Sequential,
            ExecutionMode::Parallel,
            ExecutionMode::ForkJoin,
            ExecutionMode::Conditional {
                condition: "design.approved".to_string(),
                inner: InnerMode::ForkJoin,
            },
            ExecutionMode::Loop {
                until: "review.approved".to_string(),
                max_iterations: 4,
                inner: InnerMode::Sequential,
            },
        ];

        let def = WorkflowDefinition::from_yaml(yaml).expect("YAML should parse");
        let modes: Vec<_> = def.phases.iter().map(|p| p.mode.clone()).collect();
        assert_eq!(modes, expected);
        assert_eq!(
            def.notifications.channels,
            vec![NotificationChannel::Chat {
                channel: "releases".to_string()
            }]
        );

        let rendered = serde_yaml::to_string(&def).unwrap();
        let reparsed = WorkflowDefinition::from_yaml(&rendered).expect("rendered YAML should parse");
        let modes: Vec<_> = reparsed.phases.iter().map(|p| p.mode.clone()).collect();
        assert_eq!(modes, expected);

        let json = serde_json::to_value(&def.phases[4]).unwrap();
        assert_eq!(json["mode"]["loop"]["max_iterations"], 4);
        assert_eq!(json["mode"]["loop"]["inner"], "sequential");
        let phase: Phase = serde_json::from_value(json).unwrap();
        assert_eq!(phase.mode, expected[4]);
        assert_eq!(serde_json::to_value(&def.phases[0]).unwrap()["mode"], "sequential");
    }
}
