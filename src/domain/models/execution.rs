//! Execution record: the mutable state of one workflow run.
//!
//! A `WorkflowExecution` is owned by the task driving it; observers only ever
//! see cloned snapshots.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::event::EventPayload;
use super::task::{TaskState, TaskStatus};
use super::workflow::{CheckpointGate, CheckpointSpec, EscalationLevel, Phase, WorkflowDefinition};
use crate::domain::errors::{DomainResult, OrchestrationError};

/// Lifecycle of an execution.
///
/// `pending -> running -> {completed | failed | cancelled}`, with `paused` and
/// `recovering` as reentrant sub-states of `running`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Paused,
    Recovering,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Recovering => "recovering",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Pending => vec![Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => vec![
                Self::Paused,
                Self::Recovering,
                Self::Completed,
                Self::Failed,
                Self::Cancelled,
            ],
            Self::Paused => vec![Self::Running, Self::Cancelled],
            Self::Recovering => vec![Self::Running, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied execution options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    /// Recorded for reporting; lower is more urgent.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Execution-wide hard deadline.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

const fn default_priority() -> u32 {
    5
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            client: None,
            tags: Vec::new(),
            deadline: None,
        }
    }
}

impl ExecutionOptions {
    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_deadline_in(mut self, within: Duration) -> Self {
        self.deadline = chrono::Duration::from_std(within)
            .ok()
            .map(|d| Utc::now() + d);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    RolledBack,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Conditional phase whose condition evaluated false.
    Condition,
    /// Skipped by an external actor.
    Operator,
    /// Dependencies can no longer be met.
    UnmetDependency,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition => write!(f, "condition"),
            Self::Operator => write!(f, "operator"),
            Self::UnmetDependency => write!(f, "unmet-dependency"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: PhaseStatus,
    pub skip_reason: Option<SkipReason>,
    /// 0-100
    pub progress: f64,
    pub attempts: u32,
    /// Current loop iteration (1-based) for loop phases.
    pub iteration: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,
    pub reached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProgress {
    pub current_phase: Option<String>,
    /// In completion order.
    pub completed_phases: Vec<String>,
    pub active_phases: Vec<String>,
    pub failed_phases: Vec<String>,
    pub skipped_phases: Vec<String>,
    /// 0-100
    pub overall_progress: f64,
    pub milestones: Vec<Milestone>,
}

/// A task that ran much longer than estimated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub task_id: String,
    pub estimated_ms: u64,
    pub actual_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPerformance {
    pub average_response_time_ms: f64,
    pub throughput_per_minute: f64,
    pub average_quality: f64,
    pub success_rate: f64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    /// 0-1 share of SLA checks met.
    pub sla_compliance: f64,
    pub sla_violations: Vec<String>,
    pub penalties: f64,
    pub rewards: f64,
    pub bottlenecks: Vec<Bottleneck>,
}

impl Default for ExecutionPerformance {
    fn default() -> Self {
        Self {
            average_response_time_ms: 0.0,
            throughput_per_minute: 0.0,
            average_quality: 0.0,
            success_rate: 1.0,
            tasks_succeeded: 0,
            tasks_failed: 0,
            sla_compliance: 1.0,
            sla_violations: Vec::new(),
            penalties: 0.0,
            rewards: 0.0,
            bottlenecks: Vec::new(),
        }
    }
}

impl ExecutionPerformance {
    /// Fold one finished attempt into the rolling averages.
    pub fn record_attempt(&mut self, succeeded: bool, duration_ms: u64, quality: Option<f64>) {
        let previous = self.tasks_succeeded + self.tasks_failed;
        let total = previous + 1;
        self.average_response_time_ms = self
            .average_response_time_ms
            .mul_add(previous as f64, duration_ms as f64)
            / total as f64;

        if succeeded {
            self.tasks_succeeded += 1;
            if let Some(quality) = quality {
                let scored = self.tasks_succeeded as f64;
                self.average_quality =
                    self.average_quality.mul_add(scored - 1.0, quality) / scored;
            }
        } else {
            self.tasks_failed += 1;
        }
        self.success_rate = self.tasks_succeeded as f64 / total as f64;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAllocation {
    pub tasks: u64,
    pub cpu_units: f64,
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAccounting {
    pub allocations: HashMap<String, AgentAllocation>,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    /// Peak in-flight over the dispatch capacity.
    pub utilization: f64,
    pub total_cost: f64,
    /// Acquisitions that had to wait for capacity.
    pub conflicts: u64,
}

/// One entry of the append-only execution log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

/// Minimal state needed to resume at a phase boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCheckpoint {
    pub id: String,
    pub phase_id: String,
    pub gate: CheckpointGate,
    pub created_at: DateTime<Utc>,
    pub completed_phases: Vec<String>,
    pub task_outputs: HashMap<String, HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryActionKind {
    Retry,
    Fallback,
    Escalation,
    Abort,
}

impl fmt::Display for RecoveryActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::Fallback => write!(f, "fallback"),
            Self::Escalation => write!(f, "escalation"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Entry of the recovery action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub timestamp: DateTime<Utc>,
    pub action: RecoveryActionKind,
    pub phase_id: Option<String>,
    pub task_id: Option<String>,
    pub attempt: Option<u32>,
    pub delay_ms: Option<u64>,
    pub level: Option<EscalationLevel>,
    pub detail: String,
}

impl RecoveryRecord {
    pub fn new(action: RecoveryActionKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            phase_id: None,
            task_id: None,
            attempt: None,
            delay_ms: None,
            level: None,
            detail: detail.into(),
        }
    }
}

/// The mutable run record of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: Version,
    pub status: ExecutionStatus,
    pub options: ExecutionOptions,
    pub inputs: HashMap<String, Value>,
    pub phases: HashMap<String, PhaseState>,
    pub tasks: HashMap<String, TaskState>,
    pub progress: ExecutionProgress,
    pub performance: ExecutionPerformance,
    pub resources: ResourceAccounting,
    pub events: Vec<ExecutionLogEntry>,
    pub checkpoints: Vec<ExecutionCheckpoint>,
    pub recovery: Vec<RecoveryRecord>,
    pub escalation: Option<EscalationLevel>,
    /// Workflow ids this execution has already run against, oldest first.
    pub fallback_chain: Vec<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    pub fn new(
        definition: &WorkflowDefinition,
        inputs: HashMap<String, Value>,
        options: ExecutionOptions,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id: definition.id.clone(),
            workflow_version: definition.version.clone(),
            status: ExecutionStatus::Pending,
            options,
            inputs,
            phases: fresh_phase_states(definition),
            tasks: fresh_task_states(definition),
            progress: ExecutionProgress::default(),
            performance: ExecutionPerformance::default(),
            resources: ResourceAccounting::default(),
            events: Vec::new(),
            checkpoints: Vec::new(),
            recovery: Vec::new(),
            escalation: None,
            fallback_chain: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, rejecting transitions outside the status lattice.
    pub fn transition(&mut self, next: ExecutionStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestrationError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
            self.progress.current_phase = None;
            self.progress.active_phases.clear();
        }
        self.status = next;
        Ok(())
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        (end - start).to_std().unwrap_or_default()
    }

    pub fn push_event(&mut self, sequence: u64, payload: EventPayload) {
        self.events.push(ExecutionLogEntry {
            sequence,
            timestamp: Utc::now(),
            payload,
        });
    }

    pub fn phase_state(&self, phase_id: &str) -> Option<&PhaseState> {
        self.phases.get(phase_id)
    }

    pub fn phase_state_mut(&mut self, phase_id: &str) -> &mut PhaseState {
        self.phases.entry(phase_id.to_string()).or_default()
    }

    pub fn task_state(&self, task_id: &str) -> Option<&TaskState> {
        self.tasks.get(task_id)
    }

    pub fn task_state_mut(&mut self, task_id: &str) -> &mut TaskState {
        self.tasks.entry(task_id.to_string()).or_default()
    }

    pub fn is_phase_completed(&self, phase_id: &str) -> bool {
        self.progress.completed_phases.iter().any(|p| p == phase_id)
    }

    pub fn mark_phase_started(&mut self, phase_id: &str) {
        let state = self.phase_state_mut(phase_id);
        state.status = PhaseStatus::Running;
        state.skip_reason = None;
        state.attempts += 1;
        state.started_at = Some(Utc::now());
        state.completed_at = None;

        self.progress.current_phase = Some(phase_id.to_string());
        if !self.progress.active_phases.iter().any(|p| p == phase_id) {
            self.progress.active_phases.push(phase_id.to_string());
        }
        self.progress.failed_phases.retain(|p| p != phase_id);
    }

    pub fn mark_phase_completed(&mut self, phase_id: &str) {
        let now = Utc::now();
        let state = self.phase_state_mut(phase_id);
        state.status = PhaseStatus::Completed;
        state.progress = 100.0;
        state.completed_at = Some(now);

        self.progress.active_phases.retain(|p| p != phase_id);
        if !self.is_phase_completed(phase_id) {
            self.progress.completed_phases.push(phase_id.to_string());
        }
        self.progress.milestones.push(Milestone {
            name: format!("phase {phase_id} completed"),
            reached_at: now,
        });
    }

    pub fn mark_phase_failed(&mut self, phase_id: &str) {
        let state = self.phase_state_mut(phase_id);
        state.status = PhaseStatus::Failed;
        state.completed_at = Some(Utc::now());

        self.progress.active_phases.retain(|p| p != phase_id);
        if !self.progress.failed_phases.iter().any(|p| p == phase_id) {
            self.progress.failed_phases.push(phase_id.to_string());
        }
    }

    /// Skip a phase and every task in it.
    pub fn mark_phase_skipped(&mut self, phase: &Phase, reason: SkipReason) {
        let state = self.phase_state_mut(&phase.id);
        state.status = PhaseStatus::Skipped;
        state.skip_reason = Some(reason);
        state.completed_at = Some(Utc::now());

        for task in &phase.tasks {
            let task_state = self.task_state_mut(&task.id);
            if !task_state.status.is_terminal() {
                task_state.status = TaskStatus::Skipped;
            }
        }

        self.progress.active_phases.retain(|p| p != &phase.id);
        if !self.progress.skipped_phases.contains(&phase.id) {
            self.progress.skipped_phases.push(phase.id.clone());
        }
    }

    /// Clear a phase's task state for another attempt.
    pub fn reset_phase(&mut self, phase: &Phase) {
        for task in &phase.tasks {
            self.tasks.insert(task.id.clone(), TaskState::default());
        }
        let state = self.phase_state_mut(&phase.id);
        state.status = PhaseStatus::RolledBack;
        state.progress = 0.0;
        state.completed_at = None;
        self.progress.active_phases.retain(|p| p != &phase.id);
    }

    /// Append a checkpoint for the current boundary.
    pub fn record_checkpoint(&mut self, spec: &CheckpointSpec, phase_id: &str) -> ExecutionCheckpoint {
        let task_outputs = self
            .tasks
            .iter()
            .filter(|(_, state)| state.status.is_success())
            .map(|(id, state)| (id.clone(), state.outputs.clone()))
            .collect();

        let checkpoint = ExecutionCheckpoint {
            id: spec.id.clone(),
            phase_id: phase_id.to_string(),
            gate: spec.gate,
            created_at: Utc::now(),
            completed_phases: self.progress.completed_phases.clone(),
            task_outputs,
        };
        self.checkpoints.push(checkpoint.clone());
        checkpoint
    }

    pub fn latest_checkpoint(&self) -> Option<&ExecutionCheckpoint> {
        self.checkpoints.last()
    }

    /// Restore a previously recorded checkpoint. Phases completed after it are
    /// reset; the checkpoint list itself is never truncated.
    pub fn restore_checkpoint(
        &mut self,
        checkpoint_id: &str,
        definition: &WorkflowDefinition,
    ) -> DomainResult<()> {
        let checkpoint = self
            .checkpoints
            .iter()
            .rev()
            .find(|c| c.id == checkpoint_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::CheckpointNotFound(checkpoint_id.to_string()))?;

        for phase in &definition.phases {
            if checkpoint.completed_phases.contains(&phase.id) {
                continue;
            }
            let state = self.phase_state_mut(&phase.id);
            if state.status == PhaseStatus::Skipped {
                continue;
            }
            *state = PhaseState {
                status: PhaseStatus::RolledBack,
                attempts: state.attempts,
                ..PhaseState::default()
            };
            for task in &phase.tasks {
                self.tasks.insert(task.id.clone(), TaskState::default());
            }
        }

        for (task_id, outputs) in &checkpoint.task_outputs {
            self.task_state_mut(task_id).outputs.clone_from(outputs);
        }

        self.progress.completed_phases = checkpoint.completed_phases;
        self.progress.active_phases.clear();
        Ok(())
    }

    /// Progress (0-100) of one phase: mean task progress, counting
    /// dependency-satisfying tasks as done.
    pub fn phase_progress(&self, phase: &Phase) -> f64 {
        if phase.tasks.is_empty() {
            return match self.phase_state(&phase.id).map(|s| s.status) {
                Some(PhaseStatus::Completed | PhaseStatus::Skipped) => 100.0,
                _ => 0.0,
            };
        }
        let total: f64 = phase
            .tasks
            .iter()
            .map(|t| {
                self.task_state(&t.id).map_or(0.0, |s| {
                    if s.status.satisfies_dependents() {
                        100.0
                    } else {
                        s.progress
                    }
                })
            })
            .sum();
        total / phase.tasks.len() as f64
    }

    /// Recompute phase and overall progress from task state.
    pub fn recompute_progress(&mut self, definition: &WorkflowDefinition) {
        if definition.phases.is_empty() {
            self.progress.overall_progress = 100.0;
            return;
        }

        let mut sum = 0.0;
        for phase in &definition.phases {
            let status = self.phase_state(&phase.id).map(|s| s.status);
            let value = match status {
                Some(PhaseStatus::Completed | PhaseStatus::Skipped) => 100.0,
                Some(PhaseStatus::Running) => self.phase_progress(phase),
                _ => 0.0,
            };
            if status == Some(PhaseStatus::Running) {
                self.phase_state_mut(&phase.id).progress = value;
            }
            sum += value;
        }
        self.progress.overall_progress = sum / definition.phases.len() as f64;
    }

    /// Switch this execution to a fallback workflow, keeping the listed
    /// completed phases.
    pub fn adopt_workflow(&mut self, definition: &WorkflowDefinition, carried: &[String]) {
        self.fallback_chain.push(self.workflow_id.clone());
        self.workflow_id = definition.id.clone();
        self.workflow_version = definition.version.clone();

        let mut phases = fresh_phase_states(definition);
        let mut tasks = fresh_task_states(definition);
        for phase_id in carried {
            if let Some(state) = self.phases.get(phase_id) {
                phases.insert(phase_id.clone(), state.clone());
            }
            if let Some(phase) = definition.phase(phase_id) {
                for task in &phase.tasks {
                    if let Some(state) = self.tasks.get(&task.id) {
                        tasks.insert(task.id.clone(), state.clone());
                    }
                }
            }
        }

        self.phases = phases;
        self.tasks = tasks;
        self.progress.completed_phases.retain(|p| carried.contains(p));
        self.progress.active_phases.clear();
        self.progress.failed_phases.clear();
        self.progress.skipped_phases.clear();
        self.progress.current_phase = None;
        self.escalation = None;
        self.error = None;
        self.recompute_progress(definition);
    }
}

fn fresh_phase_states(definition: &WorkflowDefinition) -> HashMap<String, PhaseState> {
    definition
        .phases
        .iter()
        .map(|p| (p.id.clone(), PhaseState::default()))
        .collect()
}

fn fresh_task_states(definition: &WorkflowDefinition) -> HashMap<String, TaskState> {
    definition
        .tasks()
        .map(|t| (t.id.clone(), TaskState::default()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::task::Task;
    use crate::domain::models::workflow::ExecutionMode;

    fn two_phase() -> WorkflowDefinition {
        WorkflowDefinition::new("wf")
            .with_phase(
                Phase::new("p1", ExecutionMode::Sequential).with_task(Task::new("t1", "design")),
            )
            .with_phase(
                Phase::new("p2", ExecutionMode::Parallel)
                    .with_task(Task::new("t2", "dev"))
                    .with_task(Task::new("t3", "dev")),
            )
    }

    #[test]
    fn test_status_lattice() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Recovering));
        assert!(Recovering.can_transition_to(Running));
        assert!(Paused.can_transition_to(Running));
        assert!(!Paused.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Cancelled.can_transition_to(Failed));
    }

    #[test]
    fn test_transition_rejects_invalid() {
        let def = two_phase();
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        exec.transition(ExecutionStatus::Running).unwrap();
        assert!(exec.started_at.is_some());
        exec.transition(ExecutionStatus::Completed).unwrap();
        let err = exec.transition(ExecutionStatus::Running).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_progress_counts_phases() {
        let def = two_phase();
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        exec.mark_phase_started("p1");
        exec.task_state_mut("t1").status = TaskStatus::Completed;
        exec.mark_phase_completed("p1");
        exec.mark_phase_started("p2");
        exec.task_state_mut("t2").progress = 50.0;
        exec.recompute_progress(&def);
        assert!((exec.progress.overall_progress - 62.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_checkpoint_restore_resets_later_phases() {
        let def = two_phase();
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        exec.mark_phase_started("p1");
        {
            let t1 = exec.task_state_mut("t1");
            t1.status = TaskStatus::Completed;
            t1.outputs.insert("mockups".to_string(), Value::from("v1"));
        }
        exec.mark_phase_completed("p1");
        exec.record_checkpoint(&CheckpointSpec::automated("after-p1"), "p1");

        exec.mark_phase_started("p2");
        exec.task_state_mut("t2").status = TaskStatus::Completed;
        exec.mark_phase_completed("p2");

        exec.restore_checkpoint("after-p1", &def).unwrap();
        assert_eq!(exec.progress.completed_phases, vec!["p1".to_string()]);
        assert_eq!(exec.task_state("t2").unwrap().status, TaskStatus::Pending);
        assert_eq!(
            exec.task_state("t1").unwrap().outputs.get("mockups"),
            Some(&Value::from("v1"))
        );
        assert_eq!(exec.checkpoints.len(), 1);

        assert!(matches!(
            exec.restore_checkpoint("later", &def),
            Err(OrchestrationError::CheckpointNotFound(_))
        ));
    }

    #[test]
    fn test_performance_running_average() {
        let mut perf = ExecutionPerformance::default();
        perf.record_attempt(true, 100, Some(0.8));
        perf.record_attempt(false, 300, None);
        assert!((perf.average_response_time_ms - 200.0).abs() < f64::EPSILON);
        assert!((perf.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((perf.average_quality - 0.8).abs() < 1e-9);
    }
}
