//! Recovery manager: turns task and phase failures into recovery decisions.
//!
//! Policy order, first match wins: retry with backoff, fallback workflow,
//! escalation along `automatic -> technical-lead -> management`. Every
//! decision except task-to-phase propagation is appended to the execution's
//! recovery log.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::models::{
    EscalationLevel, FailureCause, RecoveryActionKind, RecoveryRecord, RollbackGranularity,
    WorkflowDefinition, WorkflowExecution,
};
use crate::services::workflow_catalog::WorkflowCatalog;

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureScope {
    Task {
        phase_id: String,
        task_id: String,
        cause: FailureCause,
        /// False for failures that would repeat identically (bad input).
        retryable: bool,
    },
    Phase {
        phase_id: String,
    },
}

/// Failure input to the recovery manager.
#[derive(Debug, Clone)]
pub struct FailureContext {
    pub scope: FailureScope,
    pub error: String,
    pub agent_id: Option<String>,
}

impl FailureContext {
    pub fn task(
        phase_id: impl Into<String>,
        task_id: impl Into<String>,
        cause: FailureCause,
        retryable: bool,
        error: impl Into<String>,
    ) -> Self {
        Self {
            scope: FailureScope::Task {
                phase_id: phase_id.into(),
                task_id: task_id.into(),
                cause,
                retryable,
            },
            error: error.into(),
            agent_id: None,
        }
    }

    pub fn phase(phase_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            scope: FailureScope::Phase {
                phase_id: phase_id.into(),
            },
            error: error.into(),
            agent_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: Option<String>) -> Self {
        self.agent_id = agent_id;
        self
    }
}

/// Decision returned by the recovery manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Re-dispatch after `delay`. `attempt` is the 1-based retry number.
    Retry { attempt: u32, delay: Duration },
    /// Task budget exhausted; the phase decides.
    Propagate,
    /// Restart against another workflow definition.
    Fallback { workflow_id: String },
    /// Raised to `level`; above `automatic` the execution waits for a person.
    Escalate {
        level: EscalationLevel,
        awaiting_human: bool,
    },
    /// Nothing left to try.
    Abort { reason: String },
}

/// Applies a workflow's recovery policy to failures.
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    catalog: Arc<WorkflowCatalog>,
}

impl RecoveryManager {
    pub const fn new(catalog: Arc<WorkflowCatalog>) -> Self {
        Self { catalog }
    }

    pub fn handle_failure(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        context: &FailureContext,
    ) -> RecoveryOutcome {
        match &context.scope {
            FailureScope::Task {
                phase_id,
                task_id,
                retryable,
                ..
            } => self.handle_task_failure(execution, definition, phase_id, task_id, *retryable, context),
            FailureScope::Phase { phase_id } => {
                self.handle_phase_failure(execution, definition, phase_id, context)
            }
        }
    }

    fn handle_task_failure(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        phase_id: &str,
        task_id: &str,
        retryable: bool,
        context: &FailureContext,
    ) -> RecoveryOutcome {
        let Some(phase) = definition.phase(phase_id) else {
            return RecoveryOutcome::Propagate;
        };
        if definition.recovery.granularity != RollbackGranularity::Task || !retryable {
            return RecoveryOutcome::Propagate;
        }

        let state = execution.task_state_mut(task_id);
        if state.retries >= phase.retry.max_attempts {
            return RecoveryOutcome::Propagate;
        }
        state.retries += 1;
        let attempt = state.retries;
        let delay = phase.retry.delay(attempt);

        info!(
            execution_id = %execution.id,
            phase_id,
            task_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %context.error,
            "retrying task"
        );
        execution.recovery.push(RecoveryRecord {
            phase_id: Some(phase_id.to_string()),
            task_id: Some(task_id.to_string()),
            attempt: Some(attempt),
            delay_ms: Some(delay.as_millis() as u64),
            ..RecoveryRecord::new(RecoveryActionKind::Retry, context.error.clone())
        });
        RecoveryOutcome::Retry { attempt, delay }
    }

    fn handle_phase_failure(
        &self,
        execution: &mut WorkflowExecution,
        definition: &WorkflowDefinition,
        phase_id: &str,
        context: &FailureContext,
    ) -> RecoveryOutcome {
        match definition.recovery.granularity {
            RollbackGranularity::Workflow => {
                return abort(
                    execution,
                    phase_id,
                    "workflow-granularity recovery requires a fresh execution",
                );
            }
            RollbackGranularity::Phase => {
                if let Some(phase) = definition.phase(phase_id) {
                    let retries = execution
                        .phase_state(phase_id)
                        .map_or(0, |s| s.attempts.saturating_sub(1));
                    if retries < phase.retry.max_attempts {
                        let attempt = retries + 1;
                        let delay = phase.retry.delay(attempt);
                        info!(
                            execution_id = %execution.id,
                            phase_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying phase"
                        );
                        execution.recovery.push(RecoveryRecord {
                            phase_id: Some(phase_id.to_string()),
                            attempt: Some(attempt),
                            delay_ms: Some(delay.as_millis() as u64),
                            ..RecoveryRecord::new(RecoveryActionKind::Retry, context.error.clone())
                        });
                        return RecoveryOutcome::Retry { attempt, delay };
                    }
                }
            }
            RollbackGranularity::Task => {}
        }

        if let Some(workflow_id) = self.fallback_target(execution, definition) {
            info!(
                execution_id = %execution.id,
                from = %execution.workflow_id,
                to = %workflow_id,
                "falling back to alternative workflow"
            );
            execution.recovery.push(RecoveryRecord {
                phase_id: Some(phase_id.to_string()),
                ..RecoveryRecord::new(
                    RecoveryActionKind::Fallback,
                    format!("switching to workflow {workflow_id}: {}", context.error),
                )
            });
            return RecoveryOutcome::Fallback { workflow_id };
        }

        let declared = definition.recovery.escalation_level;
        let level = match execution.escalation {
            None => declared,
            Some(current) => match current.next() {
                Some(next) => next.max(declared),
                None => {
                    return abort(execution, phase_id, "escalation chain exhausted");
                }
            },
        };

        let awaiting_human = level.requires_human();
        warn!(
            execution_id = %execution.id,
            phase_id,
            %level,
            awaiting_human,
            error = %context.error,
            "escalating failure"
        );
        execution.escalation = Some(level);
        execution.recovery.push(RecoveryRecord {
            phase_id: Some(phase_id.to_string()),
            level: Some(level),
            ..RecoveryRecord::new(RecoveryActionKind::Escalation, context.error.clone())
        });
        RecoveryOutcome::Escalate {
            level,
            awaiting_human,
        }
    }

    /// Alternative workflow, if declared, registered and not yet used in this
    /// execution's chain.
    fn fallback_target(
        &self,
        execution: &WorkflowExecution,
        definition: &WorkflowDefinition,
    ) -> Option<String> {
        let target = definition.recovery.alternative_workflow.as_ref()?;
        if target == &execution.workflow_id || execution.fallback_chain.contains(target) {
            return None;
        }
        match self.catalog.get(target) {
            Ok(_) => Some(target.clone()),
            Err(err) => {
                warn!(workflow_id = %target, %err, "alternative workflow is not registered");
                None
            }
        }
    }

    /// Completed phases whose contracts match in the fallback definition:
    /// same phase id, same task ids, same output names.
    pub fn carry_forward(
        current: &WorkflowDefinition,
        fallback: &WorkflowDefinition,
        execution: &WorkflowExecution,
    ) -> Vec<String> {
        execution
            .progress
            .completed_phases
            .iter()
            .filter(|phase_id| {
                let (Some(old), Some(new)) = (current.phase(phase_id), fallback.phase(phase_id))
                else {
                    return false;
                };
                contract(old) == contract(new)
            })
            .cloned()
            .collect()
    }
}

fn contract(phase: &crate::domain::models::Phase) -> BTreeSet<(String, BTreeSet<String>)> {
    phase
        .tasks
        .iter()
        .map(|t| {
            (
                t.id.clone(),
                t.outputs.iter().map(|o| o.name.clone()).collect(),
            )
        })
        .collect()
}

fn abort(execution: &mut WorkflowExecution, phase_id: &str, reason: &str) -> RecoveryOutcome {
    warn!(execution_id = %execution.id, phase_id, reason, "recovery aborted");
    execution.recovery.push(RecoveryRecord {
        phase_id: Some(phase_id.to_string()),
        ..RecoveryRecord::new(RecoveryActionKind::Abort, reason)
    });
    RecoveryOutcome::Abort {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::domain::models::{
        BackoffStrategy, ExecutionMode, ExecutionOptions, Phase, RecoveryPolicy, RetryPolicy, Task,
        TaskStatus,
    };

    fn definition(recovery: RecoveryPolicy) -> WorkflowDefinition {
        WorkflowDefinition::new("primary")
            .with_phase(
                Phase::new("build", ExecutionMode::Parallel)
                    .with_retry(RetryPolicy::new(3, BackoffStrategy::Exponential, 10))
                    .with_task(Task::new("frontend", "development").with_output("bundle")),
            )
            .with_recovery(recovery)
    }

    fn manager_with(defs: Vec<WorkflowDefinition>) -> RecoveryManager {
        let catalog = Arc::new(WorkflowCatalog::new());
        for def in defs {
            catalog.register(def).unwrap();
        }
        RecoveryManager::new(catalog)
    }

    fn task_failure() -> FailureContext {
        FailureContext::task("build", "frontend", FailureCause::ExecutionFailed, true, "boom")
    }

    #[test]
    fn test_task_retries_then_propagates_then_escalates() {
        let def = definition(RecoveryPolicy::default());
        let manager = manager_with(vec![]);
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());

        let mut delays = Vec::new();
        for expected in 1..=3 {
            match manager.handle_failure(&mut exec, &def, &task_failure()) {
                RecoveryOutcome::Retry { attempt, delay } => {
                    assert_eq!(attempt, expected);
                    delays.push(delay);
                }
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(
            manager.handle_failure(&mut exec, &def, &task_failure()),
            RecoveryOutcome::Propagate
        );

        let outcome = manager.handle_failure(&mut exec, &def, &FailureContext::phase("build", "boom"));
        assert_eq!(
            outcome,
            RecoveryOutcome::Escalate {
                level: EscalationLevel::Automatic,
                awaiting_human: false
            }
        );

        let actions: Vec<RecoveryActionKind> = exec.recovery.iter().map(|r| r.action).collect();
        assert_eq!(
            actions,
            vec![
                RecoveryActionKind::Retry,
                RecoveryActionKind::Retry,
                RecoveryActionKind::Retry,
                RecoveryActionKind::Escalation
            ]
        );
    }

    #[test]
    fn test_non_retryable_task_failure_propagates() {
        let def = definition(RecoveryPolicy::default());
        let manager = manager_with(vec![]);
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        let ctx = FailureContext::task("build", "frontend", FailureCause::ExecutionFailed, false, "bad input");
        assert_eq!(manager.handle_failure(&mut exec, &def, &ctx), RecoveryOutcome::Propagate);
        assert!(exec.recovery.is_empty());
    }

    #[test]
    fn test_phase_granularity_retries_phase() {
        let def = definition(RecoveryPolicy {
            granularity: RollbackGranularity::Phase,
            ..RecoveryPolicy::default()
        });
        let manager = manager_with(vec![]);
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());

        assert_eq!(
            manager.handle_failure(&mut exec, &def, &task_failure()),
            RecoveryOutcome::Propagate
        );
        exec.mark_phase_started("build");
        assert!(matches!(
            manager.handle_failure(&mut exec, &def, &FailureContext::phase("build", "boom")),
            RecoveryOutcome::Retry { attempt: 1, .. }
        ));
    }

    #[test]
    fn test_fallback_used_once_then_escalation_chain() {
        let fallback = WorkflowDefinition::new("backup").with_phase(
            Phase::new("build", ExecutionMode::Sequential)
                .with_task(Task::new("frontend", "development").with_output("bundle")),
        );
        let def = definition(RecoveryPolicy {
            alternative_workflow: Some("backup".to_string()),
            escalation_level: EscalationLevel::TechnicalLead,
            ..RecoveryPolicy::default()
        });
        let manager = manager_with(vec![fallback.clone()]);
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        let phase_failure = FailureContext::phase("build", "boom");

        assert_eq!(
            manager.handle_failure(&mut exec, &def, &phase_failure),
            RecoveryOutcome::Fallback {
                workflow_id: "backup".to_string()
            }
        );
        exec.adopt_workflow(&fallback, &[]);

        assert_eq!(
            manager.handle_failure(&mut exec, &def, &phase_failure),
            RecoveryOutcome::Escalate {
                level: EscalationLevel::TechnicalLead,
                awaiting_human: true
            }
        );
        assert_eq!(
            manager.handle_failure(&mut exec, &def, &phase_failure),
            RecoveryOutcome::Escalate {
                level: EscalationLevel::Management,
                awaiting_human: true
            }
        );
        assert!(matches!(
            manager.handle_failure(&mut exec, &def, &phase_failure),
            RecoveryOutcome::Abort { .. }
        ));
        assert_eq!(exec.recovery.last().map(|r| r.action), Some(RecoveryActionKind::Abort));
    }

    #[test]
    fn test_workflow_granularity_aborts() {
        let def = definition(RecoveryPolicy {
            granularity: RollbackGranularity::Workflow,
            ..RecoveryPolicy::default()
        });
        let manager = manager_with(vec![]);
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        assert!(matches!(
            manager.handle_failure(&mut exec, &def, &FailureContext::phase("build", "boom")),
            RecoveryOutcome::Abort { .. }
        ));
    }

    #[test]
    fn test_carry_forward_requires_matching_contract() {
        let current = WorkflowDefinition::new("a")
            .with_phase(
                Phase::new("design", ExecutionMode::Sequential)
                    .with_task(Task::new("mockups", "design").with_output("files")),
            )
            .with_phase(
                Phase::new("build", ExecutionMode::Sequential)
                    .with_task(Task::new("site", "development").with_output("bundle")),
            );
        let fallback = WorkflowDefinition::new("b")
            .with_phase(
                Phase::new("design", ExecutionMode::Parallel)
                    .with_task(Task::new("mockups", "design").with_output("files")),
            )
            .with_phase(
                Phase::new("build", ExecutionMode::Sequential)
                    .with_task(Task::new("site", "development").with_output("archive")),
            );

        let mut exec = WorkflowExecution::new(&current, HashMap::new(), ExecutionOptions::default());
        exec.task_state_mut("mockups").status = TaskStatus::Completed;
        exec.mark_phase_completed("design");
        exec.mark_phase_completed("build");

        assert_eq!(
            RecoveryManager::carry_forward(&current, &fallback, &exec),
            vec!["design".to_string()]
        );
    }
}
