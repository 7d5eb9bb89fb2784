//! Phase executor: drives one phase's task set according to its mode.
//!
//! Task-level errors are absorbed here and translated into a
//! [`PhaseOutcome`]. Waiting on dependencies and on agent capacity is event
//! driven: dependency waits park on the execution's change counter, capacity
//! waits on the registry's `Notify`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::OrchestrationError;
use crate::domain::models::{
    CompensationAction, CompensationKind, EventPayload, ExecutionMode, FailureCause, InnerMode,
    Phase, RecoveryActionKind, SkipReason, Task, TaskConstraintKind, TaskMetrics, TaskState,
    TaskStatus, ValidationRule, WorkflowDefinition, WorkflowExecution,
};
use crate::domain::ports::{
    is_truthy, CapabilityError, CapabilityExecutor, CapabilityRequest, CapabilityResult,
    ConditionContext, ConditionEvaluator, ProgressReporter,
};
use crate::services::agent_registry::{AgentSlaBreach, ReleaseOutcome};
use crate::services::dependency_resolver::{producers, DependencyResolver, Readiness};
use crate::services::execution_context::ExecutionContext;
use crate::services::recovery_manager::{FailureContext, RecoveryManager, RecoveryOutcome};
use crate::services::task_dispatcher::{AgentLease, TaskDispatcher};

/// Aggregated result of one phase run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    Skipped(SkipReason),
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Compensated,
    Failed(String),
    Cancelled,
}

enum Wait {
    Ready,
    Blocked(String),
    Cancelled,
}

enum AttemptResult {
    Succeeded,
    Failed(AttemptFailure),
    Cancelled,
}

struct AttemptFailure {
    cause: FailureCause,
    retryable: bool,
    error: String,
    agent_id: Option<String>,
    attempt: u32,
}

enum FailureDecision {
    Retry,
    Done(TaskOutcome),
}

/// Identity of one run of a phase's task set.
struct RunScope<'a> {
    phase: &'a Phase,
    phase_attempt: u32,
    iteration: u32,
}

impl RunScope<'_> {
    /// Registry key; unique per phase attempt, loop iteration and task attempt.
    fn task_key(&self, execution_id: Uuid, task_id: &str, attempt: u32) -> String {
        format!(
            "{execution_id}/{}#{}.{}/{task_id}#{attempt}",
            self.phase.id, self.phase_attempt, self.iteration
        )
    }
}

pub struct PhaseExecutor {
    dispatcher: Arc<TaskDispatcher>,
    recovery: Arc<RecoveryManager>,
    executor: Arc<dyn CapabilityExecutor>,
    conditions: Arc<dyn ConditionEvaluator>,
    resolver: DependencyResolver,
}

impl std::fmt::Debug for PhaseExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseExecutor")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl PhaseExecutor {
    pub fn new(
        dispatcher: Arc<TaskDispatcher>,
        recovery: Arc<RecoveryManager>,
        executor: Arc<dyn CapabilityExecutor>,
        conditions: Arc<dyn ConditionEvaluator>,
    ) -> Self {
        Self {
            dispatcher,
            recovery,
            executor,
            conditions,
            resolver: DependencyResolver::new(),
        }
    }

    /// Evaluate a named condition against the current execution state.
    pub fn evaluate_condition(
        &self,
        ctx: &ExecutionContext,
        condition: &str,
        iteration: u32,
    ) -> anyhow::Result<bool> {
        ctx.read(|execution| {
            self.conditions.evaluate(
                condition,
                &ConditionContext {
                    execution,
                    iteration,
                },
            )
        })
    }

    /// Run a phase to a terminal outcome. Phase bookkeeping (start, finish,
    /// skip marking) belongs to the caller.
    pub async fn run_phase(&self, ctx: &Arc<ExecutionContext>, phase: &Phase) -> PhaseOutcome {
        match &phase.mode {
            ExecutionMode::Conditional { condition, inner } => {
                match self.evaluate_condition(ctx, condition, 0) {
                    Ok(true) => self.run_task_set(ctx, phase, *inner, 1).await,
                    Ok(false) => {
                        info!(execution_id = %ctx.id(), phase_id = %phase.id, condition, "condition false, skipping phase");
                        PhaseOutcome::Skipped(SkipReason::Condition)
                    }
                    Err(err) => PhaseOutcome::Failed(format!(
                        "condition '{condition}' could not be evaluated: {err}"
                    )),
                }
            }
            ExecutionMode::Loop {
                until,
                max_iterations,
                inner,
            } => self.run_loop(ctx, phase, until, *max_iterations, *inner).await,
            mode => self.run_task_set(ctx, phase, mode.inner(), 1).await,
        }
    }

    async fn run_loop(
        &self,
        ctx: &Arc<ExecutionContext>,
        phase: &Phase,
        until: &str,
        max_iterations: u32,
        inner: InnerMode,
    ) -> PhaseOutcome {
        for iteration in 1..=max_iterations.max(1) {
            ctx.update(|execution| {
                if iteration > 1 {
                    for task in &phase.tasks {
                        execution.tasks.insert(task.id.clone(), TaskState::default());
                    }
                }
                execution.phase_state_mut(&phase.id).iteration = iteration;
            });

            let outcome = self.run_task_set(ctx, phase, inner, iteration).await;
            if outcome != PhaseOutcome::Completed {
                return outcome;
            }

            match self.evaluate_condition(ctx, until, iteration) {
                Ok(true) => {
                    debug!(execution_id = %ctx.id(), phase_id = %phase.id, iteration, "loop exit condition met");
                    return PhaseOutcome::Completed;
                }
                Ok(false) => {}
                Err(err) => {
                    return PhaseOutcome::Failed(format!(
                        "loop condition '{until}' could not be evaluated: {err}"
                    ))
                }
            }
        }

        info!(execution_id = %ctx.id(), phase_id = %phase.id, max_iterations, "loop reached iteration bound");
        PhaseOutcome::Completed
    }

    async fn run_task_set(
        &self,
        ctx: &Arc<ExecutionContext>,
        phase: &Phase,
        inner: InnerMode,
        iteration: u32,
    ) -> PhaseOutcome {
        let phase_attempt = ctx.read(|e| e.phase_state(&phase.id).map_or(1, |s| s.attempts));
        let scope = RunScope {
            phase,
            phase_attempt,
            iteration,
        };

        let outcomes: Vec<(String, TaskOutcome)> = match inner {
            InnerMode::Sequential => {
                let mut outcomes = Vec::with_capacity(phase.tasks.len());
                for task in phase.ordered_tasks() {
                    let outcome = self.run_task(ctx, &scope, task).await;
                    let halt = matches!(outcome, TaskOutcome::Failed(_) | TaskOutcome::Cancelled);
                    outcomes.push((task.id.clone(), outcome));
                    if halt {
                        break;
                    }
                }
                outcomes
            }
            InnerMode::Parallel | InnerMode::ForkJoin => {
                let scope = &scope;
                join_all(phase.tasks.iter().map(|task| async move {
                    (task.id.clone(), self.run_task(ctx, scope, task).await)
                }))
                .await
            }
        };

        if ctx.is_cancelled() {
            return PhaseOutcome::Cancelled;
        }

        let failures: Vec<String> = outcomes
            .iter()
            .filter_map(|(task_id, outcome)| match outcome {
                TaskOutcome::Failed(error) => Some(format!("task {task_id}: {error}")),
                _ => None,
            })
            .collect();

        if failures.is_empty() {
            PhaseOutcome::Completed
        } else {
            PhaseOutcome::Failed(failures.join("; "))
        }
    }

    async fn run_task(
        &self,
        ctx: &Arc<ExecutionContext>,
        scope: &RunScope<'_>,
        task: &Task,
    ) -> TaskOutcome {
        let already_done = ctx.read(|e| {
            e.task_state(&task.id)
                .is_some_and(|s| s.status.satisfies_dependents())
        });
        if already_done {
            return TaskOutcome::Succeeded;
        }

        match self.wait_until_ready(ctx, task).await {
            Wait::Ready => {}
            Wait::Blocked(reason) => {
                debug!(execution_id = %ctx.id(), task_id = %task.id, reason, "task blocked by dependency");
                ctx.update(|e| {
                    let state = e.task_state_mut(&task.id);
                    state.status = TaskStatus::Cancelled;
                    state.last_error = Some(reason.clone());
                });
                return TaskOutcome::Failed(reason);
            }
            Wait::Cancelled => {
                mark_cancelled(ctx, task);
                return TaskOutcome::Cancelled;
            }
        }

        loop {
            if ctx.is_cancelled() {
                mark_cancelled(ctx, task);
                return TaskOutcome::Cancelled;
            }

            let attempt = ctx.update(|e| {
                let state = e.task_state_mut(&task.id);
                state.attempts += 1;
                state.status = TaskStatus::Waiting;
                state.attempts
            });

            match self.attempt(ctx, scope, task, attempt).await {
                AttemptResult::Succeeded => return TaskOutcome::Succeeded,
                AttemptResult::Cancelled => {
                    mark_cancelled(ctx, task);
                    return TaskOutcome::Cancelled;
                }
                AttemptResult::Failed(failure) => {
                    match self.handle_failure(ctx, scope, task, failure).await {
                        FailureDecision::Retry => {}
                        FailureDecision::Done(outcome) => return outcome,
                    }
                }
            }
        }
    }

    async fn wait_until_ready(&self, ctx: &ExecutionContext, task: &Task) -> Wait {
        let definition = ctx.definition();
        // Subscribe before reading so a change in between is not missed.
        let mut changes = ctx.subscribe_changes();
        loop {
            if ctx.is_cancelled() {
                return Wait::Cancelled;
            }
            match ctx.read(|e| self.resolver.task_readiness(&definition, task, e)) {
                Readiness::Ready => return Wait::Ready,
                Readiness::Blocked(reason) => return Wait::Blocked(reason),
                Readiness::Waiting => {}
            }
            tokio::select! {
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Wait::Blocked("execution closed".to_string());
                    }
                }
                () = ctx.cancelled() => return Wait::Cancelled,
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &Arc<ExecutionContext>,
        scope: &RunScope<'_>,
        task: &Task,
        attempt: u32,
    ) -> AttemptResult {
        let execution_id = ctx.id();
        let task_key = scope.task_key(execution_id, &task.id, attempt);

        let acquired = tokio::select! {
            biased;
            () = ctx.cancelled() => return AttemptResult::Cancelled,
            acquired = self.dispatcher.acquire(&task.capability, &task_key) => acquired,
        };
        let lease = match acquired {
            Ok(lease) => lease,
            Err(err) => {
                return AttemptResult::Failed(AttemptFailure {
                    cause: FailureCause::ExecutionFailed,
                    retryable: err.is_retryable(),
                    error: err.to_string(),
                    agent_id: None,
                    attempt,
                })
            }
        };

        let definition = ctx.definition();
        let agent_id = lease.agent_id().to_string();
        self.mark_running(ctx, task, &lease, attempt);

        let inputs = match ctx.read(|e| resolve_inputs(&definition, task, e)) {
            Ok(inputs) => inputs,
            Err(reason) => {
                lease.release(&ReleaseOutcome::Abandoned);
                ctx.update(|e| {
                    e.resources.in_flight = e.resources.in_flight.saturating_sub(1);
                });
                return AttemptResult::Failed(AttemptFailure {
                    cause: FailureCause::ExecutionFailed,
                    retryable: false,
                    error: reason,
                    agent_id: Some(agent_id),
                    attempt,
                });
            }
        };

        let request = CapabilityRequest {
            execution_id,
            task_id: task.id.clone(),
            capability: task.capability.clone(),
            agent_id: agent_id.clone(),
            attempt,
            inputs,
            expected_outputs: task.outputs.iter().map(|o| o.name.clone()).collect(),
            estimated_duration_ms: task.estimated_duration_ms,
        };

        debug!(execution_id = %execution_id, task_id = %task.id, agent_id, attempt, "executing capability");
        let started = Instant::now();
        let result = self
            .executor
            .execute(request, progress_reporter(ctx, &definition, &task.id))
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => match validate(task, &output, duration_ms) {
                Ok(()) => {
                    let breach = lease.release(&ReleaseOutcome::Success {
                        duration_ms,
                        quality: output.quality_score,
                    });
                    self.record_success(ctx, &definition, task, &agent_id, output, duration_ms, breach);
                    AttemptResult::Succeeded
                }
                Err(reason) => {
                    let breach = lease.release(&ReleaseOutcome::Failure { duration_ms });
                    record_failed_run(ctx, task, duration_ms, output.cost, breach);
                    AttemptResult::Failed(AttemptFailure {
                        cause: FailureCause::ValidationFailed,
                        retryable: true,
                        error: OrchestrationError::TaskValidation {
                            task_id: task.id.clone(),
                            reason,
                        }
                        .to_string(),
                        agent_id: Some(agent_id),
                        attempt,
                    })
                }
            },
            Err(err) => {
                let outcome = match &err {
                    CapabilityError::AgentFault(reason) => ReleaseOutcome::AgentFault {
                        duration_ms,
                        reason: reason.clone(),
                    },
                    _ => ReleaseOutcome::Failure { duration_ms },
                };
                let breach = lease.release(&outcome);
                record_failed_run(ctx, task, duration_ms, 0.0, breach);
                AttemptResult::Failed(AttemptFailure {
                    cause: err.cause(),
                    retryable: err.is_retryable(),
                    error: err.to_string(),
                    agent_id: Some(agent_id),
                    attempt,
                })
            }
        }
    }

    fn mark_running(&self, ctx: &ExecutionContext, task: &Task, lease: &AgentLease, attempt: u32) {
        let capacity = self.dispatcher.config().max_concurrent_tasks.max(1);
        let agent = lease.agent();
        let waited = lease.waited();
        let execution_id = ctx.id();

        ctx.update_and_emit(|e| {
            let state = e.task_state_mut(&task.id);
            state.status = TaskStatus::Running;
            state.agent_id = Some(agent.id.clone());
            state.progress = 0.0;
            state.started_at = Some(Utc::now());

            let resources = &mut e.resources;
            resources.in_flight += 1;
            resources.peak_in_flight = resources.peak_in_flight.max(resources.in_flight);
            resources.utilization = resources.peak_in_flight as f64 / capacity as f64;
            if waited {
                resources.conflicts += 1;
            }
            let allocation = resources.allocations.entry(agent.id.clone()).or_default();
            allocation.tasks += 1;
            allocation.cpu_units = allocation.cpu_units.max(agent.resources.cpu_units);
            allocation.memory_mb = allocation.memory_mb.max(agent.resources.memory_mb);

            vec![EventPayload::TaskDispatched {
                execution_id,
                task_id: task.id.clone(),
                agent_id: agent.id.clone(),
                attempt,
            }]
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn record_success(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        task: &Task,
        agent_id: &str,
        output: CapabilityResult,
        duration_ms: u64,
        breach: Option<AgentSlaBreach>,
    ) {
        let execution_id = ctx.id();
        let efficiency = if task.estimated_duration_ms == 0 {
            1.0
        } else {
            task.estimated_duration_ms as f64 / duration_ms.max(1) as f64
        };

        ctx.update_and_emit(|e| {
            let state = e.task_state_mut(&task.id);
            state.status = TaskStatus::Completed;
            state.progress = 100.0;
            state.outputs = output.outputs;
            state.last_error = None;
            state.completed_at = Some(Utc::now());
            state.metrics = TaskMetrics {
                duration_ms,
                quality_score: output.quality_score,
                cost: output.cost,
                efficiency,
            };

            e.performance
                .record_attempt(true, duration_ms, output.quality_score);
            e.resources.in_flight = e.resources.in_flight.saturating_sub(1);
            e.resources.total_cost += output.cost;
            e.recompute_progress(definition);

            let mut events = vec![EventPayload::TaskCompleted {
                execution_id,
                task_id: task.id.clone(),
                agent_id: agent_id.to_string(),
            }];
            events.extend(breach.map(breach_event));
            events
        });
        debug!(execution_id = %execution_id, task_id = %task.id, agent_id, duration_ms, "task completed");
    }

    async fn handle_failure(
        &self,
        ctx: &Arc<ExecutionContext>,
        scope: &RunScope<'_>,
        task: &Task,
        failure: AttemptFailure,
    ) -> FailureDecision {
        let execution_id = ctx.id();
        warn!(
            execution_id = %execution_id,
            phase_id = %scope.phase.id,
            task_id = %task.id,
            agent_id = ?failure.agent_id,
            attempt = failure.attempt,
            cause = %failure.cause,
            error = %failure.error,
            "task attempt failed"
        );
        ctx.update_and_emit(|e| {
            e.task_state_mut(&task.id).last_error = Some(failure.error.clone());
            vec![EventPayload::TaskFailed {
                execution_id,
                task_id: task.id.clone(),
                agent_id: failure.agent_id.clone(),
                error: failure.error.clone(),
                attempt: failure.attempt,
            }]
        });

        let compensation = task.compensation_for(failure.cause).cloned();
        if failure.cause == FailureCause::ValidationFailed {
            if let Some(action) = &compensation {
                return FailureDecision::Done(self.compensate(ctx, scope, task, action).await);
            }
        }

        let definition = ctx.definition();
        let context = FailureContext::task(
            &scope.phase.id,
            &task.id,
            failure.cause,
            failure.retryable,
            failure.error.clone(),
        )
        .with_agent(failure.agent_id.clone());
        let decision = ctx.update(|e| self.recovery.handle_failure(e, &definition, &context));

        if let RecoveryOutcome::Retry { attempt, delay } = decision {
            ctx.update_and_emit(|e| {
                let state = e.task_state_mut(&task.id);
                state.reset_for_retry();
                state.status = TaskStatus::Waiting;
                vec![EventPayload::RecoveryApplied {
                    execution_id,
                    action: RecoveryActionKind::Retry,
                    detail: format!(
                        "task {} retry {attempt} after {}ms",
                        task.id,
                        delay.as_millis()
                    ),
                }]
            });
            return tokio::select! {
                () = tokio::time::sleep(delay) => FailureDecision::Retry,
                () = ctx.cancelled() => {
                    mark_cancelled(ctx, task);
                    FailureDecision::Done(TaskOutcome::Cancelled)
                }
            };
        }

        if let Some(action) = &compensation {
            return FailureDecision::Done(self.compensate(ctx, scope, task, action).await);
        }

        ctx.update(|e| {
            let state = e.task_state_mut(&task.id);
            state.status = TaskStatus::Failed;
            state.completed_at = Some(Utc::now());
        });
        FailureDecision::Done(TaskOutcome::Failed(failure.error))
    }

    async fn compensate(
        &self,
        ctx: &Arc<ExecutionContext>,
        scope: &RunScope<'_>,
        task: &Task,
        action: &CompensationAction,
    ) -> TaskOutcome {
        let execution_id = ctx.id();
        let definition = ctx.definition();
        info!(execution_id = %execution_id, task_id = %task.id, action = %action.action, "applying compensation");

        let outputs = match &action.action {
            CompensationKind::Skip => None,
            CompensationKind::UseDefaults { outputs } => Some(outputs.clone()),
            CompensationKind::RunCapability { capability } => {
                match self.run_substitute(ctx, scope, task, capability).await {
                    Ok(outputs) => Some(outputs),
                    Err(error) => {
                        warn!(execution_id = %execution_id, task_id = %task.id, capability, error, "compensating capability failed");
                        ctx.update(|e| {
                            let state = e.task_state_mut(&task.id);
                            state.status = TaskStatus::Failed;
                            state.last_error = Some(error.clone());
                            state.completed_at = Some(Utc::now());
                        });
                        return TaskOutcome::Failed(error);
                    }
                }
            }
        };

        ctx.update_and_emit(|e| {
            let state = e.task_state_mut(&task.id);
            match outputs {
                Some(outputs) => {
                    state.status = TaskStatus::Compensated;
                    state.outputs = outputs;
                    state.progress = 100.0;
                }
                None => state.status = TaskStatus::Skipped,
            }
            state.completed_at = Some(Utc::now());
            e.recompute_progress(&definition);
            vec![EventPayload::TaskCompensated {
                execution_id,
                task_id: task.id.clone(),
                action: action.action.to_string(),
            }]
        });
        TaskOutcome::Compensated
    }

    /// Dispatch a substitute capability once on behalf of a failed task.
    async fn run_substitute(
        &self,
        ctx: &Arc<ExecutionContext>,
        scope: &RunScope<'_>,
        task: &Task,
        capability: &str,
    ) -> Result<HashMap<String, Value>, String> {
        let execution_id = ctx.id();
        let attempt = ctx.read(|e| e.task_state(&task.id).map_or(0, |s| s.attempts));
        let task_key = format!(
            "{}~{capability}",
            scope.task_key(execution_id, &task.id, attempt)
        );
        let definition = ctx.definition();
        let inputs = ctx.read(|e| resolve_inputs(&definition, task, e))?;

        let lease = tokio::select! {
            biased;
            () = ctx.cancelled() => return Err("cancelled".to_string()),
            acquired = self.dispatcher.acquire(capability, &task_key) => acquired.map_err(|e| e.to_string())?,
        };
        let request = CapabilityRequest {
            execution_id,
            task_id: task.id.clone(),
            capability: capability.to_string(),
            agent_id: lease.agent_id().to_string(),
            attempt,
            inputs,
            expected_outputs: task.outputs.iter().map(|o| o.name.clone()).collect(),
            estimated_duration_ms: task.estimated_duration_ms,
        };

        let started = Instant::now();
        let result = self.executor.execute(request, ProgressReporter::noop()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                lease.release(&ReleaseOutcome::Success {
                    duration_ms,
                    quality: output.quality_score,
                });
                ctx.update(|e| e.resources.total_cost += output.cost);
                Ok(output.outputs)
            }
            Err(err) => {
                lease.release(&ReleaseOutcome::Failure { duration_ms });
                Err(err.to_string())
            }
        }
    }
}

fn mark_cancelled(ctx: &ExecutionContext, task: &Task) {
    ctx.update(|e| {
        let state = e.task_state_mut(&task.id);
        if !state.status.is_terminal() {
            state.status = TaskStatus::Cancelled;
        }
    });
}

fn record_failed_run(
    ctx: &ExecutionContext,
    task: &Task,
    duration_ms: u64,
    cost: f64,
    breach: Option<AgentSlaBreach>,
) {
    ctx.update_and_emit(|e| {
        let state = e.task_state_mut(&task.id);
        state.metrics.duration_ms = duration_ms;
        state.metrics.cost += cost;
        e.performance.record_attempt(false, duration_ms, None);
        e.resources.in_flight = e.resources.in_flight.saturating_sub(1);
        e.resources.total_cost += cost;
        breach.map(breach_event).into_iter().collect()
    });
}

fn breach_event(breach: AgentSlaBreach) -> EventPayload {
    EventPayload::AgentSlaBreached {
        agent_id: breach.agent_id,
        task_key: breach.task_key,
        detail: breach.detail,
    }
}

fn progress_reporter(
    ctx: &Arc<ExecutionContext>,
    definition: &Arc<WorkflowDefinition>,
    task_id: &str,
) -> ProgressReporter {
    let ctx = Arc::clone(ctx);
    let definition = Arc::clone(definition);
    let task_id = task_id.to_string();
    ProgressReporter::new(move |progress| {
        ctx.update(|e| {
            let state = e.task_state_mut(&task_id);
            if state.status == TaskStatus::Running && progress > state.progress {
                state.progress = progress;
                e.recompute_progress(&definition);
            }
        });
    })
}

/// Declared inputs, taken from upstream outputs first and execution inputs
/// second. A missing required input is an error.
fn resolve_inputs(
    definition: &WorkflowDefinition,
    task: &Task,
    execution: &WorkflowExecution,
) -> Result<HashMap<String, Value>, String> {
    let upstream: Vec<&Task> = task
        .dependencies
        .iter()
        .flat_map(|d| producers(definition, &d.on, &task.id))
        .collect();

    let mut inputs = HashMap::with_capacity(task.inputs.len());
    for input in &task.inputs {
        let from_task = |id: &str| {
            execution
                .task_state(id)
                .and_then(|s| s.outputs.get(&input.name))
        };
        let value = upstream
            .iter()
            .find_map(|p| from_task(&p.id))
            .or_else(|| {
                definition
                    .tasks()
                    .filter(|t| t.id != task.id)
                    .find_map(|t| from_task(&t.id))
            })
            .or_else(|| execution.inputs.get(&input.name));

        match value {
            Some(value) => {
                inputs.insert(input.name.clone(), value.clone());
            }
            None if input.required => {
                return Err(format!("missing required input '{}'", input.name));
            }
            None => {}
        }
    }
    Ok(inputs)
}

/// Declared outputs, validation rules and task constraints.
fn validate(task: &Task, result: &CapabilityResult, duration_ms: u64) -> Result<(), String> {
    if let Some(missing) = task
        .outputs
        .iter()
        .find(|o| o.required && !result.outputs.contains_key(&o.name))
    {
        return Err(format!("missing output '{}'", missing.name));
    }

    for rule in &task.validation {
        match rule {
            ValidationRule::Threshold { metric, min, max } => {
                let value = match metric.as_str() {
                    "quality" => result.quality_score,
                    "cost" => Some(result.cost),
                    "duration-ms" => Some(duration_ms as f64),
                    output => result.outputs.get(output).and_then(Value::as_f64),
                };
                let Some(value) = value else {
                    return Err(format!("metric '{metric}' unavailable"));
                };
                if let Some(min) = min.filter(|min| value < *min) {
                    return Err(format!("{metric} {value:.2} below minimum {min:.2}"));
                }
                if let Some(max) = max.filter(|max| value > *max) {
                    return Err(format!("{metric} {value:.2} above maximum {max:.2}"));
                }
            }
            ValidationRule::Required { output } => {
                if !result.outputs.get(output).is_some_and(is_truthy) {
                    return Err(format!("required output '{output}' missing or empty"));
                }
            }
        }
    }

    for constraint in &task.constraints {
        let violated = match constraint.kind {
            TaskConstraintKind::MaxCost => result.cost > constraint.value,
            TaskConstraintKind::MinQuality => result
                .quality_score
                .is_some_and(|q| q < constraint.value),
            TaskConstraintKind::MaxDurationMs => duration_ms as f64 > constraint.value,
        };
        if violated {
            return Err(format!(
                "constraint {:?} {} violated",
                constraint.kind, constraint.value
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::adapters::condition::OutputConditionEvaluator;
    use crate::domain::models::{
        Agent, BackoffStrategy, ExecutionOptions, FailureCondition, RetryPolicy, TaskIo,
    };
    use crate::services::agent_registry::AgentRegistry;
    use crate::services::event_bus::EventBus;
    use crate::services::task_dispatcher::DispatcherConfig;
    use crate::services::workflow_catalog::WorkflowCatalog;

    /// Records start order; fails tasks listed in `failing`.
    #[derive(Default)]
    struct ScriptedExecutor {
        started: Mutex<Vec<String>>,
        failing: Vec<String>,
        quality: Option<f64>,
    }

    #[async_trait]
    impl CapabilityExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            request: CapabilityRequest,
            progress: ProgressReporter,
        ) -> Result<CapabilityResult, CapabilityError> {
            self.started.lock().unwrap().push(request.task_id.clone());
            progress.report(50.0);
            if self.failing.contains(&request.task_id) {
                return Err(CapabilityError::Failed("scripted".to_string()));
            }
            Ok(CapabilityResult {
                outputs: request
                    .expected_outputs
                    .iter()
                    .map(|name| (name.clone(), Value::from(true)))
                    .collect(),
                quality_score: self.quality,
                cost: 1.0,
            })
        }
    }

    fn setup(
        definition: WorkflowDefinition,
        executor: Arc<ScriptedExecutor>,
    ) -> (PhaseExecutor, Arc<ExecutionContext>) {
        let registry = Arc::new(AgentRegistry::new());
        registry
            .register(Agent::new("worker", ["dev"]).with_max_concurrent_tasks(4))
            .unwrap();
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry,
            DispatcherConfig {
                max_concurrent_tasks: 4,
                acquire_timeout: Duration::from_millis(200),
            },
        ));
        let recovery = Arc::new(RecoveryManager::new(Arc::new(WorkflowCatalog::new())));
        let phases = PhaseExecutor::new(
            dispatcher,
            recovery,
            executor,
            Arc::new(OutputConditionEvaluator),
        );
        let definition = Arc::new(definition);
        let execution =
            WorkflowExecution::new(&definition, HashMap::new(), ExecutionOptions::default());
        let ctx = ExecutionContext::new(execution, definition, Arc::new(EventBus::default()));
        (phases, ctx)
    }

    fn quick_retry(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, BackoffStrategy::Linear, 1)
    }

    #[tokio::test]
    async fn test_sequential_runs_in_priority_then_declaration_order() {
        let phase = Phase::new("p", ExecutionMode::Sequential)
            .with_task(Task::new("c", "dev").with_priority(5))
            .with_task(Task::new("a", "dev").with_priority(1))
            .with_task(Task::new("b", "dev").with_priority(5));
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor::default());
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        ctx.update(|e| e.mark_phase_started("p"));
        assert_eq!(phases.run_phase(&ctx, &phase).await, PhaseOutcome::Completed);
        assert_eq!(*executor.started.lock().unwrap(), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_sequential_failure_halts_phase() {
        let phase = Phase::new("p", ExecutionMode::Sequential)
            .with_retry(quick_retry(1))
            .with_task(Task::new("first", "dev"))
            .with_task(Task::new("second", "dev"));
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor {
            failing: vec!["first".to_string()],
            ..ScriptedExecutor::default()
        });
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        ctx.update(|e| e.mark_phase_started("p"));
        assert!(matches!(
            phases.run_phase(&ctx, &phase).await,
            PhaseOutcome::Failed(_)
        ));
        let snapshot = ctx.snapshot();
        assert_eq!(snapshot.task_state("first").unwrap().status, TaskStatus::Failed);
        assert_eq!(snapshot.task_state("first").unwrap().attempts, 2);
        assert_eq!(snapshot.task_state("second").unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_parallel_failure_does_not_cancel_siblings() {
        let phase = Phase::new("p", ExecutionMode::Parallel)
            .with_retry(RetryPolicy::none())
            .with_task(Task::new("ok", "dev"))
            .with_task(Task::new("bad", "dev"));
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor {
            failing: vec!["bad".to_string()],
            ..ScriptedExecutor::default()
        });
        let (phases, ctx) = setup(def, executor);

        ctx.update(|e| e.mark_phase_started("p"));
        assert!(matches!(
            phases.run_phase(&ctx, &phase).await,
            PhaseOutcome::Failed(_)
        ));
        assert_eq!(
            ctx.snapshot().task_state("ok").unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_validation_failure_uses_compensation() {
        let phase = Phase::new("p", ExecutionMode::Sequential).with_task(
            Task::new("scored", "dev")
                .with_output("report")
                .with_validation(ValidationRule::Threshold {
                    metric: "quality".to_string(),
                    min: Some(0.9),
                    max: None,
                })
                .with_compensation(
                    FailureCondition::ValidationFailed,
                    CompensationKind::UseDefaults {
                        outputs: HashMap::from([("report".to_string(), Value::from("stub"))]),
                    },
                ),
        );
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor {
            quality: Some(0.5),
            ..ScriptedExecutor::default()
        });
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        ctx.update(|e| e.mark_phase_started("p"));
        assert_eq!(phases.run_phase(&ctx, &phase).await, PhaseOutcome::Completed);

        let snapshot = ctx.snapshot();
        let state = snapshot.task_state("scored").unwrap();
        assert_eq!(state.status, TaskStatus::Compensated);
        assert_eq!(state.outputs.get("report"), Some(&Value::from("stub")));
        assert_eq!(executor.started.lock().unwrap().len(), 1);
        assert!(snapshot.recovery.is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_input_fails_without_retry() {
        let phase = Phase::new("p", ExecutionMode::Sequential)
            .with_task(Task::new("needs", "dev").with_input(TaskIo::new("brief")));
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor::default());
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        ctx.update(|e| e.mark_phase_started("p"));
        assert!(matches!(
            phases.run_phase(&ctx, &phase).await,
            PhaseOutcome::Failed(_)
        ));
        assert!(executor.started.lock().unwrap().is_empty());
        assert_eq!(ctx.snapshot().task_state("needs").unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_substitute_capability_needs_declared_inputs() {
        let phase = Phase::new("p", ExecutionMode::Sequential).with_task(
            Task::new("needs", "dev")
                .with_input(TaskIo::new("brief"))
                .with_compensation(
                    FailureCondition::Any,
                    CompensationKind::RunCapability {
                        capability: "dev".to_string(),
                    },
                ),
        );
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor::default());
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        ctx.update(|e| e.mark_phase_started("p"));
        assert!(matches!(
            phases.run_phase(&ctx, &phase).await,
            PhaseOutcome::Failed(_)
        ));
        assert!(executor.started.lock().unwrap().is_empty());

        let snapshot = ctx.snapshot();
        let state = snapshot.task_state("needs").unwrap();
        assert_eq!(state.status, TaskStatus::Failed);
        assert!(state
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("missing required input 'brief'")));
        assert_eq!(snapshot.resources.in_flight, 0);
    }

    #[tokio::test]
    async fn test_conditional_phase_skips_when_false() {
        let phase = Phase::new(
            "maybe",
            ExecutionMode::Conditional {
                condition: "never".to_string(),
                inner: InnerMode::Parallel,
            },
        )
        .with_task(Task::new("t", "dev"));
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor::default());
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        assert_eq!(
            phases.run_phase(&ctx, &phase).await,
            PhaseOutcome::Skipped(SkipReason::Condition)
        );
        assert!(executor.started.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_runs_until_iteration_bound_condition() {
        let phase = Phase::new(
            "iterate",
            ExecutionMode::Loop {
                until: "iteration >= 2".to_string(),
                max_iterations: 5,
                inner: InnerMode::Sequential,
            },
        )
        .with_task(Task::new("draft", "dev"));
        let def = WorkflowDefinition::new("wf").with_phase(phase.clone());
        let executor = Arc::new(ScriptedExecutor::default());
        let (phases, ctx) = setup(def, Arc::clone(&executor));

        ctx.update(|e| e.mark_phase_started("iterate"));
        assert_eq!(phases.run_phase(&ctx, &phase).await, PhaseOutcome::Completed);
        assert_eq!(executor.started.lock().unwrap().len(), 2);
        assert_eq!(ctx.snapshot().phase_state("iterate").unwrap().iteration, 2);
    }

    #[test]
    fn test_validate_constraints() {
        let task = Task::new("t", "dev").with_constraint(TaskConstraintKind::MaxCost, 5.0);
        let cheap = CapabilityResult {
            cost: 1.0,
            ..CapabilityResult::default()
        };
        let pricey = CapabilityResult {
            cost: 9.0,
            ..CapabilityResult::default()
        };
        assert!(validate(&task, &cheap, 10).is_ok());
        assert!(validate(&task, &pricey, 10).is_err());
    }
}
