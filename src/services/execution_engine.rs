//! Execution engine: drives one execution from `pending` to a terminal state.
//!
//! Phases run one at a time in resolver order. A failed phase goes to the
//! recovery manager, which decides whether the phase reruns, the execution
//! switches to a fallback workflow, or it escalates. Rollback runs before a
//! rerun only.
//! Pause, resume and cancel are honored at phase boundaries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::domain::errors::OrchestrationError;
use crate::domain::models::{
    CheckpointGate, Enforcement, EventPayload, ExecutionStatus, Phase, PhaseStatus,
    RecoveryActionKind, RollbackStrategy, SkipReason, TaskState, TaskStatus, WorkflowDefinition,
    WorkflowExecution,
};
use crate::domain::ports::{ExecutionStore, Notification, NotificationKind, NotificationSink};
use crate::services::dependency_resolver::{DependencyResolver, Readiness};
use crate::services::execution_context::ExecutionContext;
use crate::services::phase_executor::{PhaseExecutor, PhaseOutcome};
use crate::services::recovery_manager::{FailureContext, RecoveryManager, RecoveryOutcome};
use crate::services::sla_monitor::SlaMonitor;
use crate::services::workflow_catalog::WorkflowCatalog;

/// Configuration for the execution engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Applied to phases that declare no timeout.
    pub default_phase_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_phase_timeout: Duration::from_secs(3600),
        }
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Completed,
    Failed(String),
    Cancelled,
}

/// What the phase loop does after one phase.
enum Step {
    Continue,
    /// The definition changed (fallback); recompute the phase order.
    Restart,
    Stop(Terminal),
}

pub struct ExecutionEngine {
    catalog: Arc<WorkflowCatalog>,
    resolver: DependencyResolver,
    phases: PhaseExecutor,
    recovery: Arc<RecoveryManager>,
    sla: SlaMonitor,
    store: Arc<dyn ExecutionStore>,
    notifier: Arc<dyn NotificationSink>,
    config: EngineConfig,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("phases", &self.phases)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    pub fn new(
        catalog: Arc<WorkflowCatalog>,
        phases: PhaseExecutor,
        recovery: Arc<RecoveryManager>,
        store: Arc<dyn ExecutionStore>,
        notifier: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            catalog,
            resolver: DependencyResolver::new(),
            phases,
            recovery,
            sla: SlaMonitor::default(),
            store,
            notifier,
            config,
        }
    }

    #[must_use]
    pub fn with_sla_monitor(mut self, sla: SlaMonitor) -> Self {
        self.sla = sla;
        self
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run an execution to completion and return its terminal snapshot.
    pub async fn run(&self, ctx: Arc<ExecutionContext>) -> WorkflowExecution {
        let definition = ctx.definition();
        let execution_id = ctx.id();

        if let Err(err) = ctx.update(|e| e.transition(ExecutionStatus::Running)) {
            warn!(%execution_id, %err, "execution cannot start");
            return ctx.snapshot();
        }
        ctx.emit(EventPayload::ExecutionStarted {
            execution_id,
            workflow_id: definition.id.clone(),
        });
        info!(
            %execution_id,
            workflow_id = %definition.id,
            version = %definition.version,
            phases = definition.phases.len(),
            "execution started"
        );

        let terminal = self.drive(&ctx).await;
        self.finish(&ctx, terminal).await;
        ctx.snapshot()
    }

    async fn drive(&self, ctx: &Arc<ExecutionContext>) -> Terminal {
        loop {
            let definition = ctx.definition();
            let order = match self.resolver.phase_order(&definition) {
                Ok(order) => order,
                Err(err) => return Terminal::Failed(err.to_string()),
            };
            if let Some(terminal) = self.run_phases(ctx, &definition, &order).await {
                return terminal;
            }
        }
    }

    /// Run every phase not yet completed or skipped, earliest in `order`
    /// first. `None` means the definition changed and the order is stale.
    async fn run_phases(
        &self,
        ctx: &Arc<ExecutionContext>,
        definition: &Arc<WorkflowDefinition>,
        order: &[String],
    ) -> Option<Terminal> {
        let mut pause_reason = "requested by operator".to_string();

        loop {
            if ctx.is_cancelled() {
                return Some(Terminal::Cancelled);
            }
            if ctx.is_pause_requested() && !self.pause(ctx, &pause_reason).await {
                return Some(Terminal::Cancelled);
            }
            pause_reason = "requested by operator".to_string();

            let next = ctx.read(|e| {
                order
                    .iter()
                    .find(|id| {
                        !matches!(
                            e.phase_state(id).map(|s| s.status),
                            Some(PhaseStatus::Completed | PhaseStatus::Skipped)
                        )
                    })
                    .cloned()
            });
            let Some(phase_id) = next else {
                return Some(Terminal::Completed);
            };
            let Some(phase) = definition.phase(&phase_id) else {
                return Some(Terminal::Failed(format!(
                    "phase {phase_id} is not declared in workflow {}",
                    definition.id
                )));
            };

            // Dependencies precede the phase in resolver order, so a phase
            // still waiting here can no longer be satisfied either.
            match ctx.read(|e| self.resolver.phase_readiness(definition, phase, e)) {
                Readiness::Ready => {}
                Readiness::Blocked(reason) => {
                    self.skip_phase(ctx, phase, SkipReason::UnmetDependency, &reason);
                    continue;
                }
                Readiness::Waiting => {
                    self.skip_phase(ctx, phase, SkipReason::UnmetDependency, "dependencies incomplete");
                    continue;
                }
            }

            ctx.update_and_emit(|e| {
                e.mark_phase_started(&phase.id);
                vec![EventPayload::PhaseStarted {
                    execution_id: e.id,
                    phase_id: phase.id.clone(),
                    attempt: e.phase_state(&phase.id).map_or(1, |s| s.attempts),
                }]
            });
            debug!(execution_id = %ctx.id(), phase_id = %phase.id, mode = ?phase.mode, "phase started");

            let step = match self.run_with_timeout(ctx, phase).await {
                PhaseOutcome::Completed => {
                    match self.on_phase_completed(ctx, definition, phase).await {
                        Ok(Some(gate)) => {
                            pause_reason = format!("checkpoint {gate} awaits approval");
                            ctx.request_pause();
                            Step::Continue
                        }
                        Ok(None) => Step::Continue,
                        Err(error) => Step::Stop(Terminal::Failed(error)),
                    }
                }
                PhaseOutcome::Skipped(reason) => {
                    self.skip_phase(ctx, phase, reason, "phase condition not met");
                    Step::Continue
                }
                PhaseOutcome::Cancelled => Step::Stop(Terminal::Cancelled),
                PhaseOutcome::Failed(error) => self.on_phase_failed(ctx, definition, phase, error).await,
            };

            match step {
                Step::Continue => {}
                Step::Restart => return None,
                Step::Stop(terminal) => return Some(terminal),
            }
        }
    }

    async fn run_with_timeout(&self, ctx: &Arc<ExecutionContext>, phase: &Phase) -> PhaseOutcome {
        let limit = self.phase_timeout(ctx, phase);
        match tokio::time::timeout(limit, self.phases.run_phase(ctx, phase)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let timeout_ms = limit.as_millis() as u64;
                warn!(execution_id = %ctx.id(), phase_id = %phase.id, timeout_ms, "phase timed out");
                self.expire_phase(ctx, phase);
                PhaseOutcome::Failed(
                    OrchestrationError::PhaseTimeout {
                        phase_id: phase.id.clone(),
                        timeout_ms,
                    }
                    .to_string(),
                )
            }
        }
    }

    /// Declared (or default) phase timeout, capped by the execution deadline.
    fn phase_timeout(&self, ctx: &ExecutionContext, phase: &Phase) -> Duration {
        let declared = phase
            .timeout_ms
            .map_or(self.config.default_phase_timeout, Duration::from_millis);
        let deadline = ctx.read(|e| e.options.deadline);
        match deadline {
            Some(deadline) => {
                let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                declared.min(remaining)
            }
            None => declared,
        }
    }

    /// Fail the tasks a timed-out phase left running or waiting.
    fn expire_phase(&self, ctx: &ExecutionContext, phase: &Phase) {
        let execution_id = ctx.id();
        ctx.update_and_emit(|e| {
            let mut events = Vec::new();
            let mut released = 0;
            for task in &phase.tasks {
                let state = e.task_state_mut(&task.id);
                if !matches!(state.status, TaskStatus::Running | TaskStatus::Waiting) {
                    continue;
                }
                if state.status == TaskStatus::Running {
                    released += 1;
                }
                state.status = TaskStatus::Failed;
                state.last_error = Some("phase timed out".to_string());
                state.completed_at = Some(Utc::now());
                events.push(EventPayload::TaskFailed {
                    execution_id,
                    task_id: task.id.clone(),
                    agent_id: state.agent_id.clone(),
                    error: "phase timed out".to_string(),
                    attempt: state.attempts,
                });
            }
            e.resources.in_flight = e.resources.in_flight.saturating_sub(released);
            events
        });
    }

    fn skip_phase(&self, ctx: &ExecutionContext, phase: &Phase, reason: SkipReason, detail: &str) {
        info!(execution_id = %ctx.id(), phase_id = %phase.id, %reason, detail, "phase skipped");
        let definition = ctx.definition();
        ctx.update_and_emit(|e| {
            e.mark_phase_skipped(phase, reason);
            e.recompute_progress(&definition);
            vec![EventPayload::PhaseSkipped {
                execution_id: e.id,
                phase_id: phase.id.clone(),
                reason,
            }]
        });
    }

    /// Park at a phase boundary until the pause is withdrawn. False if the
    /// execution was cancelled instead.
    async fn pause(&self, ctx: &ExecutionContext, reason: &str) -> bool {
        let execution_id = ctx.id();
        if let Err(err) = ctx.update(|e| e.transition(ExecutionStatus::Paused)) {
            warn!(%execution_id, %err, "cannot pause");
            ctx.clear_pause();
            return true;
        }
        ctx.emit(EventPayload::ExecutionPaused {
            execution_id,
            reason: reason.to_string(),
        });
        info!(%execution_id, reason, "execution paused");
        self.save(ctx).await;

        if !ctx.wait_while_paused().await {
            return false;
        }
        self.return_to_running(ctx);
        ctx.emit(EventPayload::ExecutionResumed { execution_id });
        info!(%execution_id, "execution resumed");
        true
    }

    fn return_to_running(&self, ctx: &ExecutionContext) {
        if let Err(err) = ctx.update(|e| e.transition(ExecutionStatus::Running)) {
            warn!(execution_id = %ctx.id(), %err, "cannot return to running");
        }
    }

    /// Bookkeeping after a phase succeeds. Returns the id of a manual
    /// checkpoint gate to pause on, or an error when a strict constraint
    /// was violated.
    async fn on_phase_completed(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        phase: &Phase,
    ) -> Result<Option<String>, String> {
        let now = Utc::now();
        ctx.update_and_emit(|e| {
            e.mark_phase_completed(&phase.id);
            e.recompute_progress(definition);
            e.performance.bottlenecks = self.sla.bottlenecks(definition, e);
            let minutes = e.elapsed(now).as_secs_f64() / 60.0;
            if minutes > 0.0 {
                e.performance.throughput_per_minute =
                    e.performance.tasks_succeeded as f64 / minutes;
            }
            let duration_ms = e
                .phase_state(&phase.id)
                .and_then(|s| Some((s.completed_at? - s.started_at?).num_milliseconds()))
                .map_or(0, |ms| ms.max(0) as u64);
            vec![EventPayload::PhaseCompleted {
                execution_id: e.id,
                phase_id: phase.id.clone(),
                duration_ms,
            }]
        });
        info!(execution_id = %ctx.id(), phase_id = %phase.id, "phase completed");

        let gate = self.record_checkpoints(ctx, phase).await;
        match self.check_sla(ctx, definition, false).await {
            Some(error) => Err(error),
            None => Ok(gate),
        }
    }

    async fn record_checkpoints(&self, ctx: &ExecutionContext, phase: &Phase) -> Option<String> {
        let iteration = ctx.read(|e| e.phase_state(&phase.id).map_or(0, |s| s.iteration));
        let mut gate = None;
        let mut recorded = false;

        for spec in &phase.checkpoints {
            if !spec.condition.trim().is_empty() {
                match self.phases.evaluate_condition(ctx, &spec.condition, iteration) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) => {
                        warn!(execution_id = %ctx.id(), checkpoint_id = %spec.id, %err, "checkpoint condition failed, skipping checkpoint");
                        continue;
                    }
                }
            }

            ctx.update_and_emit(|e| {
                e.record_checkpoint(spec, &phase.id);
                vec![EventPayload::CheckpointRecorded {
                    execution_id: e.id,
                    checkpoint_id: spec.id.clone(),
                    phase_id: phase.id.clone(),
                }]
            });
            debug!(execution_id = %ctx.id(), checkpoint_id = %spec.id, "checkpoint recorded");
            recorded = true;
            if spec.gate == CheckpointGate::Manual && gate.is_none() {
                gate = Some(spec.id.clone());
            }
        }

        if recorded {
            self.save(ctx).await;
        }
        gate
    }

    /// Evaluate SLA thresholds and workflow constraints. Returns an error
    /// message when a strict constraint is violated.
    async fn check_sla(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        completed: bool,
    ) -> Option<String> {
        let execution_id = ctx.id();
        let now = Utc::now();
        let (violations, breaches) = ctx.update(|e| {
            let report = self.sla.evaluate(definition, e, now);
            let violations = self.sla.record(definition, e, &report, completed);
            let breaches: Vec<_> = self
                .sla
                .check_constraints(definition, e, now)
                .into_iter()
                .filter(|breach| {
                    !e.events.iter().any(|entry| {
                        matches!(&entry.payload, EventPayload::ConstraintViolated { constraint, .. }
                            if *constraint == breach.constraint)
                    })
                })
                .collect();
            (violations, breaches)
        });

        for violation in violations {
            warn!(%execution_id, %violation, "SLA violated");
            ctx.emit(EventPayload::SlaViolated {
                execution_id,
                violation: violation.to_string(),
            });
            self.notify(
                ctx,
                definition,
                NotificationKind::SlaViolation,
                format!("SLA violated on {}", definition.id),
                violation.to_string(),
            )
            .await;
        }

        let mut fatal = None;
        for breach in breaches {
            let detail = breach.detail();
            ctx.emit(EventPayload::ConstraintViolated {
                execution_id,
                constraint: breach.constraint,
                enforcement: breach.enforcement,
                detail: detail.clone(),
            });
            match breach.enforcement {
                Enforcement::Strict => {
                    warn!(%execution_id, %detail, "strict constraint violated");
                    fatal.get_or_insert(detail);
                }
                Enforcement::Flexible => {
                    warn!(%execution_id, %detail, "constraint violated");
                    self.notify(
                        ctx,
                        definition,
                        NotificationKind::ConstraintWarning,
                        format!("Constraint warning on {}", definition.id),
                        detail,
                    )
                    .await;
                }
                Enforcement::Advisory => {
                    info!(%execution_id, %detail, "advisory constraint exceeded");
                }
            }
        }
        fatal
    }

    async fn on_phase_failed(
        &self,
        ctx: &ExecutionContext,
        definition: &Arc<WorkflowDefinition>,
        phase: &Phase,
        error: String,
    ) -> Step {
        let execution_id = ctx.id();
        warn!(%execution_id, phase_id = %phase.id, %error, "phase failed");
        ctx.update_and_emit(|e| {
            e.mark_phase_failed(&phase.id);
            vec![EventPayload::PhaseFailed {
                execution_id,
                phase_id: phase.id.clone(),
                error: error.clone(),
            }]
        });

        if let Err(err) = ctx.update(|e| e.transition(ExecutionStatus::Recovering)) {
            warn!(%execution_id, %err, "cannot enter recovery");
            return Step::Stop(Terminal::Failed(error));
        }
        let failure = FailureContext::phase(&phase.id, &error);
        let outcome = ctx.update(|e| self.recovery.handle_failure(e, definition, &failure));

        // Rollback only precedes a rerun; a terminal failure keeps the failed
        // task state for the record.
        match outcome {
            RecoveryOutcome::Retry { attempt, delay } => {
                self.roll_back(ctx, definition, phase);
                ctx.update_and_emit(|e| {
                    for task in &phase.tasks {
                        if !e.task_state(&task.id).is_some_and(|s| s.status.satisfies_dependents()) {
                            e.tasks.insert(task.id.clone(), TaskState::default());
                        }
                    }
                    vec![EventPayload::RecoveryApplied {
                        execution_id,
                        action: RecoveryActionKind::Retry,
                        detail: format!(
                            "phase {} retry {attempt} in {}ms",
                            phase.id,
                            delay.as_millis()
                        ),
                    }]
                });
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = ctx.cancelled() => return Step::Stop(Terminal::Cancelled),
                }
                self.return_to_running(ctx);
                Step::Continue
            }
            RecoveryOutcome::Fallback { workflow_id } => {
                self.fall_back(ctx, definition, &workflow_id)
            }
            RecoveryOutcome::Escalate {
                level,
                awaiting_human,
            } => {
                ctx.emit(EventPayload::Escalated {
                    execution_id,
                    level,
                    awaiting_human,
                });
                self.notify(
                    ctx,
                    definition,
                    NotificationKind::Escalation,
                    format!("Execution {execution_id} escalated to {level}"),
                    error.clone(),
                )
                .await;

                if !awaiting_human {
                    return Step::Stop(Terminal::Failed(format!(
                        "escalated to {level}: {error}"
                    )));
                }

                info!(%execution_id, %level, "awaiting human intervention");
                self.save(ctx).await;
                if !ctx.wait_for_resume().await {
                    return Step::Stop(Terminal::Cancelled);
                }
                self.roll_back(ctx, definition, phase);
                ctx.update(|e| {
                    e.reset_phase(phase);
                    e.phase_state_mut(&phase.id).attempts = 0;
                });
                self.return_to_running(ctx);
                ctx.emit(EventPayload::ExecutionResumed { execution_id });
                info!(%execution_id, phase_id = %phase.id, "resumed after escalation");
                Step::Continue
            }
            RecoveryOutcome::Abort { reason } => {
                Step::Stop(Terminal::Failed(format!("{error} ({reason})")))
            }
            RecoveryOutcome::Propagate => Step::Stop(Terminal::Failed(error)),
        }
    }

    fn roll_back(&self, ctx: &ExecutionContext, definition: &WorkflowDefinition, phase: &Phase) {
        if !phase.rollback.automated || phase.rollback.strategy == RollbackStrategy::None {
            return;
        }
        let execution_id = ctx.id();
        ctx.update_and_emit(|e| {
            let mut strategy = phase.rollback.strategy;
            let mut checkpoint_id = None;

            if strategy == RollbackStrategy::LastCheckpoint {
                match e.latest_checkpoint().map(|c| c.id.clone()) {
                    Some(id) => match e.restore_checkpoint(&id, definition) {
                        Ok(()) => checkpoint_id = Some(id),
                        Err(err) => {
                            warn!(%execution_id, %err, "checkpoint restore failed, discarding phase");
                            strategy = RollbackStrategy::DiscardPhase;
                        }
                    },
                    None => strategy = RollbackStrategy::DiscardPhase,
                }
            }
            if strategy == RollbackStrategy::DiscardPhase {
                e.reset_phase(phase);
            }
            e.recompute_progress(definition);

            debug!(%execution_id, phase_id = %phase.id, %strategy, "phase rolled back");
            vec![EventPayload::PhaseRolledBack {
                execution_id,
                phase_id: phase.id.clone(),
                strategy,
                checkpoint_id,
            }]
        });
    }

    fn fall_back(
        &self,
        ctx: &ExecutionContext,
        current: &WorkflowDefinition,
        workflow_id: &str,
    ) -> Step {
        let execution_id = ctx.id();
        let fallback = match self.catalog.get(workflow_id) {
            Ok(fallback) => fallback,
            Err(err) => return Step::Stop(Terminal::Failed(err.to_string())),
        };

        ctx.update_and_emit(|e| {
            let carried = RecoveryManager::carry_forward(current, &fallback, e);
            e.adopt_workflow(&fallback, &carried);
            info!(
                %execution_id,
                workflow_id,
                carried = carried.len(),
                "switched to fallback workflow"
            );
            vec![EventPayload::RecoveryApplied {
                execution_id,
                action: RecoveryActionKind::Fallback,
                detail: format!(
                    "switched to {workflow_id}, carried phases [{}]",
                    carried.join(", ")
                ),
            }]
        });
        ctx.set_definition(fallback);
        self.return_to_running(ctx);
        Step::Restart
    }

    async fn finish(&self, ctx: &ExecutionContext, terminal: Terminal) {
        let execution_id = ctx.id();
        let definition = ctx.definition();

        let terminal = match terminal {
            Terminal::Completed => {
                ctx.update(|e| e.recompute_progress(&definition));
                match self.check_sla(ctx, &definition, true).await {
                    Some(error) => Terminal::Failed(error),
                    None => Terminal::Completed,
                }
            }
            other => other,
        };

        match terminal {
            Terminal::Completed => {
                let duration_ms = ctx.update(|e| {
                    if let Err(err) = e.transition(ExecutionStatus::Completed) {
                        warn!(%execution_id, %err, "cannot complete execution");
                    }
                    e.elapsed(Utc::now()).as_millis() as u64
                });
                ctx.emit(EventPayload::ExecutionCompleted {
                    execution_id,
                    duration_ms,
                });
                info!(%execution_id, duration_ms, "execution completed");
                self.notify(
                    ctx,
                    &definition,
                    NotificationKind::Completion,
                    format!("Execution {execution_id} completed"),
                    format!("workflow {} finished in {duration_ms}ms", definition.id),
                )
                .await;
            }
            Terminal::Failed(error) => {
                ctx.update(|e| {
                    e.error = Some(error.clone());
                    if let Err(err) = e.transition(ExecutionStatus::Failed) {
                        warn!(%execution_id, %err, "cannot fail execution");
                    }
                });
                ctx.emit(EventPayload::ExecutionFailed {
                    execution_id,
                    error: error.clone(),
                });
                warn!(%execution_id, %error, "execution failed");
                self.notify(
                    ctx,
                    &definition,
                    NotificationKind::Failure,
                    format!("Execution {execution_id} failed"),
                    error,
                )
                .await;
            }
            Terminal::Cancelled => {
                ctx.update(|e| {
                    for state in e.tasks.values_mut() {
                        if matches!(state.status, TaskStatus::Pending | TaskStatus::Waiting) {
                            state.status = TaskStatus::Cancelled;
                        }
                    }
                    if let Err(err) = e.transition(ExecutionStatus::Cancelled) {
                        warn!(%execution_id, %err, "cannot cancel execution");
                    }
                });
                ctx.emit(EventPayload::ExecutionCancelled { execution_id });
                info!(%execution_id, "execution cancelled");
            }
        }

        self.save(ctx).await;
    }

    /// Send a notification to every declared channel the policy enables.
    async fn notify(
        &self,
        ctx: &ExecutionContext,
        definition: &WorkflowDefinition,
        kind: NotificationKind,
        subject: String,
        body: String,
    ) {
        let policy = &definition.notifications;
        let enabled = match kind {
            NotificationKind::Completion => policy.on_completion,
            NotificationKind::Failure => policy.on_failure,
            NotificationKind::Escalation => policy.on_escalation,
            NotificationKind::SlaViolation | NotificationKind::ConstraintWarning => {
                policy.on_sla_violation
            }
        };
        if !enabled {
            return;
        }

        for channel in &policy.channels {
            let notification = Notification {
                execution_id: ctx.id(),
                workflow_id: definition.id.clone(),
                kind,
                channel: channel.clone(),
                subject: subject.clone(),
                body: body.clone(),
            };
            match self.notifier.notify(notification).await {
                Ok(()) => ctx.emit(EventPayload::NotificationSent {
                    execution_id: ctx.id(),
                    channel: channel.to_string(),
                    subject: subject.clone(),
                }),
                Err(err) => {
                    warn!(execution_id = %ctx.id(), %channel, %err, "notification delivery failed");
                }
            }
        }
    }

    async fn save(&self, ctx: &ExecutionContext) {
        let snapshot = ctx.snapshot();
        if let Err(err) = self.store.save(snapshot.id, &snapshot).await {
            warn!(execution_id = %snapshot.id, %err, "failed to persist execution snapshot");
        }
    }
}
