//! Orchestrator facade: the inbound API over catalog, registry, dispatcher
//! and engine.
//!
//! Constructed explicitly with [`OrchestratorBuilder`]; every port has an
//! in-process default so a bare `Config` is enough to run workflows.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{
    InMemoryExecutionStore, JsonFileExecutionStore, OutputConditionEvaluator, SimulatedExecutor,
    TracingNotifier,
};
use crate::domain::errors::{DomainResult, OrchestrationError};
use crate::domain::models::{
    Agent, Config, EventPayload, ExecutionCounts, ExecutionOptions, ExecutionStatus, StoreKind,
    SystemStatus, TaskCounts, TaskStatus, WorkflowDefinition, WorkflowExecution,
};
use crate::domain::ports::{
    CapabilityExecutor, ConditionEvaluator, ExecutionStore, NotificationSink,
};
use crate::services::agent_registry::AgentRegistry;
use crate::services::event_bus::{EventBus, EventBusConfig, OrchestrationEvent};
use crate::services::execution_context::ExecutionContext;
use crate::services::execution_engine::{EngineConfig, ExecutionEngine};
use crate::services::phase_executor::PhaseExecutor;
use crate::services::recovery_manager::RecoveryManager;
use crate::services::task_dispatcher::{DispatcherConfig, TaskDispatcher};
use crate::services::workflow_catalog::WorkflowCatalog;

/// Builder for [`Orchestrator`]. Unset ports fall back to the simulated
/// executor, the store named in the config, the tracing notifier and the
/// built-in condition evaluator.
pub struct OrchestratorBuilder {
    config: Config,
    executor: Option<Arc<dyn CapabilityExecutor>>,
    store: Option<Arc<dyn ExecutionStore>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    conditions: Option<Arc<dyn ConditionEvaluator>>,
}

impl OrchestratorBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            executor: None,
            store: None,
            notifier: None,
            conditions: None,
        }
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn CapabilityExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    #[must_use]
    pub fn with_condition_evaluator(mut self, conditions: Arc<dyn ConditionEvaluator>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    /// Wire the services, register the configured agent fleet and load the
    /// configured workflow directory.
    pub fn build(self) -> DomainResult<Orchestrator> {
        let config = self.config;

        let catalog = Arc::new(WorkflowCatalog::new());
        if let Some(dir) = &config.workflow_dir {
            let loaded = catalog.load_dir(Path::new(dir))?;
            info!(dir = %dir, loaded, "workflow directory loaded");
        }

        let registry = Arc::new(AgentRegistry::new());
        for agent in &config.agents {
            registry.register(agent.clone())?;
        }

        let bus = Arc::new(EventBus::new(EventBusConfig {
            channel_capacity: config.event_channel_capacity,
        }));
        let dispatcher = Arc::new(TaskDispatcher::new(
            Arc::clone(&registry),
            DispatcherConfig {
                max_concurrent_tasks: config.max_concurrent_tasks,
                acquire_timeout: Duration::from_millis(config.agent_acquire_timeout_ms),
            },
        ));
        let recovery = Arc::new(RecoveryManager::new(Arc::clone(&catalog)));

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SimulatedExecutor::default()));
        let conditions = self
            .conditions
            .unwrap_or_else(|| Arc::new(OutputConditionEvaluator));
        let store = self.store.unwrap_or_else(|| match config.store.kind {
            StoreKind::Memory => Arc::new(InMemoryExecutionStore::new()) as Arc<dyn ExecutionStore>,
            StoreKind::File => {
                Arc::new(JsonFileExecutionStore::new(&config.store.path)) as Arc<dyn ExecutionStore>
            }
        });
        let notifier = self
            .notifier
            .unwrap_or_else(|| Arc::new(TracingNotifier));

        let phases = PhaseExecutor::new(
            Arc::clone(&dispatcher),
            Arc::clone(&recovery),
            executor,
            conditions,
        );
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&catalog),
            phases,
            recovery,
            Arc::clone(&store),
            notifier,
            EngineConfig {
                default_phase_timeout: Duration::from_millis(config.default_phase_timeout_ms),
            },
        ));

        let executions = Arc::new(DashMap::new());
        let (shutdown, _) = watch::channel(false);

        Ok(Orchestrator {
            status: StatusSource {
                registry: Arc::clone(&registry),
                executions: Arc::clone(&executions),
                started: Instant::now(),
            },
            config,
            catalog,
            registry,
            dispatcher,
            bus,
            engine,
            store,
            executions,
            monitor: Mutex::new(None),
            shutdown,
        })
    }
}

/// A live execution and the flag its driver raises when it returns.
struct ExecutionHandle {
    ctx: Arc<ExecutionContext>,
    finished: watch::Receiver<bool>,
}

/// Computes [`SystemStatus`]; shared with the monitoring task.
#[derive(Clone)]
struct StatusSource {
    registry: Arc<AgentRegistry>,
    executions: Arc<DashMap<Uuid, ExecutionHandle>>,
    started: Instant,
}

impl StatusSource {
    fn status(&self) -> SystemStatus {
        let mut tasks = TaskCounts {
            in_flight: self.registry.in_flight(),
            ..TaskCounts::default()
        };
        let mut executions = ExecutionCounts::default();
        let mut clients = HashSet::new();
        let mut quality_sum = 0.0;
        let mut quality_weight = 0u64;

        for entry in self.executions.iter() {
            entry.ctx.read(|e| {
                executions.total += 1;
                match e.status {
                    ExecutionStatus::Pending => executions.pending += 1,
                    ExecutionStatus::Running => executions.running += 1,
                    ExecutionStatus::Paused => executions.paused += 1,
                    ExecutionStatus::Recovering => executions.recovering += 1,
                    ExecutionStatus::Completed => executions.completed += 1,
                    ExecutionStatus::Failed => executions.failed += 1,
                    ExecutionStatus::Cancelled => executions.cancelled += 1,
                }
                if let Some(client) = &e.options.client {
                    clients.insert(client.clone());
                }
                for state in e.tasks.values() {
                    match state.status {
                        TaskStatus::Completed => tasks.completed += 1,
                        TaskStatus::Compensated => tasks.compensated += 1,
                        TaskStatus::Failed => tasks.failed += 1,
                        _ => {}
                    }
                }
                let scored = e.performance.tasks_succeeded;
                if scored > 0 {
                    quality_sum += e.performance.average_quality * scored as f64;
                    quality_weight += scored;
                }
            });
        }

        let uptime = self.started.elapsed();
        let succeeded = tasks.completed + tasks.compensated;
        let finished = succeeded + tasks.failed;
        let minutes = uptime.as_secs_f64() / 60.0;

        SystemStatus {
            timestamp: Utc::now(),
            uptime_secs: uptime.as_secs(),
            agents: self.registry.counts(),
            tasks,
            executions,
            projects: clients.len(),
            throughput_per_minute: if minutes > 0.0 {
                finished as f64 / minutes
            } else {
                0.0
            },
            efficiency: if finished > 0 {
                succeeded as f64 / finished as f64
            } else {
                1.0
            },
            average_quality: if quality_weight > 0 {
                quality_sum / quality_weight as f64
            } else {
                0.0
            },
        }
    }
}

/// Multi-agent workflow orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<WorkflowCatalog>,
    registry: Arc<AgentRegistry>,
    dispatcher: Arc<TaskDispatcher>,
    bus: Arc<EventBus>,
    engine: Arc<ExecutionEngine>,
    store: Arc<dyn ExecutionStore>,
    executions: Arc<DashMap<Uuid, ExecutionHandle>>,
    status: StatusSource,
    monitor: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executions", &self.executions.len())
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<WorkflowCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<TaskDispatcher> {
        &self.dispatcher
    }

    /// Validate and register a workflow definition.
    pub fn register_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> DomainResult<Arc<WorkflowDefinition>> {
        let registered = self.catalog.register(definition)?;
        info!(workflow_id = %registered.id, version = %registered.version, "workflow registered");
        Ok(registered)
    }

    pub fn register_agent(&self, agent: Agent) -> DomainResult<()> {
        let agent_id = agent.id.clone();
        self.registry.register(agent)?;
        info!(%agent_id, "agent registered");
        Ok(())
    }

    /// Start an execution of the latest version of `workflow_id`. Returns as
    /// soon as the execution is created; phases run on a spawned Tokio task,
    /// so this must be called from within a runtime.
    pub fn execute_workflow(
        &self,
        workflow_id: &str,
        inputs: HashMap<String, Value>,
        options: ExecutionOptions,
    ) -> DomainResult<Uuid> {
        let definition = self.catalog.get(workflow_id)?;
        let execution = WorkflowExecution::new(&definition, inputs, options);
        let execution_id = execution.id;
        let ctx = ExecutionContext::new(execution, definition, Arc::clone(&self.bus));

        let (done, finished) = watch::channel(false);
        self.executions.insert(
            execution_id,
            ExecutionHandle {
                ctx: Arc::clone(&ctx),
                finished,
            },
        );

        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            engine.run(ctx).await;
            done.send_replace(true);
        });

        info!(%execution_id, workflow_id, "execution submitted");
        Ok(execution_id)
    }

    fn context(&self, execution_id: Uuid) -> DomainResult<Arc<ExecutionContext>> {
        self.executions
            .get(&execution_id)
            .map(|handle| Arc::clone(&handle.ctx))
            .ok_or(OrchestrationError::ExecutionNotFound(execution_id))
    }

    /// Request cooperative cancellation. Dispatched tasks finish; nothing
    /// new is dispatched.
    pub fn cancel_execution(&self, execution_id: Uuid) -> DomainResult<()> {
        let ctx = self.context(execution_id)?;
        let status = ctx.read(|e| e.status);
        if status.is_terminal() {
            return Err(invalid_transition(status, ExecutionStatus::Cancelled));
        }
        ctx.cancel();
        info!(%execution_id, %status, "cancellation requested");
        Ok(())
    }

    /// Pause at the next phase boundary.
    pub fn pause_execution(&self, execution_id: Uuid) -> DomainResult<()> {
        let ctx = self.context(execution_id)?;
        let status = ctx.read(|e| e.status);
        if !matches!(status, ExecutionStatus::Pending | ExecutionStatus::Running) {
            return Err(invalid_transition(status, ExecutionStatus::Paused));
        }
        ctx.request_pause();
        info!(%execution_id, "pause requested");
        Ok(())
    }

    /// Resume a paused execution, or one parked on a human escalation.
    /// Rejected while a recovering execution is still retrying on its own.
    pub fn resume_execution(&self, execution_id: Uuid) -> DomainResult<()> {
        let ctx = self.context(execution_id)?;
        let status = ctx.read(|e| e.status);

        if status == ExecutionStatus::Paused || ctx.is_pause_requested() {
            ctx.clear_pause();
        } else if !(status == ExecutionStatus::Recovering && ctx.resume()) {
            return Err(invalid_transition(status, ExecutionStatus::Running));
        }
        info!(%execution_id, %status, "resume requested");
        Ok(())
    }

    /// Whether the execution is parked on a human escalation and will accept
    /// [`Orchestrator::resume_execution`].
    pub fn is_awaiting_resume(&self, execution_id: Uuid) -> DomainResult<bool> {
        Ok(self.context(execution_id)?.is_awaiting_resume())
    }

    /// Snapshot of an execution; falls back to the store for executions not
    /// held in memory.
    pub async fn get_execution_status(&self, execution_id: Uuid) -> DomainResult<WorkflowExecution> {
        if let Ok(ctx) = self.context(execution_id) {
            return Ok(ctx.snapshot());
        }
        self.store
            .load(execution_id)
            .await?
            .ok_or(OrchestrationError::ExecutionNotFound(execution_id))
    }

    /// Wait until the execution's driver has finished and return the final
    /// snapshot.
    pub async fn wait_for_completion(&self, execution_id: Uuid) -> DomainResult<WorkflowExecution> {
        let (ctx, mut finished) = match self.executions.get(&execution_id) {
            Some(handle) => (Arc::clone(&handle.ctx), handle.finished.clone()),
            None => return self.get_execution_status(execution_id).await,
        };
        // An error means the driver is gone, which is also final.
        let _ = finished.wait_for(|done| *done).await;
        Ok(ctx.snapshot())
    }

    /// Ids of every execution held in memory.
    pub fn execution_ids(&self) -> Vec<Uuid> {
        self.executions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn get_system_status(&self) -> SystemStatus {
        self.status.status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.bus.subscribe()
    }

    /// Publish an orchestration-cycle event every `cycle_interval_ms` until
    /// [`Orchestrator::shutdown`]. Calling it twice is a no-op.
    pub fn start_monitoring(&self) {
        let mut monitor = self.monitor.lock().unwrap_or_else(PoisonError::into_inner);
        if monitor.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let source = self.status.clone();
        let bus = Arc::clone(&self.bus);
        let period = Duration::from_millis(self.config.cycle_interval_ms.max(1));
        let mut stop = self.shutdown.subscribe();

        *monitor = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let metrics = source.status();
                        debug!(
                            running = metrics.executions.running,
                            in_flight = metrics.tasks.in_flight,
                            "orchestration cycle"
                        );
                        bus.publish(EventPayload::OrchestrationCycle {
                            timestamp: metrics.timestamp,
                            metrics: Box::new(metrics),
                        });
                    }
                    () = async { let _ = stop.wait_for(|stopped| *stopped).await; } => break,
                }
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "monitoring started");
    }

    /// Stop monitoring and cancel every execution still running, then wait
    /// for their drivers to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let monitor = self
            .monitor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = monitor {
            if let Err(err) = handle.await {
                warn!(%err, "monitoring task ended abnormally");
            }
        }

        let live: Vec<(Arc<ExecutionContext>, watch::Receiver<bool>)> = self
            .executions
            .iter()
            .map(|entry| (Arc::clone(&entry.ctx), entry.finished.clone()))
            .collect();
        for (ctx, mut finished) in live {
            if !ctx.read(WorkflowExecution::is_terminal) {
                ctx.cancel();
            }
            let _ = finished.wait_for(|done| *done).await;
        }
        info!("orchestrator shut down");
    }
}

fn invalid_transition(from: ExecutionStatus, to: ExecutionStatus) -> OrchestrationError {
    OrchestrationError::InvalidStateTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}
