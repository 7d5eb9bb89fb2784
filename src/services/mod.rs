//! Orchestration services.

pub mod agent_registry;
pub mod dependency_resolver;
pub mod event_bus;
pub mod execution_context;
pub mod execution_engine;
pub mod orchestrator;
pub mod phase_executor;
pub mod recovery_manager;
pub mod sla_monitor;
pub mod task_dispatcher;
pub mod workflow_catalog;

pub use agent_registry::{AgentRegistry, AgentSlaBreach, CapabilityCoverage, ReleaseOutcome};
pub use dependency_resolver::{DependencyResolver, Readiness};
pub use event_bus::{
    EventBus, EventBusConfig, EventCategory, EventId, EventSeverity, OrchestrationEvent,
    SequenceNumber,
};
pub use execution_context::ExecutionContext;
pub use execution_engine::{EngineConfig, ExecutionEngine};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use phase_executor::{PhaseExecutor, PhaseOutcome};
pub use recovery_manager::{FailureContext, FailureScope, RecoveryManager, RecoveryOutcome};
pub use sla_monitor::{ConstraintBreach, SlaMonitor, SlaMonitorConfig, SlaReport, SlaViolation};
pub use task_dispatcher::{AgentLease, DispatcherConfig, TaskDispatcher};
pub use workflow_catalog::{WorkflowCatalog, WorkflowSummary};
