pub mod agent;
pub mod config;
pub mod event;
pub mod execution;
pub mod status;
pub mod task;
pub mod workflow;

pub use agent::{Agent, AgentConstraints, AgentPerformance, AgentResources, AgentSla, AgentStatus};
pub use config::{Config, LoggingConfig, StoreConfig, StoreKind};
pub use event::EventPayload;
pub use execution::{
    AgentAllocation, Bottleneck, ExecutionCheckpoint, ExecutionLogEntry, ExecutionOptions,
    ExecutionPerformance, ExecutionProgress, ExecutionStatus, Milestone, PhaseState, PhaseStatus,
    RecoveryActionKind, RecoveryRecord, ResourceAccounting, SkipReason, WorkflowExecution,
};
pub use status::{AgentCounts, ExecutionCounts, SystemStatus, TaskCounts};
pub use task::{
    CompensationAction, CompensationKind, DependencyTarget, FailureCause, FailureCondition, Task,
    TaskConstraint, TaskConstraintKind, TaskDependency, TaskDependencyKind, TaskIo, TaskMetrics,
    TaskState, TaskStatus, ValidationRule,
};
pub use workflow::{
    BackoffStrategy, CheckpointGate, CheckpointSpec, CompletionCondition, ConstraintKind,
    DependencyKind, DependencyStrength, Enforcement, EscalationLevel, ExecutionMode, InnerMode,
    NotificationChannel, NotificationPolicy, Phase, PhaseDependency, RecoveryPolicy, RetryPolicy,
    RollbackGranularity, RollbackPolicy, RollbackStrategy, SlaAdjustment, SlaMetric,
    WorkflowConstraint, WorkflowDefinition, WorkflowDependency, WorkflowSla,
};
