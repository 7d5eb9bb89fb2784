//! Conductor - multi-agent workflow orchestrator
//!
//! Conductor executes declarative workflow definitions (phases of tasks with
//! dependencies, constraints and recovery policies) across a fleet of
//! capability-bound agents. It tracks progress, records checkpoints, applies
//! retry, rollback, fallback and escalation on failure, and publishes an
//! ordered event stream per execution.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and the ports the core calls out through
//! - **Service Layer** (`services`): resolver, dispatcher, engine and the orchestrator facade
//! - **Adapters** (`adapters`): stores, notifiers, condition evaluation, simulated executor
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use std::collections::HashMap;
//! use conductor::{Agent, Config, ExecutionOptions, Orchestrator, WorkflowDefinition};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let orchestrator = Orchestrator::builder(Config::default()).build()?;
//! orchestrator.register_agent(Agent::new("dev-1", ["development"]))?;
//! orchestrator.register_workflow(WorkflowDefinition::from_yaml(
//!     "id: build\nphases:\n  - id: compile\n    tasks:\n      - id: c1\n        capability: development\n",
//! )?)?;
//!
//! let id = orchestrator.execute_workflow("build", HashMap::new(), ExecutionOptions::default())?;
//! let execution = orchestrator.wait_for_completion(id).await?;
//! println!("{}", execution.status);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainResult, OrchestrationError};
pub use domain::models::{
    Agent, AgentStatus, Config, EventPayload, ExecutionOptions, ExecutionStatus, Phase,
    SystemStatus, Task, TaskStatus, WorkflowDefinition, WorkflowExecution,
};
pub use domain::ports::{CapabilityExecutor, ConditionEvaluator, ExecutionStore, NotificationSink};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{OrchestrationEvent, Orchestrator, OrchestratorBuilder};
