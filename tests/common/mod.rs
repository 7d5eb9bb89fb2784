//! Common test utilities for integration tests
//!
//! Shared fixtures for building orchestrators, agent fleets and small
//! workflow definitions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use conductor::adapters::{SimulatedConfig, SimulatedExecutor, SimulatedResponse};
use conductor::domain::models::{
    Agent, Config, ExecutionMode, ExecutionStatus, Phase, PhaseDependency, Task,
    WorkflowExecution,
};
use conductor::services::{Orchestrator, OrchestratorBuilder};
use uuid::Uuid;

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config with one agent per capability, each allowing `slots` concurrent
/// tasks.
pub fn fleet_config(capabilities: &[&str], slots: usize) -> Config {
    Config {
        agents: capabilities
            .iter()
            .map(|c| Agent::new(format!("{c}-agent"), [*c]).with_max_concurrent_tasks(slots))
            .collect(),
        agent_acquire_timeout_ms: 2_000,
        ..Config::default()
    }
}

/// Simulated executor whose tasks take `duration_ms` unless scripted
/// otherwise.
pub fn simulated(duration_ms: u64) -> Arc<SimulatedExecutor> {
    Arc::new(
        SimulatedExecutor::new(SimulatedConfig {
            progress_steps: 2,
            ..SimulatedConfig::default()
        })
        .with_default_response(SimulatedResponse::success().with_duration_ms(duration_ms)),
    )
}

pub fn builder(config: Config, executor: &Arc<SimulatedExecutor>) -> OrchestratorBuilder {
    Orchestrator::builder(config).with_executor(Arc::clone(executor) as _)
}

pub fn orchestrator(config: Config, executor: &Arc<SimulatedExecutor>) -> Orchestrator {
    builder(config, executor)
        .build()
        .expect("orchestrator should build")
}

/// Single-task sequential phase.
pub fn phase(id: &str, task_id: &str, capability: &str) -> Phase {
    Phase::new(id, ExecutionMode::Sequential).with_task(Task::new(task_id, capability))
}

pub fn phase_after(id: &str, task_id: &str, capability: &str, after: &str) -> Phase {
    phase(id, task_id, capability).depends_on(PhaseDependency::on(after))
}

/// Wait for the execution to finish, failing the test after five seconds.
pub async fn finish(orchestrator: &Orchestrator, id: Uuid) -> WorkflowExecution {
    tokio::time::timeout(Duration::from_secs(5), orchestrator.wait_for_completion(id))
        .await
        .expect("execution should finish within five seconds")
        .expect("execution should exist")
}

/// Poll until the execution reaches `status`, failing after five seconds.
pub async fn wait_for_status(
    orchestrator: &Orchestrator,
    id: Uuid,
    status: ExecutionStatus,
) -> WorkflowExecution {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snapshot = orchestrator
            .get_execution_status(id)
            .await
            .expect("execution should exist");
        if snapshot.status == status {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution stuck in {} while waiting for {status}",
            snapshot.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the execution is parked on a human escalation, failing after
/// five seconds.
pub async fn wait_until_parked(orchestrator: &Orchestrator, id: Uuid) -> WorkflowExecution {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !orchestrator
        .is_awaiting_resume(id)
        .expect("execution should exist")
    {
        assert!(
            tokio::time::Instant::now() < deadline,
            "execution never parked on an escalation"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orchestrator
        .get_execution_status(id)
        .await
        .expect("execution should exist")
}

/// Names of the events in an execution's log, in order.
pub fn event_names(execution: &WorkflowExecution) -> Vec<&'static str> {
    execution.events.iter().map(|e| e.payload.name()).collect()
}
