//! `conductor run`: execute a workflow definition with the simulated
//! capability executor.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use comfy_table::Cell;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::workflow::load_validated;
use crate::adapters::{SimulatedConfig, SimulatedExecutor};
use crate::cli::output::{create_spinner, output, status_cell, CommandOutput, TableFormatter};
use crate::domain::models::{
    Agent, Config, EventPayload, ExecutionOptions, ExecutionStatus, TaskState, WorkflowDefinition,
    WorkflowExecution,
};
use crate::services::{CapabilityCoverage, Orchestrator};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Workflow definition (YAML or JSON)
    pub file: PathBuf,

    /// Execution input as key=value; values parse as JSON, else as a string
    #[arg(short, long = "input", value_parser = parse_input)]
    pub inputs: Vec<(String, Value)>,

    /// Execution priority (lower is more urgent)
    #[arg(short, long, default_value = "5")]
    pub priority: u32,

    /// Client the execution is run for
    #[arg(long)]
    pub client: Option<String>,

    /// Free-form tags (repeatable)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Hard deadline for the whole execution, in seconds
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Multiplier applied to each task's estimated duration
    #[arg(long, default_value = "0.001")]
    pub time_scale: f64,

    /// Register a simulated agent for every capability no configured agent covers
    #[arg(long)]
    pub auto_agents: bool,
}

/// Parse `key=value`, reading the value as JSON when possible.
pub fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

pub async fn execute(args: RunArgs, config: Config, json_mode: bool) -> Result<()> {
    if !(args.time_scale.is_finite() && args.time_scale >= 0.0) {
        bail!("--time-scale must be a non-negative number");
    }

    let definition = load_validated(&args.file)?;
    let executor = Arc::new(SimulatedExecutor::new(SimulatedConfig {
        time_scale: args.time_scale,
        ..SimulatedConfig::default()
    }));
    let orchestrator = Orchestrator::builder(config)
        .with_executor(executor)
        .build()
        .context("Failed to start orchestrator")?;

    let capabilities: BTreeSet<String> =
        definition.tasks().map(|t| t.capability.clone()).collect();
    for capability in capabilities {
        if orchestrator.registry().coverage(&capability) == CapabilityCoverage::None {
            if args.auto_agents {
                orchestrator.register_agent(Agent::new(format!("sim-{capability}"), [capability]))?;
            } else {
                warn!(%capability, "no configured agent advertises capability");
            }
        }
    }

    let workflow = orchestrator.register_workflow(definition)?;

    let mut options = ExecutionOptions {
        priority: args.priority,
        client: args.client,
        tags: args.tags,
        deadline: None,
    };
    if let Some(secs) = args.deadline_secs {
        options = options.with_deadline_in(Duration::from_secs(secs));
    }
    let inputs: HashMap<String, Value> = args.inputs.into_iter().collect();

    let mut events = orchestrator.subscribe();
    let execution_id = orchestrator.execute_workflow(&workflow.id, inputs, options)?;
    info!(%execution_id, workflow_id = %workflow.id, "run started");

    let spinner = (!json_mode).then(|| create_spinner(format!("running {}", workflow.id)));
    let wait = orchestrator.wait_for_completion(execution_id);
    tokio::pin!(wait);
    let mut interrupted = false;

    let execution = loop {
        tokio::select! {
            result = &mut wait => break result?,
            event = events.recv() => {
                if let (Ok(event), Some(spinner)) = (event, spinner.as_ref()) {
                    if event.execution_id == Some(execution_id) {
                        if let Some(message) = describe(&event.payload) {
                            spinner.set_message(message);
                        }
                    }
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if signal.is_ok() {
                    warn!(%execution_id, "interrupted, cancelling execution");
                    if let Err(err) = orchestrator.cancel_execution(execution_id) {
                        warn!(%execution_id, %err, "cancel request rejected");
                    }
                }
            }
        }
    };

    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    orchestrator.shutdown().await;

    let status = execution.status;
    output(&RunOutput::new(&execution, &workflow), json_mode);
    if status != ExecutionStatus::Completed {
        bail!(
            "execution {execution_id} ended {status}{}",
            execution
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn describe(payload: &EventPayload) -> Option<String> {
    match payload {
        EventPayload::PhaseStarted {
            phase_id, attempt, ..
        } => Some(format!("phase {phase_id} (attempt {attempt})")),
        EventPayload::TaskDispatched {
            task_id, agent_id, ..
        } => Some(format!("{task_id} -> {agent_id}")),
        EventPayload::RecoveryApplied { action, detail, .. } => {
            Some(format!("recovery {action}: {detail}"))
        }
        EventPayload::ExecutionPaused { reason, .. } => Some(format!("paused: {reason}")),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
pub struct TaskRow {
    pub phase: String,
    pub task: String,
    pub status: String,
    pub agent: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub quality: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub version: String,
    pub status: String,
    pub progress: f64,
    pub completed_phases: Vec<String>,
    pub skipped_phases: Vec<String>,
    pub failed_phases: Vec<String>,
    pub tasks: Vec<TaskRow>,
    pub total_cost: f64,
    pub peak_in_flight: usize,
    pub recovery_actions: usize,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl RunOutput {
    /// Rows follow the definition's phase and task order; tasks of a fallback
    /// workflow that the definition lacks come last.
    pub fn new(execution: &WorkflowExecution, definition: &WorkflowDefinition) -> Self {
        let row = |phase: &str, task: &str, state: &TaskState| TaskRow {
            phase: phase.to_string(),
            task: task.to_string(),
            status: state.status.to_string(),
            agent: state.agent_id.clone(),
            attempts: state.attempts,
            duration_ms: state.metrics.duration_ms,
            quality: state.metrics.quality_score,
        };

        let mut tasks: Vec<TaskRow> = definition
            .phases
            .iter()
            .flat_map(|phase| phase.ordered_tasks().into_iter().map(move |t| (phase, t)))
            .filter_map(|(phase, task)| {
                execution
                    .tasks
                    .get(&task.id)
                    .map(|state| row(&phase.id, &task.id, state))
            })
            .collect();
        let mut extra: Vec<&String> = execution
            .tasks
            .keys()
            .filter(|id| definition.task(id).is_none())
            .collect();
        extra.sort();
        tasks.extend(
            extra
                .into_iter()
                .filter_map(|id| execution.tasks.get(id).map(|state| row("-", id.as_str(), state))),
        );

        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id.clone(),
            version: execution.workflow_version.to_string(),
            status: execution.status.to_string(),
            progress: execution.progress.overall_progress,
            completed_phases: execution.progress.completed_phases.clone(),
            skipped_phases: execution.progress.skipped_phases.clone(),
            failed_phases: execution.progress.failed_phases.clone(),
            tasks,
            total_cost: execution.resources.total_cost,
            peak_in_flight: execution.resources.peak_in_flight,
            recovery_actions: execution.recovery.len(),
            duration_ms: execution
                .started_at
                .zip(execution.completed_at)
                .map(|(start, end)| (end - start).num_milliseconds()),
            error: execution.error.clone(),
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        let formatter = TableFormatter::new();
        let colors = formatter.use_colors();
        let mut lines = vec![
            format!("Execution: {}", self.execution_id),
            format!("Workflow: {} v{}", self.workflow_id, self.version),
            format!("Status: {} ({:.0}%)", self.status, self.progress),
        ];
        if !self.completed_phases.is_empty() {
            lines.push(format!("Completed phases: {}", self.completed_phases.join(" -> ")));
        }
        if !self.skipped_phases.is_empty() {
            lines.push(format!("Skipped phases: {}", self.skipped_phases.join(", ")));
        }

        let mut table =
            formatter.table(&["Phase", "Task", "Status", "Agent", "Attempts", "Duration", "Quality"]);
        for row in &self.tasks {
            table.add_row(vec![
                Cell::new(&row.phase),
                Cell::new(&row.task),
                status_cell(&row.status, colors),
                Cell::new(row.agent.as_deref().unwrap_or("-")),
                Cell::new(row.attempts),
                Cell::new(format!("{}ms", row.duration_ms)),
                Cell::new(row.quality.map_or_else(|| "-".to_string(), |q| format!("{q:.2}"))),
            ]);
        }
        lines.push(table.to_string());

        lines.push(format!(
            "Cost: {:.2}  Peak in flight: {}  Recovery actions: {}",
            self.total_cost, self.peak_in_flight, self.recovery_actions
        ));
        if let Some(ms) = self.duration_ms {
            lines.push(format!("Duration: {ms}ms"));
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {error}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("count=3").unwrap(), ("count".to_string(), json!(3)));
        assert_eq!(
            parse_input("name=release").unwrap(),
            ("name".to_string(), json!("release"))
        );
        assert_eq!(
            parse_input("flags={\"fast\":true}").unwrap(),
            ("flags".to_string(), json!({"fast": true}))
        );
        assert_eq!(parse_input("empty=").unwrap(), ("empty".to_string(), json!("")));
        assert!(parse_input("novalue").is_err());
        assert!(parse_input("=3").is_err());
    }

    #[test]
    fn test_describe_ignores_uninteresting_events() {
        let payload = EventPayload::ExecutionResumed {
            execution_id: Uuid::new_v4(),
        };
        assert!(describe(&payload).is_none());

        let payload = EventPayload::PhaseStarted {
            execution_id: Uuid::new_v4(),
            phase_id: "build".to_string(),
            attempt: 2,
        };
        assert_eq!(describe(&payload).unwrap(), "phase build (attempt 2)");
    }
}
