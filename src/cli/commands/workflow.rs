//! Workflow CLI commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use comfy_table::Cell;
use serde::Serialize;

use crate::cli::output::{output, truncate, CommandOutput, TableFormatter};
use crate::domain::models::{DependencyTarget, WorkflowDefinition};
use crate::services::{DependencyResolver, WorkflowCatalog};

#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommands {
    /// Check a definition for structural errors and dependency cycles
    Validate {
        /// Workflow definition (YAML or JSON)
        file: PathBuf,
    },
    /// Show phases, tasks and execution order of a definition
    Show {
        /// Workflow definition (YAML or JSON)
        file: PathBuf,
    },
}

pub fn execute(args: WorkflowArgs, json_mode: bool) -> Result<()> {
    match args.command {
        WorkflowCommands::Validate { file } => {
            let definition = load_validated(&file)?;
            output(&ValidationOutput::from_definition(&definition, &file)?, json_mode);
        }
        WorkflowCommands::Show { file } => {
            let definition = load_validated(&file)?;
            output(&WorkflowDetailOutput::from_definition(&definition)?, json_mode);
        }
    }
    Ok(())
}

/// Parse a definition file and run full catalog validation on it.
pub fn load_validated(file: &Path) -> Result<WorkflowDefinition> {
    let definition = WorkflowCatalog::parse_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    WorkflowCatalog::new()
        .validate(&definition)
        .with_context(|| format!("Workflow {} is invalid", definition.id))?;
    Ok(definition)
}

#[derive(Debug, Serialize)]
pub struct ValidationOutput {
    pub file: String,
    pub workflow_id: String,
    pub version: String,
    pub phases: usize,
    pub tasks: usize,
    pub execution_order: Vec<String>,
}

impl ValidationOutput {
    fn from_definition(definition: &WorkflowDefinition, file: &Path) -> Result<Self> {
        Ok(Self {
            file: file.display().to_string(),
            workflow_id: definition.id.clone(),
            version: definition.version.to_string(),
            phases: definition.phases.len(),
            tasks: definition.tasks().count(),
            execution_order: DependencyResolver::new().phase_order(definition)?,
        })
    }
}

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        format!(
            "{} {} v{} is valid: {} phase(s), {} task(s)\nExecution order: {}",
            console::style("✓").green().bold(),
            self.workflow_id,
            self.version,
            self.phases,
            self.tasks,
            self.execution_order.join(" -> ")
        )
    }
}

#[derive(Debug, Serialize)]
pub struct PhaseOutput {
    pub id: String,
    pub mode: String,
    pub depends_on: Vec<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: u32,
    pub checkpoints: usize,
    pub tasks: Vec<TaskOutput>,
}

#[derive(Debug, Serialize)]
pub struct TaskOutput {
    pub id: String,
    pub capability: String,
    pub priority: u32,
    pub estimated_duration_ms: u64,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowDetailOutput {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub execution_order: Vec<String>,
    pub phases: Vec<PhaseOutput>,
}

impl WorkflowDetailOutput {
    fn from_definition(definition: &WorkflowDefinition) -> Result<Self> {
        let execution_order = DependencyResolver::new().phase_order(definition)?;
        let phases = execution_order
            .iter()
            .filter_map(|id| definition.phase(id))
            .map(|phase| PhaseOutput {
                id: phase.id.clone(),
                mode: phase.mode.to_string(),
                depends_on: definition
                    .phase_dependencies(&phase.id)
                    .into_iter()
                    .map(|d| d.phase)
                    .collect(),
                timeout_ms: phase.timeout_ms,
                max_retries: phase.retry.max_attempts,
                checkpoints: phase.checkpoints.len(),
                tasks: phase
                    .ordered_tasks()
                    .into_iter()
                    .map(|task| TaskOutput {
                        id: task.id.clone(),
                        capability: task.capability.clone(),
                        priority: task.priority,
                        estimated_duration_ms: task.estimated_duration_ms,
                        depends_on: task.dependencies.iter().map(|d| target_label(&d.on)).collect(),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self {
            id: definition.id.clone(),
            name: definition.name.clone(),
            version: definition.version.to_string(),
            description: definition.description.clone(),
            execution_order,
            phases,
        })
    }
}

fn target_label(target: &DependencyTarget) -> String {
    match target {
        DependencyTarget::Task(id) => id.clone(),
        DependencyTarget::Branch(name) => format!("branch:{name}"),
    }
}

impl CommandOutput for WorkflowDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Workflow: {} v{}", self.id, self.version)];
        if !self.name.is_empty() && self.name != self.id {
            lines.push(format!("Name: {}", self.name));
        }
        if !self.description.is_empty() {
            lines.push(format!("Description: {}", self.description));
        }

        let formatter = TableFormatter::new();
        let mut table = formatter.table(&["Phase", "Mode", "Depends on", "Task", "Capability", "Est."]);
        for phase in &self.phases {
            for (i, task) in phase.tasks.iter().enumerate() {
                let (id, mode, deps) = if i == 0 {
                    (phase.id.clone(), phase.mode.clone(), phase.depends_on.join(", "))
                } else {
                    (String::new(), String::new(), String::new())
                };
                table.add_row(vec![
                    Cell::new(id),
                    Cell::new(mode),
                    Cell::new(deps),
                    Cell::new(truncate(&task.id, 32)),
                    Cell::new(&task.capability),
                    Cell::new(format!("{}ms", task.estimated_duration_ms)),
                ]);
            }
        }
        lines.push(table.to_string());
        lines.join("\n")
    }
}
