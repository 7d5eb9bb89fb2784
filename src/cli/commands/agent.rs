//! Agent CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::Cell;
use serde::Serialize;

use crate::cli::output::{output, status_cell, truncate, CommandOutput, TableFormatter};
use crate::domain::models::{Agent, Config};

#[derive(Args, Debug)]
pub struct AgentArgs {
    #[command(subcommand)]
    pub command: AgentCommands,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// List the configured agent fleet
    List {
        /// Only agents advertising this capability
        #[arg(short = 'k', long)]
        capability: Option<String>,
    },
    /// Show one configured agent
    Show {
        /// Agent id
        id: String,
    },
}

pub fn execute(args: AgentArgs, config: &Config, json_mode: bool) -> Result<()> {
    match args.command {
        AgentCommands::List { capability } => {
            let agents: Vec<AgentOutput> = config
                .agents
                .iter()
                .filter(|a| capability.as_deref().map_or(true, |c| a.has_capability(c)))
                .map(AgentOutput::from)
                .collect();
            output(
                &AgentListOutput {
                    total: agents.len(),
                    agents,
                },
                json_mode,
            );
        }
        AgentCommands::Show { id } => {
            let agent = config
                .agents
                .iter()
                .find(|a| a.id == id)
                .ok_or_else(|| anyhow::anyhow!("Agent not found: {id}"))?;
            output(&AgentDetailOutput(agent.clone()), json_mode);
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct AgentOutput {
    pub id: String,
    pub name: String,
    pub status: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: usize,
    pub max_daily_tasks: u32,
    pub success_rate: f64,
}

impl From<&Agent> for AgentOutput {
    fn from(agent: &Agent) -> Self {
        Self {
            id: agent.id.clone(),
            name: agent.name.clone(),
            status: agent.status.to_string(),
            capabilities: agent.capabilities.iter().cloned().collect(),
            max_concurrent_tasks: agent.constraints.max_concurrent_tasks,
            max_daily_tasks: agent.constraints.max_daily_tasks,
            success_rate: agent.performance.success_rate,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentListOutput {
    pub agents: Vec<AgentOutput>,
    pub total: usize,
}

impl CommandOutput for AgentListOutput {
    fn to_human(&self) -> String {
        if self.agents.is_empty() {
            return "No agents configured.".to_string();
        }

        let formatter = TableFormatter::new();
        let colors = formatter.use_colors();
        let mut table = formatter.table(&["ID", "Status", "Capabilities", "Slots", "Daily", "Success"]);
        for agent in &self.agents {
            table.add_row(vec![
                Cell::new(truncate(&agent.id, 24)),
                status_cell(&agent.status, colors),
                Cell::new(agent.capabilities.join(", ")),
                Cell::new(agent.max_concurrent_tasks),
                Cell::new(agent.max_daily_tasks),
                Cell::new(format!("{:.0}%", agent.success_rate * 100.0)),
            ]);
        }
        format!("Found {} agent(s):\n{table}", self.total)
    }
}

/// Full agent record as configured.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct AgentDetailOutput(pub Agent);

impl CommandOutput for AgentDetailOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.0).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_output_from_agent() {
        let agent = Agent::new("dev-1", ["testing", "development"]);
        let out = AgentOutput::from(&agent);
        assert_eq!(out.id, "dev-1");
        assert_eq!(out.status, "available");
        assert_eq!(out.capabilities, vec!["development", "testing"]);
    }

    #[test]
    fn test_empty_fleet_message() {
        let list = AgentListOutput {
            agents: vec![],
            total: 0,
        };
        assert_eq!(list.to_human(), "No agents configured.");
    }
}
