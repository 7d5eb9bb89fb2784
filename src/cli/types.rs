//! CLI type definitions
//!
//! Top-level clap structures. Each command's arguments live beside its
//! implementation under `commands/`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::{
    agent::AgentArgs, config::ConfigArgs, run::RunArgs, workflow::WorkflowArgs,
};

#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "Conductor - multi-agent workflow orchestrator", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .conductor/config.yaml)
    #[arg(short, long, global = true, env = "CONDUCTOR_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate and inspect workflow definitions
    Workflow(WorkflowArgs),

    /// Run a workflow definition against the configured agent fleet
    Run(RunArgs),

    /// Inspect the configured agent fleet
    Agent(AgentArgs),

    /// Inspect the effective configuration
    Config(ConfigArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::agent::AgentCommands;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_inputs() {
        let cli = Cli::try_parse_from([
            "conductor",
            "--json",
            "run",
            "release.yaml",
            "--input",
            "version=\"1.2.0\"",
            "--input",
            "count=3",
            "--client",
            "acme",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.file, PathBuf::from("release.yaml"));
                assert_eq!(args.inputs.len(), 2);
                assert_eq!(args.inputs[1].1, serde_json::json!(3));
                assert_eq!(args.client.as_deref(), Some("acme"));
            }
            other => panic!("Expected run command, got {other:?}"),
        }
    }

    #[test]
    fn test_global_config_and_capability_filter_coexist() {
        let cli = Cli::try_parse_from([
            "conductor",
            "agent",
            "-c",
            "fleet.yaml",
            "list",
            "-k",
            "design",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("fleet.yaml")));
        match cli.command {
            Commands::Agent(args) => match args.command {
                AgentCommands::List { capability } => {
                    assert_eq!(capability.as_deref(), Some("design"));
                }
                other => panic!("Expected agent list, got {other:?}"),
            },
            other => panic!("Expected agent command, got {other:?}"),
        }
    }
}
