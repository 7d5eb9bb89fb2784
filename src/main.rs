//! Conductor CLI entry point.

use anyhow::Result;
use clap::Parser;

use conductor::cli::{commands, handle_error, Cli, Commands};
use conductor::domain::models::Config;
use conductor::infrastructure::{ConfigLoader, LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match init_logging(&config) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Workflow(args) => commands::workflow::execute(args, cli.json),
        Commands::Run(args) => commands::run::execute(args, config, cli.json).await,
        Commands::Agent(args) => commands::agent::execute(args, &config, cli.json),
        Commands::Config(args) => commands::config::execute(args, config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

fn init_logging(config: &Config) -> Result<LoggerImpl> {
    let log_config = LogConfig::try_from(&config.logging).map_err(anyhow::Error::msg)?;
    LoggerImpl::init(&log_config)
}
