use std::collections::HashSet;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::{Config, StoreKind};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_tasks: {0}. Must be at least 1")]
    InvalidMaxConcurrentTasks(usize),

    #[error("Invalid {field}: must be greater than 0")]
    ZeroDuration { field: &'static str },

    #[error("Invalid event_channel_capacity: {0}. Must be at least 1")]
    InvalidChannelCapacity(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Store path cannot be empty for the file store")]
    EmptyStorePath,

    #[error("Agent '{0}' declares no capabilities")]
    AgentWithoutCapabilities(String),

    #[error("Agent '{0}' has max_concurrent_tasks = 0")]
    AgentWithoutCapacity(String),

    #[error("Duplicate agent id: {0}")]
    DuplicateAgent(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .conductor/config.yaml (project config)
    /// 3. .conductor/local.yaml (project local overrides, optional)
    /// 4. Environment variables (CONDUCTOR_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// The merged provider stack used by [`ConfigLoader::load`].
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".conductor/config.yaml"))
            .merge(Yaml::file(".conductor/local.yaml"))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
    }

    /// Load configuration from a specific file, still honoring environment
    /// overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.max_concurrent_tasks == 0 {
            return Err(ConfigError::InvalidMaxConcurrentTasks(
                config.max_concurrent_tasks,
            ));
        }

        for (field, value) in [
            ("agent_acquire_timeout_ms", config.agent_acquire_timeout_ms),
            ("default_phase_timeout_ms", config.default_phase_timeout_ms),
            ("cycle_interval_ms", config.cycle_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if config.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity(0));
        }

        if config.store.kind == StoreKind::File && config.store.path.trim().is_empty() {
            return Err(ConfigError::EmptyStorePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let mut seen = HashSet::new();
        for agent in &config.agents {
            if agent.capabilities.is_empty() {
                return Err(ConfigError::AgentWithoutCapabilities(agent.id.clone()));
            }
            if agent.constraints.max_concurrent_tasks == 0 {
                return Err(ConfigError::AgentWithoutCapacity(agent.id.clone()));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.id.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Agent;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_concurrent_tasks, 16);
        assert_eq!(config.store.kind, StoreKind::Memory);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
max_concurrent_tasks: 4
agent_acquire_timeout_ms: 500
store:
  kind: file
  path: /tmp/conductor
logging:
  level: debug
  format: json
agents:
  - id: dev-1
    capabilities: [development, testing]
    constraints:
      max_concurrent_tasks: 2
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.agent_acquire_timeout_ms, 500);
        assert_eq!(config.store.kind, StoreKind::File);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].constraints.max_concurrent_tasks, 2);
        assert!(config.agents[0].has_capability("testing"));

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let config = Config {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConcurrentTasks(0))
        ));
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let config = Config {
            default_phase_timeout_ms: 0,
            ..Default::default()
        };
        match ConfigLoader::validate(&config) {
            Err(ConfigError::ZeroDuration { field }) => {
                assert_eq!(field, "default_phase_timeout_ms");
            }
            other => panic!("Expected ZeroDuration, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_settings() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(level)) if level == "loud"
        ));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogFormat(_))
        ));
    }

    #[test]
    fn test_validate_agents() {
        let mut config = Config::default();
        config.agents = vec![Agent::new("a", Vec::<String>::new())];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::AgentWithoutCapabilities(id)) if id == "a"
        ));

        config.agents = vec![Agent::new("a", ["dev"]), Agent::new("a", ["qa"])];
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::DuplicateAgent(id)) if id == "a"
        ));
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "max_concurrent_tasks: 5\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "max_concurrent_tasks: 15\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.max_concurrent_tasks, 15, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }

    #[test]
    fn test_env_override_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_concurrent_tasks: 5\ncycle_interval_ms: 250").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("CONDUCTOR_MAX_CONCURRENT_TASKS", Some("9")),
                ("CONDUCTOR_LOGGING__LEVEL", Some("warn")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.max_concurrent_tasks, 9);
                assert_eq!(config.cycle_interval_ms, 250);
                assert_eq!(config.logging.level, "warn");
            },
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(ConfigLoader::load_from_file("/nonexistent/conductor.yaml").is_err());
    }
}
