use serde::{Deserialize, Serialize};

use super::agent::Agent;

/// Main configuration structure for Conductor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Global ceiling on tasks in flight across all agents
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// How long a dispatch waits for agent capacity before timing out
    #[serde(default = "default_agent_acquire_timeout_ms")]
    pub agent_acquire_timeout_ms: u64,

    /// Phase timeout applied when a phase declares none
    #[serde(default = "default_phase_timeout_ms")]
    pub default_phase_timeout_ms: u64,

    /// Interval between orchestration-cycle events
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,

    /// Capacity of the broadcast event channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Execution snapshot storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Agent fleet registered at startup
    #[serde(default)]
    pub agents: Vec<Agent>,

    /// Directory of workflow definitions registered at startup
    #[serde(default)]
    pub workflow_dir: Option<String>,
}

const fn default_max_concurrent_tasks() -> usize {
    16
}

const fn default_agent_acquire_timeout_ms() -> u64 {
    30_000
}

const fn default_phase_timeout_ms() -> u64 {
    3_600_000
}

const fn default_cycle_interval_ms() -> u64 {
    5_000
}

const fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            agent_acquire_timeout_ms: default_agent_acquire_timeout_ms(),
            default_phase_timeout_ms: default_phase_timeout_ms(),
            cycle_interval_ms: default_cycle_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            agents: vec![],
            workflow_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    File,
}

/// Execution store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StoreConfig {
    #[serde(default)]
    pub kind: StoreKind,

    /// Directory for one-file-per-execution snapshots (file store only)
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    ".conductor/executions".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Also write to stdout when a log directory is set
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_enable_stdout() -> bool {
    true
}

fn default_rotation() -> String {
    "daily".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            enable_stdout: default_enable_stdout(),
            rotation: default_rotation(),
            retention_days: default_retention_days(),
        }
    }
}
