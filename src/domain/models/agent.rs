use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Agent status enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Available,
    Busy,
    Offline,
    Error,
}

impl AgentStatus {
    /// Offline and errored agents receive no new work.
    pub const fn accepts_work(self) -> bool {
        matches!(self, Self::Available | Self::Busy)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Busy => write!(f, "busy"),
            Self::Offline => write!(f, "offline"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "available" | "idle" => Ok(Self::Available),
            "busy" => Ok(Self::Busy),
            "offline" => Ok(Self::Offline),
            "error" => Ok(Self::Error),
            _ => Err(anyhow::anyhow!("Invalid agent status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResources {
    #[serde(default = "default_cpu_units")]
    pub cpu_units: f64,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
}

const fn default_cpu_units() -> f64 {
    1.0
}

const fn default_memory_mb() -> u64 {
    512
}

impl Default for AgentResources {
    fn default() -> Self {
        Self {
            cpu_units: default_cpu_units(),
            memory_mb: default_memory_mb(),
        }
    }
}

/// Rolling performance profile, updated on every release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentPerformance {
    #[serde(default)]
    pub average_task_time_ms: f64,
    #[serde(default = "default_ratio")]
    pub success_rate: f64,
    #[serde(default = "default_quality")]
    pub quality_score: f64,
    #[serde(default)]
    pub cost_per_task: f64,
    #[serde(default)]
    pub tasks_completed: u64,
}

const fn default_ratio() -> f64 {
    1.0
}

const fn default_quality() -> f64 {
    0.8
}

impl Default for AgentPerformance {
    fn default() -> Self {
        Self {
            average_task_time_ms: 0.0,
            success_rate: default_ratio(),
            quality_score: default_quality(),
            cost_per_task: 0.0,
            tasks_completed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConstraints {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_daily")]
    pub max_daily_tasks: u32,
    #[serde(default = "default_uptime")]
    pub required_uptime: f64,
}

const fn default_max_concurrent() -> usize {
    1
}

const fn default_max_daily() -> u32 {
    1_000
}

const fn default_uptime() -> f64 {
    0.99
}

impl Default for AgentConstraints {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent(),
            max_daily_tasks: default_max_daily(),
            required_uptime: default_uptime(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSla {
    #[serde(default)]
    pub max_response_time_ms: Option<u64>,
    #[serde(default)]
    pub availability_target: Option<f64>,
    #[serde(default)]
    pub min_quality: Option<f64>,
}

/// A capability-bound worker with concurrency and quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique agent identifier
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Capabilities matched against task requirements
    pub capabilities: BTreeSet<String>,

    #[serde(default)]
    pub resources: AgentResources,

    #[serde(default)]
    pub performance: AgentPerformance,

    #[serde(default)]
    pub constraints: AgentConstraints,

    #[serde(default)]
    pub sla: AgentSla,

    #[serde(default)]
    pub status: AgentStatus,

    /// Task keys currently assigned (bounded by `max_concurrent_tasks`)
    #[serde(default)]
    pub current_task_ids: Vec<String>,
}

impl Agent {
    /// Create an available agent with default limits.
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            resources: AgentResources::default(),
            performance: AgentPerformance::default(),
            constraints: AgentConstraints::default(),
            sla: AgentSla::default(),
            status: AgentStatus::Available,
            current_task_ids: Vec::new(),
        }
    }

    pub const fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.constraints.max_concurrent_tasks = max;
        self
    }

    pub const fn with_max_daily_tasks(mut self, max: u32) -> Self {
        self.constraints.max_daily_tasks = max;
        self
    }

    pub const fn with_quality(mut self, quality: f64) -> Self {
        self.performance.quality_score = quality;
        self
    }

    pub const fn with_cost(mut self, cost: f64) -> Self {
        self.performance.cost_per_task = cost;
        self
    }

    pub const fn with_sla(mut self, sla: AgentSla) -> Self {
        self.sla = sla;
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn load(&self) -> usize {
        self.current_task_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_status_round_trip() {
        for status in [
            AgentStatus::Available,
            AgentStatus::Busy,
            AgentStatus::Offline,
            AgentStatus::Error,
        ] {
            assert_eq!(status.to_string().parse::<AgentStatus>().unwrap(), status);
        }
        assert!("sleeping".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn test_agent_yaml_defaults() {
        let agent: Agent = serde_yaml::from_str("id: designer\ncapabilities: [design]\n").unwrap();
        assert_eq!(agent.constraints.max_concurrent_tasks, 1);
        assert_eq!(agent.status, AgentStatus::Available);
        assert!(agent.has_capability("design"));
        assert!(!agent.has_capability("deployment"));
    }
}
