//! Aggregated system status reported by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounts {
    pub total: usize,
    pub available: usize,
    pub busy: usize,
    pub offline: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub in_flight: usize,
    pub completed: u64,
    pub compensated: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub recovering: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Point-in-time view of the whole orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub agents: AgentCounts,
    pub tasks: TaskCounts,
    pub executions: ExecutionCounts,
    /// Distinct clients with at least one execution.
    pub projects: usize,
    /// Finished tasks per minute of uptime.
    pub throughput_per_minute: f64,
    /// Share of finished tasks that succeeded.
    pub efficiency: f64,
    pub average_quality: f64,
}
