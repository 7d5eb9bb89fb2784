//! Agent registry: capability sets, limits and live status of every agent.
//!
//! Each agent's runtime state sits behind its own mutex so reservation and
//! release on one agent are serialized while different agents proceed
//! independently.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::errors::{DomainResult, OrchestrationError};
use crate::domain::models::{Agent, AgentCounts, AgentStatus};

/// How a reserved task ended, as reported on release.
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Success {
        duration_ms: u64,
        quality: Option<f64>,
    },
    Failure {
        duration_ms: u64,
    },
    /// The agent itself misbehaved; it is moved to `error`.
    AgentFault {
        duration_ms: u64,
        reason: String,
    },
    /// Slot handed back without running (cancellation, dropped lease).
    Abandoned,
}

impl ReleaseOutcome {
    const fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::Success { duration_ms, .. }
            | Self::Failure { duration_ms }
            | Self::AgentFault { duration_ms, .. } => Some(*duration_ms),
            Self::Abandoned => None,
        }
    }
}

/// An agent missed its own SLA on a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentSlaBreach {
    pub agent_id: String,
    pub task_key: String,
    pub detail: String,
}

/// Whether any agent could ever serve a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityCoverage {
    /// No registered agent advertises it.
    None,
    /// Every capable agent is offline or in error.
    Down,
    Serviceable,
}

#[derive(Debug)]
struct AgentRuntime {
    agent: Agent,
    day: NaiveDate,
    completed_today: u32,
    quality_samples: u64,
}

impl AgentRuntime {
    fn new(agent: Agent) -> Self {
        Self {
            agent,
            day: Utc::now().date_naive(),
            completed_today: 0,
            quality_samples: 0,
        }
    }

    fn roll_day(&mut self) {
        let today = Utc::now().date_naive();
        if today != self.day {
            self.day = today;
            self.completed_today = 0;
        }
    }

    fn has_capacity(&self) -> bool {
        let load = self.agent.current_task_ids.len();
        let daily_used = self.completed_today as usize + load;
        self.agent.status.accepts_work()
            && load < self.agent.constraints.max_concurrent_tasks
            && daily_used < self.agent.constraints.max_daily_tasks as usize
    }

    fn refresh_status(&mut self) {
        if self.agent.status.accepts_work() {
            self.agent.status = if self.agent.current_task_ids.is_empty() {
                AgentStatus::Available
            } else {
                AgentStatus::Busy
            };
        }
    }
}

#[derive(Debug)]
struct AgentSlot {
    state: Mutex<AgentRuntime>,
}

impl AgentSlot {
    fn lock(&self) -> MutexGuard<'_, AgentRuntime> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of agents and their live capacity.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<AgentSlot>>,
    changes: Arc<Notify>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent.
    pub fn register(&self, mut agent: Agent) -> DomainResult<()> {
        if agent.capabilities.is_empty() {
            return Err(OrchestrationError::InvalidDefinition(format!(
                "agent '{}' has no capabilities",
                agent.id
            )));
        }
        if agent.constraints.max_concurrent_tasks == 0 {
            return Err(OrchestrationError::InvalidDefinition(format!(
                "agent '{}' must allow at least one concurrent task",
                agent.id
            )));
        }

        agent.current_task_ids.clear();
        info!(
            agent_id = %agent.id,
            capabilities = ?agent.capabilities,
            max_concurrent = agent.constraints.max_concurrent_tasks,
            "agent registered"
        );
        let slot = Arc::new(AgentSlot {
            state: Mutex::new(AgentRuntime::new(agent.clone())),
        });
        self.agents.insert(agent.id, slot);
        self.changes.notify_waiters();
        Ok(())
    }

    pub fn deregister(&self, agent_id: &str) -> Option<Agent> {
        let removed = self
            .agents
            .remove(agent_id)
            .map(|(_, slot)| slot.lock().agent.clone());
        if removed.is_some() {
            info!(agent_id, "agent deregistered");
            self.changes.notify_waiters();
        }
        removed
    }

    /// Snapshot of one agent.
    pub fn get(&self, agent_id: &str) -> Option<Agent> {
        self.slot(agent_id).map(|slot| slot.lock().agent.clone())
    }

    /// Snapshots of every agent, sorted by id.
    pub fn list(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .map(|entry| entry.value().lock().agent.clone())
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> DomainResult<()> {
        let slot = self.slot(agent_id).ok_or_else(|| {
            OrchestrationError::InvalidDefinition(format!("unknown agent '{agent_id}'"))
        })?;
        {
            let mut runtime = slot.lock();
            runtime.agent.status = status;
            runtime.refresh_status();
        }
        debug!(agent_id, %status, "agent status changed");
        self.changes.notify_waiters();
        Ok(())
    }

    /// Snapshots of agents advertising `capability` and accepting work.
    pub fn candidates(&self, capability: &str) -> Vec<Agent> {
        self.agents
            .iter()
            .filter_map(|entry| {
                let runtime = entry.value().lock();
                if runtime.agent.has_capability(capability) && runtime.agent.status.accepts_work() {
                    Some(runtime.agent.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn coverage(&self, capability: &str) -> CapabilityCoverage {
        let mut any = false;
        for entry in &self.agents {
            let runtime = entry.value().lock();
            if runtime.agent.has_capability(capability) {
                if runtime.agent.status.accepts_work() {
                    return CapabilityCoverage::Serviceable;
                }
                any = true;
            }
        }
        if any {
            CapabilityCoverage::Down
        } else {
            CapabilityCoverage::None
        }
    }

    /// Atomically check capacity and reserve a slot on `agent_id`.
    pub fn try_reserve(&self, agent_id: &str, task_key: &str) -> bool {
        let Some(slot) = self.slot(agent_id) else {
            return false;
        };
        let mut runtime = slot.lock();
        runtime.roll_day();
        if !runtime.has_capacity() {
            return false;
        }
        runtime.agent.current_task_ids.push(task_key.to_string());
        runtime.refresh_status();
        debug!(
            agent_id,
            task_key,
            load = runtime.agent.current_task_ids.len(),
            "slot reserved"
        );
        true
    }

    /// Free a slot and fold the outcome into the agent's profile. Metrics are
    /// updated once per reservation; releasing a key that is not held is a
    /// no-op apart from fault marking.
    pub fn release(
        &self,
        agent_id: &str,
        task_key: &str,
        outcome: &ReleaseOutcome,
    ) -> Option<AgentSlaBreach> {
        let slot = self.slot(agent_id)?;
        let breach = {
            let mut runtime = slot.lock();
            runtime.roll_day();
            let before = runtime.agent.current_task_ids.len();
            runtime.agent.current_task_ids.retain(|k| k != task_key);
            let held = runtime.agent.current_task_ids.len() < before;

            let breach = if held {
                record_outcome(&mut runtime, task_key, outcome)
            } else {
                None
            };

            if let ReleaseOutcome::AgentFault { reason, .. } = outcome {
                warn!(agent_id, task_key, %reason, "agent fault, marking agent as error");
                runtime.agent.status = AgentStatus::Error;
            }
            runtime.refresh_status();
            breach
        };
        self.changes.notify_waiters();
        breach
    }

    /// Counts of agents by status.
    pub fn counts(&self) -> AgentCounts {
        let mut counts = AgentCounts::default();
        for entry in &self.agents {
            counts.total += 1;
            match entry.value().lock().agent.status {
                AgentStatus::Available => counts.available += 1,
                AgentStatus::Busy => counts.busy += 1,
                AgentStatus::Offline => counts.offline += 1,
                AgentStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Total tasks currently reserved across all agents.
    pub fn in_flight(&self) -> usize {
        self.agents
            .iter()
            .map(|entry| entry.value().lock().agent.current_task_ids.len())
            .sum()
    }

    /// Signalled on every release and status change.
    pub fn changes(&self) -> Arc<Notify> {
        Arc::clone(&self.changes)
    }

    fn slot(&self, agent_id: &str) -> Option<Arc<AgentSlot>> {
        self.agents.get(agent_id).map(|entry| Arc::clone(entry.value()))
    }
}

fn record_outcome(
    runtime: &mut AgentRuntime,
    task_key: &str,
    outcome: &ReleaseOutcome,
) -> Option<AgentSlaBreach> {
    let duration_ms = outcome.duration_ms()?;
    runtime.completed_today += 1;

    let performance = &mut runtime.agent.performance;
    let n = performance.tasks_completed as f64;
    let succeeded = matches!(outcome, ReleaseOutcome::Success { .. });
    performance.average_task_time_ms =
        performance.average_task_time_ms.mul_add(n, duration_ms as f64) / (n + 1.0);
    performance.success_rate =
        performance.success_rate.mul_add(n, if succeeded { 1.0 } else { 0.0 }) / (n + 1.0);
    performance.tasks_completed += 1;

    let quality = match outcome {
        ReleaseOutcome::Success { quality, .. } => *quality,
        _ => None,
    };
    if let Some(quality) = quality {
        let samples = runtime.quality_samples as f64;
        let performance = &mut runtime.agent.performance;
        performance.quality_score = if samples == 0.0 {
            quality
        } else {
            performance.quality_score.mul_add(samples, quality) / (samples + 1.0)
        };
        runtime.quality_samples += 1;
    }

    let sla = &runtime.agent.sla;
    let mut breaches = Vec::new();
    if let Some(max) = sla.max_response_time_ms {
        if duration_ms > max {
            breaches.push(format!("response time {duration_ms}ms exceeds {max}ms"));
        }
    }
    if let (Some(min), Some(actual)) = (sla.min_quality, quality) {
        if actual < min {
            breaches.push(format!("quality {actual:.2} below {min:.2}"));
        }
    }

    (!breaches.is_empty()).then(|| AgentSlaBreach {
        agent_id: runtime.agent.id.clone(),
        task_key: task_key.to_string(),
        detail: breaches.join("; "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentSla;

    fn registry_with(agent: Agent) -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry.register(agent).unwrap();
        registry
    }

    #[test]
    fn test_reserve_respects_max_concurrent() {
        let registry = registry_with(Agent::new("dev", ["development"]).with_max_concurrent_tasks(2));
        assert!(registry.try_reserve("dev", "e:t1"));
        assert!(registry.try_reserve("dev", "e:t2"));
        assert!(!registry.try_reserve("dev", "e:t3"));
        assert_eq!(registry.get("dev").unwrap().status, AgentStatus::Busy);

        registry.release("dev", "e:t1", &ReleaseOutcome::Success { duration_ms: 10, quality: None });
        assert!(registry.try_reserve("dev", "e:t3"));
    }

    #[test]
    fn test_daily_quota_counts_in_flight() {
        let registry = registry_with(
            Agent::new("dev", ["development"])
                .with_max_concurrent_tasks(5)
                .with_max_daily_tasks(2),
        );
        assert!(registry.try_reserve("dev", "a"));
        registry.release("dev", "a", &ReleaseOutcome::Success { duration_ms: 1, quality: None });
        assert!(registry.try_reserve("dev", "b"));
        assert!(!registry.try_reserve("dev", "c"));
    }

    #[test]
    fn test_abandoned_release_does_not_count() {
        let registry = registry_with(Agent::new("dev", ["development"]).with_max_daily_tasks(1));
        assert!(registry.try_reserve("dev", "a"));
        registry.release("dev", "a", &ReleaseOutcome::Abandoned);
        assert!(registry.try_reserve("dev", "b"));
        assert_eq!(registry.get("dev").unwrap().performance.tasks_completed, 0);
    }

    #[test]
    fn test_metrics_updated_once_per_reservation() {
        let registry = registry_with(Agent::new("qa", ["qa"]));
        assert!(registry.try_reserve("qa", "e:t"));
        let outcome = ReleaseOutcome::Success {
            duration_ms: 100,
            quality: Some(0.9),
        };
        registry.release("qa", "e:t", &outcome);
        registry.release("qa", "e:t", &outcome);

        let agent = registry.get("qa").unwrap();
        assert_eq!(agent.performance.tasks_completed, 1);
        assert!((agent.performance.average_task_time_ms - 100.0).abs() < f64::EPSILON);
        assert!((agent.performance.quality_score - 0.9).abs() < f64::EPSILON);

        assert!(registry.try_reserve("qa", "e:t2"));
        registry.release("qa", "e:t2", &ReleaseOutcome::Failure { duration_ms: 300 });
        let agent = registry.get("qa").unwrap();
        assert!((agent.performance.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((agent.performance.average_task_time_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reused_key_counts_each_reservation() {
        let registry = registry_with(Agent::new("dev", ["development"]));
        let outcome = ReleaseOutcome::Success {
            duration_ms: 10,
            quality: None,
        };
        for _ in 0..3 {
            assert!(registry.try_reserve("dev", "e/build#1.0/compile#1"));
            registry.release("dev", "e/build#1.0/compile#1", &outcome);
        }

        let agent = registry.get("dev").unwrap();
        assert_eq!(agent.performance.tasks_completed, 3);
        assert!(agent.current_task_ids.is_empty());
        assert_eq!(agent.status, AgentStatus::Available);
    }

    #[test]
    fn test_agent_fault_marks_error_and_sla_breach_reported() {
        let registry = registry_with(Agent::new("ops", ["deployment"]).with_sla(AgentSla {
            max_response_time_ms: Some(50),
            ..AgentSla::default()
        }));
        assert!(registry.try_reserve("ops", "k1"));
        let breach = registry.release(
            "ops",
            "k1",
            &ReleaseOutcome::Success {
                duration_ms: 80,
                quality: None,
            },
        );
        assert!(breach.unwrap().detail.contains("exceeds 50ms"));

        assert!(registry.try_reserve("ops", "k2"));
        registry.release(
            "ops",
            "k2",
            &ReleaseOutcome::AgentFault {
                duration_ms: 5,
                reason: "crashed".to_string(),
            },
        );
        assert_eq!(registry.get("ops").unwrap().status, AgentStatus::Error);
        assert!(!registry.try_reserve("ops", "k3"));
        assert_eq!(registry.coverage("deployment"), CapabilityCoverage::Down);
        assert_eq!(registry.coverage("design"), CapabilityCoverage::None);
    }

    #[test]
    fn test_counts_by_status() {
        let registry = AgentRegistry::new();
        registry.register(Agent::new("a", ["x"])).unwrap();
        registry.register(Agent::new("b", ["x"])).unwrap();
        registry.set_status("b", AgentStatus::Offline).unwrap();
        assert!(registry.try_reserve("a", "k"));

        let counts = registry.counts();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.busy, 1);
        assert_eq!(counts.offline, 1);
        assert_eq!(registry.candidates("x").len(), 1);
    }

    #[test]
    fn test_register_rejects_empty_capabilities() {
        let registry = AgentRegistry::new();
        assert!(registry.register(Agent::new("idle", Vec::<String>::new())).is_err());
    }
}
