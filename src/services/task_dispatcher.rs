//! Task dispatcher: assigns ready tasks to capable agents.
//!
//! A global semaphore bounds the total in flight. Waiting for agent capacity
//! is event driven: callers park on the registry's `Notify`, which every
//! release and status change signals.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::errors::{DomainResult, OrchestrationError};
use crate::domain::models::Agent;
use crate::services::agent_registry::{
    AgentRegistry, AgentSlaBreach, CapabilityCoverage, ReleaseOutcome,
};

/// Configuration for the task dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Global ceiling on tasks in flight.
    pub max_concurrent_tasks: usize,
    /// Bounded wait for agent capacity.
    pub acquire_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 16,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// A reserved agent slot. Dropping an unreleased lease hands the slot back.
#[derive(Debug)]
pub struct AgentLease {
    agent: Agent,
    task_key: String,
    waited: bool,
    released: bool,
    registry: Arc<AgentRegistry>,
    _permit: OwnedSemaphorePermit,
}

impl AgentLease {
    pub fn agent_id(&self) -> &str {
        &self.agent.id
    }

    /// Agent snapshot taken at reservation time.
    pub const fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn task_key(&self) -> &str {
        &self.task_key
    }

    /// Whether this acquisition had to wait for capacity.
    pub const fn waited(&self) -> bool {
        self.waited
    }

    /// Free the slot and report the outcome to the registry.
    pub fn release(mut self, outcome: &ReleaseOutcome) -> Option<AgentSlaBreach> {
        self.released = true;
        self.registry
            .release(&self.agent.id, &self.task_key, outcome)
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        if !self.released {
            debug!(agent_id = %self.agent.id, task_key = %self.task_key, "lease dropped, releasing slot");
            self.registry
                .release(&self.agent.id, &self.task_key, &ReleaseOutcome::Abandoned);
        }
    }
}

/// Quality descending, then load ascending, then cost ascending.
fn rank(a: &Agent, b: &Agent) -> CmpOrdering {
    b.performance
        .quality_score
        .partial_cmp(&a.performance.quality_score)
        .unwrap_or(CmpOrdering::Equal)
        .then_with(|| a.load().cmp(&b.load()))
        .then_with(|| {
            a.performance
                .cost_per_task
                .partial_cmp(&b.performance.cost_per_task)
                .unwrap_or(CmpOrdering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

/// Capacity-aware dispatcher over the agent registry.
#[derive(Debug)]
pub struct TaskDispatcher {
    registry: Arc<AgentRegistry>,
    permits: Arc<Semaphore>,
    config: DispatcherConfig,
    dispatched: AtomicU64,
    conflicts: AtomicU64,
}

impl TaskDispatcher {
    pub fn new(registry: Arc<AgentRegistry>, config: DispatcherConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));
        Self {
            registry,
            permits,
            config,
            dispatched: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Reserve a slot on the best available agent for `capability`.
    ///
    /// Fails immediately with `AgentUnavailable` when no registered agent
    /// could ever serve it, and with `AgentTimeout` once the bounded wait
    /// elapses.
    pub async fn acquire(&self, capability: &str, task_key: &str) -> DomainResult<AgentLease> {
        self.ensure_coverage(capability)?;

        let started = Instant::now();
        let deadline = started + self.config.acquire_timeout;
        let timed_out = || OrchestrationError::AgentTimeout {
            capability: capability.to_string(),
            waited_ms: started.elapsed().as_millis() as u64,
        };

        let mut waited = false;
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                waited = true;
                match tokio::time::timeout_at(deadline, Arc::clone(&self.permits).acquire_owned())
                    .await
                {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(OrchestrationError::AgentUnavailable {
                            capability: capability.to_string(),
                        })
                    }
                    Err(_) => return Err(timed_out()),
                }
            }
        };

        let changes = self.registry.changes();
        loop {
            // Register interest before checking so a release between the
            // check and the await is not lost.
            let notified = changes.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(agent) = self.try_assign(capability, task_key) {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                if waited {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    agent_id = %agent.id,
                    capability,
                    task_key,
                    waited_ms = started.elapsed().as_millis() as u64,
                    "agent acquired"
                );
                return Ok(AgentLease {
                    agent,
                    task_key: task_key.to_string(),
                    waited,
                    released: false,
                    registry: Arc::clone(&self.registry),
                    _permit: permit,
                });
            }

            self.ensure_coverage(capability)?;
            waited = true;

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(capability, task_key, "timed out waiting for agent capacity");
                return Err(timed_out());
            }
        }
    }

    /// Release a lease with its outcome.
    pub fn release(&self, lease: AgentLease, outcome: &ReleaseOutcome) -> Option<AgentSlaBreach> {
        lease.release(outcome)
    }

    /// Acquisitions so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Acquisitions that had to wait for capacity.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Global permits not currently held.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn ensure_coverage(&self, capability: &str) -> DomainResult<()> {
        match self.registry.coverage(capability) {
            CapabilityCoverage::Serviceable => Ok(()),
            CapabilityCoverage::None | CapabilityCoverage::Down => {
                Err(OrchestrationError::AgentUnavailable {
                    capability: capability.to_string(),
                })
            }
        }
    }

    fn try_assign(&self, capability: &str, task_key: &str) -> Option<Agent> {
        let mut candidates = self.registry.candidates(capability);
        candidates.sort_by(rank);

        candidates.into_iter().find_map(|candidate| {
            self.registry
                .try_reserve(&candidate.id, task_key)
                .then(|| self.registry.get(&candidate.id).unwrap_or(candidate))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentStatus;

    fn dispatcher(agents: Vec<Agent>, timeout_ms: u64) -> TaskDispatcher {
        let registry = Arc::new(AgentRegistry::new());
        for agent in agents {
            registry.register(agent).unwrap();
        }
        TaskDispatcher::new(
            registry,
            DispatcherConfig {
                max_concurrent_tasks: 8,
                acquire_timeout: Duration::from_millis(timeout_ms),
            },
        )
    }

    #[tokio::test]
    async fn test_prefers_quality_then_load_then_cost() {
        let d = dispatcher(
            vec![
                Agent::new("cheap", ["design"]).with_quality(0.7).with_cost(1.0),
                Agent::new("best", ["design"]).with_quality(0.95).with_cost(9.0),
                Agent::new("also-best", ["design"]).with_quality(0.95).with_cost(3.0),
            ],
            100,
        );

        let first = d.acquire("design", "e:1").await.unwrap();
        assert_eq!(first.agent_id(), "also-best");
        let second = d.acquire("design", "e:2").await.unwrap();
        assert_eq!(second.agent_id(), "best");
        let third = d.acquire("design", "e:3").await.unwrap();
        assert_eq!(third.agent_id(), "cheap");
    }

    #[tokio::test]
    async fn test_unknown_capability_fails_immediately() {
        let d = dispatcher(vec![Agent::new("dev", ["development"])], 10_000);
        let started = std::time::Instant::now();
        let err = d.acquire("astrology", "e:1").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentUnavailable { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_times_out_when_agent_stays_busy() {
        let d = dispatcher(vec![Agent::new("dev", ["development"])], 50);
        let _held = d.acquire("development", "e:1").await.unwrap();
        let err = d.acquire("development", "e:2").await.unwrap_err();
        assert!(matches!(err, OrchestrationError::AgentTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_waiter_woken_by_release() {
        let d = Arc::new(dispatcher(vec![Agent::new("dev", ["development"])], 5_000));
        let held = d.acquire("development", "e:1").await.unwrap();

        let waiter = {
            let d = Arc::clone(&d);
            tokio::spawn(async move { d.acquire("development", "e:2").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        held.release(&ReleaseOutcome::Success {
            duration_ms: 20,
            quality: None,
        });
        let lease = waiter.await.unwrap().unwrap();
        assert!(lease.waited());
        assert_eq!(d.conflicts(), 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_capacity() {
        let d = dispatcher(vec![Agent::new("dev", ["development"])], 50);
        {
            let _lease = d.acquire("development", "e:1").await.unwrap();
            assert_eq!(d.registry().in_flight(), 1);
        }
        assert_eq!(d.registry().in_flight(), 0);
        assert!(d.acquire("development", "e:2").await.is_ok());
    }

    #[tokio::test]
    async fn test_offline_fleet_is_unavailable() {
        let d = dispatcher(vec![Agent::new("dev", ["development"])], 1_000);
        d.registry().set_status("dev", AgentStatus::Offline).unwrap();
        assert!(matches!(
            d.acquire("development", "e:1").await,
            Err(OrchestrationError::AgentUnavailable { .. })
        ));
    }
}
