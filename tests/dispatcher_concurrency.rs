//! Capacity limits under concurrent acquisition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conductor::domain::models::Agent;
use conductor::services::{AgentRegistry, DispatcherConfig, ReleaseOutcome, TaskDispatcher};
use conductor::OrchestrationError;

fn dispatcher(
    agents: Vec<Agent>,
    max_concurrent_tasks: usize,
    timeout_ms: u64,
) -> Arc<TaskDispatcher> {
    let registry = Arc::new(AgentRegistry::new());
    for agent in agents {
        registry.register(agent).unwrap();
    }
    Arc::new(TaskDispatcher::new(
        registry,
        DispatcherConfig {
            max_concurrent_tasks,
            acquire_timeout: Duration::from_millis(timeout_ms),
        },
    ))
}

async fn hammer(dispatcher: &Arc<TaskDispatcher>, workers: usize) -> usize {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let dispatcher = Arc::clone(dispatcher);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let lease = dispatcher
                    .acquire("dev", &format!("task-{i}"))
                    .await
                    .expect("acquire should succeed");
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                dispatcher.release(
                    lease,
                    &ReleaseOutcome::Success {
                        duration_ms: 5,
                        quality: Some(0.9),
                    },
                );
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_limit_bounds_in_flight_tasks() {
    let dispatcher = dispatcher(
        vec![Agent::new("wide", ["dev"]).with_max_concurrent_tasks(10)],
        2,
        5_000,
    );

    let peak = hammer(&dispatcher, 20).await;

    assert!(peak <= 2, "peak in flight was {peak}");
    assert_eq!(dispatcher.dispatched(), 20);
    assert!(dispatcher.conflicts() > 0);
    assert_eq!(dispatcher.available_permits(), 2);
    assert_eq!(dispatcher.registry().in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_agent_never_exceeds_its_capacity() {
    let dispatcher = dispatcher(
        vec![Agent::new("solo", ["dev"]).with_max_concurrent_tasks(2)],
        32,
        5_000,
    );

    let peak = hammer(&dispatcher, 24).await;

    assert!(peak <= 2, "peak in flight was {peak}");
    let agent = dispatcher.registry().get("solo").unwrap();
    assert_eq!(agent.performance.tasks_completed, 24);
    assert!(agent.current_task_ids.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_capacity_bounds_in_flight_tasks() {
    let dispatcher = dispatcher(
        vec![
            Agent::new("a", ["dev"]).with_max_concurrent_tasks(1),
            Agent::new("b", ["dev"]).with_max_concurrent_tasks(1),
        ],
        16,
        5_000,
    );

    let peak = hammer(&dispatcher, 12).await;

    assert!(peak <= 2, "peak in flight was {peak}");
    assert_eq!(dispatcher.dispatched(), 12);
    let completed: u64 = dispatcher
        .registry()
        .list()
        .iter()
        .map(|a| a.performance.tasks_completed)
        .sum();
    assert_eq!(completed, 12);
}

#[tokio::test]
async fn test_acquire_times_out_when_capacity_never_frees() {
    let dispatcher = dispatcher(vec![Agent::new("solo", ["dev"])], 4, 30);

    let held = dispatcher.acquire("dev", "long").await.unwrap();
    let err = dispatcher.acquire("dev", "blocked").await.unwrap_err();
    assert!(matches!(err, OrchestrationError::AgentTimeout { .. }));

    drop(held);
    let lease = dispatcher.acquire("dev", "after").await.unwrap();
    assert_eq!(lease.agent_id(), "solo");
}

#[tokio::test]
async fn test_unserviceable_capability_fails_without_waiting() {
    let dispatcher = dispatcher(vec![Agent::new("solo", ["dev"])], 4, 5_000);

    let started = std::time::Instant::now();
    let err = dispatcher.acquire("ops", "deploy").await.unwrap_err();

    assert!(matches!(err, OrchestrationError::AgentUnavailable { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
}
