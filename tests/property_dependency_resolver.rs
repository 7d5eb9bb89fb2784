//! Property-based tests for dependency resolution and retry backoff
//!
//! Tests the following properties:
//! 1. Acyclic graphs validate and every phase runs after its dependencies
//! 2. A dependency ring is always rejected with the cycle path
//! 3. Exponential backoff strictly grows until it reaches the cap
//! 4. Generated acyclic workflows run to completion in dependency order

use std::collections::HashMap;

use conductor::domain::models::{
    BackoffStrategy, ExecutionMode, ExecutionOptions, ExecutionStatus, Phase, PhaseDependency,
    RetryPolicy, Task, WorkflowDefinition,
};
use conductor::services::{DependencyResolver, WorkflowCatalog};
use conductor::OrchestrationError;
use proptest::prelude::*;

mod common;

/// Random DAG over `p0..pN`: phase `i` may depend on any `j < i`, declared in
/// shuffled order.
fn acyclic_workflow_strategy() -> impl Strategy<Value = WorkflowDefinition> {
    (1usize..8)
        .prop_flat_map(|n| {
            let edges = prop::collection::vec(prop::collection::vec(any::<bool>(), n), n);
            let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            (edges, order)
        })
        .prop_map(|(edges, order)| {
            order.iter().fold(WorkflowDefinition::new("generated"), |definition, &i| {
                let phase = (0..i).filter(|&j| edges[i][j]).fold(
                    Phase::new(format!("p{i}"), ExecutionMode::Sequential)
                        .with_task(Task::new(format!("t{i}"), "dev")),
                    |phase, j| phase.depends_on(PhaseDependency::on(format!("p{j}"))),
                );
                definition.with_phase(phase)
            })
        })
}

/// `p0 -> p1 -> ... -> pN -> p0`
fn ring(n: usize) -> WorkflowDefinition {
    (0..n).fold(WorkflowDefinition::new("ring"), |definition, i| {
        let previous = (i + n - 1) % n;
        definition.with_phase(
            Phase::new(format!("p{i}"), ExecutionMode::Sequential)
                .with_task(Task::new(format!("t{i}"), "dev"))
                .depends_on(PhaseDependency::on(format!("p{previous}"))),
        )
    })
}

fn assert_respects_dependencies(
    definition: &WorkflowDefinition,
    order: &[String],
) -> Result<(), TestCaseError> {
    let position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    prop_assert_eq!(position.len(), definition.phases.len());

    for phase in &definition.phases {
        for dependency in &phase.dependencies {
            prop_assert!(
                position[dependency.phase.as_str()] < position[phase.id.as_str()],
                "{} ran before its dependency {}",
                phase.id,
                dependency.phase
            );
        }
    }
    Ok(())
}

proptest! {
    /// Property 1: acyclic definitions validate and order respects every edge
    #[test]
    fn proptest_acyclic_order_respects_dependencies(definition in acyclic_workflow_strategy()) {
        prop_assert!(WorkflowCatalog::new().validate(&definition).is_ok());

        let order = DependencyResolver::new().phase_order(&definition).unwrap();
        assert_respects_dependencies(&definition, &order)?;
    }

    /// Property 2: rings of two or more phases are rejected
    #[test]
    fn proptest_ring_is_rejected(n in 2usize..10) {
        let err = WorkflowCatalog::new().validate(&ring(n)).unwrap_err();
        match err {
            OrchestrationError::CyclicDependency(path) => prop_assert!(!path.is_empty()),
            other => prop_assert!(false, "expected a cycle error, got {other:?}"),
        }
    }

    /// Property 3: exponential delays grow strictly below the cap and never exceed it
    #[test]
    fn proptest_exponential_backoff_is_monotonic(base in 1u64..2_000, max_delay_ms in 1u64..120_000) {
        let policy = RetryPolicy {
            max_delay_ms,
            ..RetryPolicy::new(5, BackoffStrategy::Exponential, base)
        };

        let mut previous = policy.delay(1);
        for attempt in 2..70 {
            let delay = policy.delay(attempt);
            prop_assert!(delay.as_millis() <= u128::from(max_delay_ms));
            if previous.as_millis() < u128::from(max_delay_ms) {
                prop_assert!(delay > previous);
            } else {
                prop_assert_eq!(delay, previous);
            }
            previous = delay;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Property 4: generated workflows complete with phases in dependency order
    #[test]
    fn proptest_generated_workflows_complete(definition in acyclic_workflow_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let execution = runtime.block_on(async {
            let executor = common::simulated(1);
            let orch = common::orchestrator(common::fleet_config(&["dev"], 2), &executor);
            orch.register_workflow(definition.clone()).unwrap();
            let id = orch
                .execute_workflow("generated", HashMap::new(), ExecutionOptions::default())
                .unwrap();
            common::finish(&orch, id).await
        });

        prop_assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_respects_dependencies(&definition, &execution.progress.completed_phases)?;
    }
}
