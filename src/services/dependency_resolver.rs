use std::collections::{HashMap, HashSet};

use crate::domain::errors::{DomainResult, OrchestrationError};
use crate::domain::models::{
    CompletionCondition, DependencyStrength, DependencyTarget, Phase, PhaseStatus, SkipReason, Task,
    TaskDependencyKind, WorkflowDefinition, WorkflowExecution,
};

/// Outcome of a readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    /// Dependencies may still be satisfied by further progress.
    Waiting,
    /// Dependencies can never be satisfied in this attempt.
    Blocked(String),
}

impl Readiness {
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Service for gating phases and tasks on their dependencies and for
/// rejecting cyclic dependency graphs
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

type Graph = HashMap<String, Vec<String>>;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: &str,
    graph: &Graph,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        for neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                // Close the loop so the path reads a -> b -> a
                if let Some(cycle_start) = path.iter().position(|id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor.clone());
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// DFS cycle detection; nodes are visited in sorted order so the reported
/// path is deterministic.
pub fn detect_cycle(graph: &Graph) -> Option<Vec<String>> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    let mut nodes: Vec<&String> = graph.keys().collect();
    nodes.sort();

    for node in nodes {
        if !visited.contains(node)
            && detect_cycle_util(node, graph, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(path);
        }
    }

    None
}

/// Phase graph: phase -> phases it depends on.
fn phase_graph(definition: &WorkflowDefinition) -> Graph {
    definition
        .phases
        .iter()
        .map(|phase| {
            let deps = definition
                .phase_dependencies(&phase.id)
                .into_iter()
                .map(|d| d.phase)
                .collect();
            (phase.id.clone(), deps)
        })
        .collect()
}

/// Every task a dependency target resolves to, excluding the dependent itself.
pub fn producers<'a>(
    definition: &'a WorkflowDefinition,
    target: &DependencyTarget,
    dependent: &str,
) -> Vec<&'a Task> {
    match target {
        DependencyTarget::Task(id) => definition
            .task(id)
            .map(|(_, task)| vec![task])
            .unwrap_or_default(),
        DependencyTarget::Branch(branch) => definition
            .tasks()
            .filter(|t| t.branch.as_deref() == Some(branch.as_str()) && t.id != dependent)
            .collect(),
    }
}

/// Task graph: task -> tasks it depends on (branch targets expanded).
fn task_graph(definition: &WorkflowDefinition) -> Graph {
    definition
        .tasks()
        .map(|task| {
            let deps = task
                .dependencies
                .iter()
                .flat_map(|d| producers(definition, &d.on, &task.id))
                .map(|t| t.id.clone())
                .collect();
            (task.id.clone(), deps)
        })
        .collect()
}

impl DependencyResolver {
    pub const fn new() -> Self {
        Self
    }

    /// Reject cyclic phase or task graphs, reporting the offending path.
    pub fn validate_definition(&self, definition: &WorkflowDefinition) -> DomainResult<()> {
        if let Some(cycle) = detect_cycle(&phase_graph(definition)) {
            return Err(OrchestrationError::CyclicDependency(cycle));
        }
        if let Some(cycle) = detect_cycle(&task_graph(definition)) {
            return Err(OrchestrationError::CyclicDependency(cycle));
        }
        Ok(())
    }

    /// Phase ids in execution order (Kahn's algorithm). Ties are broken by
    /// declaration order.
    pub fn phase_order(&self, definition: &WorkflowDefinition) -> DomainResult<Vec<String>> {
        let graph = phase_graph(definition);
        let position: HashMap<&str, usize> = definition
            .phases
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for phase in &definition.phases {
            let deps = graph.get(&phase.id).map(Vec::as_slice).unwrap_or_default();
            let known: Vec<&String> = deps
                .iter()
                .filter(|d| position.contains_key(d.as_str()))
                .collect();
            in_degree.insert(phase.id.as_str(), known.len());
            for dep in known {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(phase.id.as_str());
            }
        }

        let mut ready: Vec<&str> = definition
            .phases
            .iter()
            .map(|p| p.id.as_str())
            .filter(|id| in_degree.get(id).copied() == Some(0))
            .collect();
        let mut order = Vec::with_capacity(definition.phases.len());

        while !ready.is_empty() {
            ready.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
            let next = ready.remove(0);
            order.push(next.to_string());

            for dependent in dependents.get(next).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(*dependent);
                    }
                }
            }
        }

        if order.len() != definition.phases.len() {
            let cycle = detect_cycle(&graph).unwrap_or_default();
            return Err(OrchestrationError::CyclicDependency(cycle));
        }

        Ok(order)
    }

    /// Whether every dependency of `phase` is satisfied.
    pub fn is_phase_ready(
        &self,
        definition: &WorkflowDefinition,
        phase: &Phase,
        execution: &WorkflowExecution,
    ) -> bool {
        self.phase_readiness(definition, phase, execution).is_ready()
    }

    pub fn phase_readiness(
        &self,
        definition: &WorkflowDefinition,
        phase: &Phase,
        execution: &WorkflowExecution,
    ) -> Readiness {
        for dependency in definition.phase_dependencies(&phase.id) {
            let condition = dependency
                .completion()
                .unwrap_or(CompletionCondition::Completed);
            let state = execution.phase_state(&dependency.phase);
            let status = state.map(|s| s.status).unwrap_or_default();
            let completed = execution.is_phase_completed(&dependency.phase);

            let skip_accepted = status == PhaseStatus::Skipped
                && match condition {
                    CompletionCondition::CompletedOrSkipped => true,
                    _ => {
                        dependency.strength != DependencyStrength::Hard
                            || state.and_then(|s| s.skip_reason) == Some(SkipReason::Condition)
                    }
                };

            let satisfied = completed
                || skip_accepted
                || matches!(condition, CompletionCondition::MinProgress(min)
                    if state.is_some_and(|s| s.progress >= min));

            if satisfied {
                continue;
            }

            return match status {
                PhaseStatus::Failed | PhaseStatus::Skipped => Readiness::Blocked(format!(
                    "phase {} is {status}",
                    dependency.phase
                )),
                _ => Readiness::Waiting,
            };
        }
        Readiness::Ready
    }

    pub fn is_task_ready(
        &self,
        definition: &WorkflowDefinition,
        task: &Task,
        execution: &WorkflowExecution,
    ) -> bool {
        self.task_readiness(definition, task, execution).is_ready()
    }

    /// Output dependencies need the producer finished (completed, compensated
    /// or skipped); partial dependencies need producer progress at or above
    /// `threshold * 100`. Failed or cancelled producers block.
    pub fn task_readiness(
        &self,
        definition: &WorkflowDefinition,
        task: &Task,
        execution: &WorkflowExecution,
    ) -> Readiness {
        let mut waiting = false;

        for dependency in &task.dependencies {
            let targets = producers(definition, &dependency.on, &task.id);
            if targets.is_empty() {
                return Readiness::Blocked(format!("unknown dependency {:?}", dependency.on));
            }

            for producer in targets {
                let Some(state) = execution.task_state(&producer.id) else {
                    return Readiness::Blocked(format!("no state for task {}", producer.id));
                };

                if state.status.blocks_dependents() {
                    return Readiness::Blocked(format!(
                        "dependency {} is {}",
                        producer.id, state.status
                    ));
                }

                let satisfied = state.status.satisfies_dependents()
                    || match dependency.kind {
                        TaskDependencyKind::Output => false,
                        TaskDependencyKind::Partial { threshold } => {
                            state.progress >= threshold * 100.0
                        }
                    };

                if !satisfied {
                    waiting = true;
                }
            }
        }

        if waiting {
            Readiness::Waiting
        } else {
            Readiness::Ready
        }
    }
}
