//! Immutable registry of workflow definitions, keyed by id and version.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use semver::Version;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::errors::{DomainResult, OrchestrationError};
use crate::domain::models::{
    DependencyTarget, ExecutionMode, InnerMode, TaskDependencyKind, WorkflowDefinition,
};
use crate::services::dependency_resolver::{producers, DependencyResolver};

/// Listing entry for a registered workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowSummary {
    pub id: String,
    pub name: String,
    pub version: Version,
    pub phases: usize,
    pub tasks: usize,
}

type Versions = BTreeMap<Version, Arc<WorkflowDefinition>>;

/// Registered definitions. Once inserted a definition is never mutated.
#[derive(Debug, Default)]
pub struct WorkflowCatalog {
    workflows: RwLock<HashMap<String, Versions>>,
    resolver: DependencyResolver,
}

fn invalid(reason: impl Into<String>) -> OrchestrationError {
    OrchestrationError::InvalidDefinition(reason.into())
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and register a definition.
    pub fn register(&self, definition: WorkflowDefinition) -> DomainResult<Arc<WorkflowDefinition>> {
        self.validate(&definition)?;

        let mut workflows = self
            .workflows
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let versions = workflows.entry(definition.id.clone()).or_default();
        if versions.contains_key(&definition.version) {
            return Err(OrchestrationError::DuplicateWorkflow {
                id: definition.id.clone(),
                version: definition.version.to_string(),
            });
        }

        info!(
            workflow_id = %definition.id,
            version = %definition.version,
            phases = definition.phases.len(),
            "workflow registered"
        );
        let definition = Arc::new(definition);
        versions.insert(definition.version.clone(), Arc::clone(&definition));
        Ok(definition)
    }

    /// Highest registered version of a workflow.
    pub fn get(&self, id: &str) -> DomainResult<Arc<WorkflowDefinition>> {
        let workflows = self
            .workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        workflows
            .get(id)
            .and_then(|versions| versions.values().next_back())
            .cloned()
            .ok_or_else(|| OrchestrationError::WorkflowNotFound(id.to_string()))
    }

    pub fn get_version(&self, id: &str, version: &Version) -> DomainResult<Arc<WorkflowDefinition>> {
        let workflows = self
            .workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        workflows
            .get(id)
            .and_then(|versions| versions.get(version))
            .cloned()
            .ok_or_else(|| OrchestrationError::WorkflowNotFound(format!("{id}@{version}")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_ok()
    }

    /// Every registered version, sorted by id then version.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        let workflows = self
            .workflows
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut summaries: Vec<WorkflowSummary> = workflows
            .values()
            .flat_map(|versions| versions.values())
            .map(|def| WorkflowSummary {
                id: def.id.clone(),
                name: def.name.clone(),
                version: def.version.clone(),
                phases: def.phases.len(),
                tasks: def.tasks().count(),
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.version.cmp(&b.version)));
        summaries
    }

    /// Parse a YAML or JSON definition file without registering it.
    pub fn parse_file(path: &Path) -> DomainResult<WorkflowDefinition> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            OrchestrationError::InvalidDefinition(format!("cannot read {}: {e}", path.display()))
        })?;
        WorkflowDefinition::from_yaml(&source)
    }

    /// Register every `*.yaml`, `*.yml` and `*.json` file in a directory.
    pub fn load_dir(&self, dir: &Path) -> DomainResult<usize> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            OrchestrationError::InvalidDefinition(format!("cannot read {}: {e}", dir.display()))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml" | "json")
                )
            })
            .collect();
        paths.sort();

        for path in &paths {
            debug!(path = %path.display(), "loading workflow definition");
            self.register(Self::parse_file(path)?)?;
        }
        Ok(paths.len())
    }

    /// Structural validation followed by cycle detection.
    pub fn validate(&self, definition: &WorkflowDefinition) -> DomainResult<()> {
        validate_structure(definition)?;
        self.resolver.validate_definition(definition)?;
        validate_ordering(definition, &self.resolver)
    }
}

fn validate_structure(definition: &WorkflowDefinition) -> DomainResult<()> {
    if definition.id.trim().is_empty() {
        return Err(invalid("workflow id must not be empty"));
    }
    if definition.phases.is_empty() {
        return Err(invalid(format!("workflow {} declares no phases", definition.id)));
    }
    if definition.recovery.alternative_workflow.as_deref() == Some(definition.id.as_str()) {
        return Err(invalid("alternative workflow must differ from the workflow itself"));
    }

    let mut phase_ids = HashSet::new();
    let mut task_ids = HashSet::new();
    let mut checkpoint_ids = HashSet::new();
    for phase in &definition.phases {
        if !phase_ids.insert(phase.id.as_str()) {
            return Err(invalid(format!("duplicate phase id '{}'", phase.id)));
        }
        for task in &phase.tasks {
            if !task_ids.insert(task.id.as_str()) {
                return Err(invalid(format!("duplicate task id '{}'", task.id)));
            }
            if task.capability.trim().is_empty() {
                return Err(invalid(format!("task '{}' has no capability", task.id)));
            }
        }
        for checkpoint in &phase.checkpoints {
            if !checkpoint_ids.insert(checkpoint.id.as_str()) {
                return Err(invalid(format!("duplicate checkpoint id '{}'", checkpoint.id)));
            }
        }
        match &phase.mode {
            ExecutionMode::Loop { max_iterations, .. } if *max_iterations == 0 => {
                return Err(invalid(format!(
                    "loop phase '{}' needs max_iterations >= 1",
                    phase.id
                )));
            }
            ExecutionMode::Conditional { condition, .. } if condition.trim().is_empty() => {
                return Err(invalid(format!("conditional phase '{}' has no condition", phase.id)));
            }
            _ => {}
        }
    }

    for phase in &definition.phases {
        for dependency in &phase.dependencies {
            if dependency.phase == phase.id {
                return Err(invalid(format!("phase '{}' depends on itself", phase.id)));
            }
            if !phase_ids.contains(dependency.phase.as_str()) {
                return Err(invalid(format!(
                    "phase '{}' depends on unknown phase '{}'",
                    phase.id, dependency.phase
                )));
            }
            dependency.completion()?;
        }
    }

    for edge in &definition.dependencies {
        if !phase_ids.contains(edge.from.as_str()) || !phase_ids.contains(edge.to.as_str()) {
            return Err(invalid(format!(
                "workflow dependency {} -> {} references an unknown phase",
                edge.from, edge.to
            )));
        }
        if edge.from == edge.to {
            return Err(invalid(format!("phase '{}' depends on itself", edge.from)));
        }
    }

    for constraint in &definition.constraints {
        if constraint.value < 0.0 || constraint.value.is_nan() {
            return Err(invalid(format!(
                "{} constraint value must be non-negative",
                constraint.kind
            )));
        }
    }

    for task in definition.tasks() {
        for dependency in &task.dependencies {
            if let TaskDependencyKind::Partial { threshold } = dependency.kind {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(invalid(format!(
                        "task '{}' partial threshold {threshold} is outside [0, 1]",
                        task.id
                    )));
                }
            }
            if let DependencyTarget::Task(id) = &dependency.on {
                if id == &task.id {
                    return Err(invalid(format!("task '{}' depends on itself", task.id)));
                }
            }
            if producers(definition, &dependency.on, &task.id).is_empty() {
                return Err(invalid(format!(
                    "task '{}' depends on unknown target {:?}",
                    task.id, dependency.on
                )));
            }
        }
    }

    Ok(())
}

/// Task dependencies must point at the same phase or one that runs earlier;
/// inside sequential phases only at tasks ordered earlier.
fn validate_ordering(definition: &WorkflowDefinition, resolver: &DependencyResolver) -> DomainResult<()> {
    let order = resolver.phase_order(definition)?;
    let phase_position: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    for phase in &definition.phases {
        let consumer_position = phase_position.get(phase.id.as_str()).copied().unwrap_or(0);
        let sequence: HashMap<&str, usize> = phase
            .ordered_tasks()
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();

        for task in &phase.tasks {
            for dependency in &task.dependencies {
                for producer in producers(definition, &dependency.on, &task.id) {
                    let Some((producer_phase, _)) = definition.task(&producer.id) else {
                        continue;
                    };
                    let producer_position = phase_position
                        .get(producer_phase.id.as_str())
                        .copied()
                        .unwrap_or(usize::MAX);

                    if producer_position > consumer_position {
                        return Err(invalid(format!(
                            "task '{}' depends on '{}' in later phase '{}'",
                            task.id, producer.id, producer_phase.id
                        )));
                    }

                    let sequential = phase.mode.inner() == InnerMode::Sequential;
                    if producer_phase.id == phase.id
                        && sequential
                        && sequence.get(producer.id.as_str()) > sequence.get(task.id.as_str())
                    {
                        return Err(invalid(format!(
                            "sequential task '{}' depends on '{}' which starts after it",
                            task.id, producer.id
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Phase, PhaseDependency, Task, TaskDependency};

    fn simple(id: &str, version: Version) -> WorkflowDefinition {
        WorkflowDefinition::new(id)
            .with_version(version)
            .with_phase(Phase::new("p1", ExecutionMode::Sequential).with_task(Task::new("t1", "design")))
    }

    #[test]
    fn test_register_and_get_highest_version() {
        let catalog = WorkflowCatalog::new();
        catalog.register(simple("site", Version::new(1, 0, 0))).unwrap();
        catalog.register(simple("site", Version::new(1, 2, 0))).unwrap();
        catalog.register(simple("site", Version::new(1, 1, 5))).unwrap();

        assert_eq!(catalog.get("site").unwrap().version, Version::new(1, 2, 0));
        assert_eq!(
            catalog
                .get_version("site", &Version::new(1, 1, 5))
                .unwrap()
                .version,
            Version::new(1, 1, 5)
        );
        assert_eq!(catalog.list().len(), 3);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let catalog = WorkflowCatalog::new();
        catalog.register(simple("site", Version::new(1, 0, 0))).unwrap();
        let err = catalog
            .register(simple("site", Version::new(1, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::DuplicateWorkflow { .. }));
    }

    #[test]
    fn test_unknown_workflow() {
        let catalog = WorkflowCatalog::new();
        assert!(matches!(
            catalog.get("missing"),
            Err(OrchestrationError::WorkflowNotFound(_))
        ));
    }

    #[test]
    fn test_rejects_cycles_before_insertion() {
        let catalog = WorkflowCatalog::new();
        let def = WorkflowDefinition::new("loop")
            .with_phase(Phase::new("a", ExecutionMode::Sequential).depends_on(PhaseDependency::on("b")))
            .with_phase(Phase::new("b", ExecutionMode::Sequential).depends_on(PhaseDependency::on("a")));
        assert!(matches!(
            catalog.register(def),
            Err(OrchestrationError::CyclicDependency(_))
        ));
        assert!(!catalog.contains("loop"));
    }

    #[test]
    fn test_rejects_dependency_on_later_phase() {
        let def = WorkflowDefinition::new("wf")
            .with_phase(
                Phase::new("p1", ExecutionMode::Parallel)
                    .with_task(Task::new("a", "dev").depends_on(TaskDependency::output("b"))),
            )
            .with_phase(
                Phase::new("p2", ExecutionMode::Parallel)
                    .with_task(Task::new("b", "dev"))
                    .depends_on(PhaseDependency::on("p1")),
            );
        let err = WorkflowCatalog::new().validate(&def).unwrap_err();
        assert!(err.to_string().contains("later phase"));
    }

    #[test]
    fn test_rejects_sequential_dependency_on_later_task() {
        let def = WorkflowDefinition::new("wf").with_phase(
            Phase::new("p1", ExecutionMode::Sequential)
                .with_task(
                    Task::new("first", "dev")
                        .with_priority(1)
                        .depends_on(TaskDependency::output("second")),
                )
                .with_task(Task::new("second", "dev").with_priority(2)),
        );
        assert!(WorkflowCatalog::new().validate(&def).is_err());
    }

    #[test]
    fn test_rejects_bad_threshold_and_zero_loop() {
        let bad_threshold = WorkflowDefinition::new("wf").with_phase(
            Phase::new("p", ExecutionMode::Parallel)
                .with_task(Task::new("a", "dev"))
                .with_task(Task::new("b", "dev").depends_on(TaskDependency::partial("a", 1.5))),
        );
        assert!(WorkflowCatalog::new().validate(&bad_threshold).is_err());

        let zero_loop = WorkflowDefinition::new("wf").with_phase(
            Phase::new(
                "p",
                ExecutionMode::Loop {
                    until: "always".to_string(),
                    max_iterations: 0,
                    inner: InnerMode::Sequential,
                },
            )
            .with_task(Task::new("a", "dev")),
        );
        assert!(WorkflowCatalog::new().validate(&zero_loop).is_err());
    }

    #[test]
    fn test_load_dir_registers_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.yaml"),
            "id: alpha\nphases:\n  - id: p\n    tasks:\n      - id: t\n        capability: design\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.json"),
            r#"{"id":"beta","phases":[{"id":"p","tasks":[{"id":"t","capability":"qa"}]}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let catalog = WorkflowCatalog::new();
        assert_eq!(catalog.load_dir(dir.path()).unwrap(), 2);
        assert!(catalog.contains("alpha"));
        assert!(catalog.contains("beta"));
    }
}
