//! SLA and workflow-constraint monitoring.
//!
//! Evaluation is pure: the monitor reads an execution snapshot and reports.
//! [`SlaMonitor::record`] folds a report into the execution's performance
//! block, charging each penalty at most once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::{
    Bottleneck, ConstraintKind, Enforcement, SlaMetric, WorkflowDefinition, WorkflowExecution,
};

/// Configuration for the SLA monitor.
#[derive(Debug, Clone)]
pub struct SlaMonitorConfig {
    /// A task is a bottleneck when its duration exceeds its estimate by this factor.
    pub bottleneck_factor: f64,
}

impl Default for SlaMonitorConfig {
    fn default() -> Self {
        Self {
            bottleneck_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaViolation {
    pub metric: SlaMetric,
    pub actual: f64,
    pub threshold: f64,
}

impl std::fmt::Display for SlaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: actual {:.2}, threshold {:.2}",
            self.metric, self.actual, self.threshold
        )
    }
}

/// Outcome of one SLA evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlaReport {
    /// Share of evaluated thresholds currently met (1.0 when none apply).
    pub compliance: f64,
    pub violations: Vec<SlaViolation>,
    pub met: Vec<SlaMetric>,
}

/// A workflow constraint found violated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintBreach {
    pub constraint: ConstraintKind,
    pub enforcement: Enforcement,
    pub actual: f64,
    pub limit: f64,
}

impl ConstraintBreach {
    pub fn detail(&self) -> String {
        format!(
            "{} constraint violated: actual {:.2}, limit {:.2}",
            self.constraint, self.actual, self.limit
        )
    }

    pub const fn is_fatal(&self) -> bool {
        matches!(self.enforcement, Enforcement::Strict)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SlaMonitor {
    config: SlaMonitorConfig,
}

impl SlaMonitor {
    pub const fn new(config: SlaMonitorConfig) -> Self {
        Self { config }
    }

    /// Check the workflow SLA thresholds against the execution as of `now`.
    pub fn evaluate(
        &self,
        definition: &WorkflowDefinition,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> SlaReport {
        let sla = &definition.sla;
        let perf = &execution.performance;
        let attempts = perf.tasks_succeeded + perf.tasks_failed;

        let mut checks: Vec<(SlaMetric, f64, f64, bool)> = Vec::new();

        if let Some(max) = sla.performance.max_duration_ms {
            let elapsed = execution.elapsed(now).as_millis() as f64;
            checks.push((SlaMetric::Duration, elapsed, max as f64, elapsed <= max as f64));
        }
        if let Some(min) = sla.performance.min_quality {
            if perf.tasks_succeeded > 0 {
                let quality = perf.average_quality;
                checks.push((SlaMetric::Quality, quality, min, quality >= min));
            }
        }
        if let Some(min) = sla.performance.min_success_rate {
            if attempts > 0 {
                let rate = perf.success_rate;
                checks.push((SlaMetric::SuccessRate, rate, min, rate >= min));
            }
        }
        if let Some(max) = sla.business.max_cost {
            let cost = execution.resources.total_cost;
            checks.push((SlaMetric::Cost, cost, max, cost <= max));
        }

        let total = checks.len();
        let mut report = SlaReport {
            compliance: 1.0,
            ..SlaReport::default()
        };
        for (metric, actual, threshold, ok) in checks {
            if ok {
                report.met.push(metric);
            } else {
                report.violations.push(SlaViolation {
                    metric,
                    actual,
                    threshold,
                });
            }
        }
        if total > 0 {
            report.compliance = report.met.len() as f64 / total as f64;
        }
        report
    }

    /// Fold a report into the execution. Returns violations not seen before;
    /// their penalties are charged now. Rewards are granted only when
    /// `completed` is set.
    pub fn record(
        &self,
        definition: &WorkflowDefinition,
        execution: &mut WorkflowExecution,
        report: &SlaReport,
        completed: bool,
    ) -> Vec<SlaViolation> {
        let perf = &mut execution.performance;
        perf.sla_compliance = report.compliance;

        let mut fresh = Vec::new();
        for violation in &report.violations {
            let key = format!("{}:", violation.metric);
            if perf.sla_violations.iter().any(|v| v.starts_with(&key)) {
                continue;
            }
            perf.sla_violations.push(violation.to_string());
            perf.penalties += definition
                .sla
                .penalties
                .iter()
                .filter(|p| p.metric == violation.metric)
                .map(|p| p.amount)
                .sum::<f64>();
            fresh.push(violation.clone());
        }

        if completed {
            let violated = |metric: SlaMetric| {
                let key = format!("{metric}:");
                perf.sla_violations.iter().any(|v| v.starts_with(&key))
            };
            let rewards: f64 = definition
                .sla
                .rewards
                .iter()
                .filter(|r| report.met.contains(&r.metric) && !violated(r.metric))
                .map(|r| r.amount)
                .sum();
            perf.rewards += rewards;
        }

        fresh
    }

    /// Workflow constraints currently violated.
    pub fn check_constraints(
        &self,
        definition: &WorkflowDefinition,
        execution: &WorkflowExecution,
        now: DateTime<Utc>,
    ) -> Vec<ConstraintBreach> {
        definition
            .constraints
            .iter()
            .filter_map(|constraint| {
                let limit = constraint.value;
                let (actual, violated) = match constraint.kind {
                    ConstraintKind::Time => {
                        let elapsed = execution.elapsed(now).as_millis() as f64;
                        (elapsed, elapsed > limit)
                    }
                    ConstraintKind::Resource => {
                        let peak = execution.resources.peak_in_flight as f64;
                        (peak, peak > limit)
                    }
                    ConstraintKind::Cost => {
                        let cost = execution.resources.total_cost;
                        (cost, cost > limit)
                    }
                    ConstraintKind::Quality => {
                        let quality = execution.performance.average_quality;
                        (
                            quality,
                            execution.performance.tasks_succeeded > 0 && quality < limit,
                        )
                    }
                    ConstraintKind::Compliance => {
                        let compliance = execution.performance.sla_compliance;
                        (compliance, compliance < limit)
                    }
                };
                violated.then_some(ConstraintBreach {
                    constraint: constraint.kind,
                    enforcement: constraint.enforcement,
                    actual,
                    limit,
                })
            })
            .collect()
    }

    /// Finished tasks that ran well past their estimate.
    pub fn bottlenecks(
        &self,
        definition: &WorkflowDefinition,
        execution: &WorkflowExecution,
    ) -> Vec<Bottleneck> {
        definition
            .tasks()
            .filter(|task| task.estimated_duration_ms > 0)
            .filter_map(|task| {
                let state = execution.task_state(&task.id)?;
                let actual = state.metrics.duration_ms;
                let limit = task.estimated_duration_ms as f64 * self.config.bottleneck_factor;
                (state.status.is_success() && actual as f64 > limit).then(|| Bottleneck {
                    task_id: task.id.clone(),
                    estimated_ms: task.estimated_duration_ms,
                    actual_ms: actual,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::domain::models::{
        ExecutionMode, ExecutionOptions, Phase, SlaAdjustment, Task, TaskStatus,
        WorkflowConstraint, WorkflowSla,
    };

    fn definition() -> WorkflowDefinition {
        let mut sla = WorkflowSla::default();
        sla.performance.min_quality = Some(0.8);
        sla.business.max_cost = Some(100.0);
        sla.penalties.push(SlaAdjustment {
            metric: SlaMetric::Quality,
            amount: 50.0,
        });
        sla.rewards.push(SlaAdjustment {
            metric: SlaMetric::Cost,
            amount: 10.0,
        });
        WorkflowDefinition::new("wf")
            .with_phase(
                Phase::new("p", ExecutionMode::Parallel)
                    .with_task(Task::new("slow", "dev").with_estimated_duration_ms(100))
                    .with_task(Task::new("fast", "dev").with_estimated_duration_ms(100)),
            )
            .with_sla(sla)
            .with_constraint(WorkflowConstraint::new(
                ConstraintKind::Cost,
                20.0,
                Enforcement::Strict,
            ))
            .with_constraint(WorkflowConstraint::new(
                ConstraintKind::Resource,
                4.0,
                Enforcement::Advisory,
            ))
    }

    #[test]
    fn test_quality_violation_penalised_once() {
        let def = definition();
        let monitor = SlaMonitor::default();
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        exec.performance.record_attempt(true, 10, Some(0.5));

        let report = monitor.evaluate(&def, &exec, Utc::now());
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].metric, SlaMetric::Quality);
        assert!((report.compliance - 0.5).abs() < f64::EPSILON);

        let fresh = monitor.record(&def, &mut exec, &report, false);
        assert_eq!(fresh.len(), 1);
        assert!(monitor.record(&def, &mut exec, &report, false).is_empty());
        assert!((exec.performance.penalties - 50.0).abs() < f64::EPSILON);

        monitor.record(&def, &mut exec, &report, true);
        assert!((exec.performance.rewards - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_checks_means_full_compliance() {
        let def = WorkflowDefinition::new("plain");
        let exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        let report = SlaMonitor::default().evaluate(&def, &exec, Utc::now());
        assert!((report.compliance - 1.0).abs() < f64::EPSILON);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn test_constraint_breaches_by_enforcement() {
        let def = definition();
        let monitor = SlaMonitor::default();
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        assert!(monitor.check_constraints(&def, &exec, Utc::now()).is_empty());

        exec.resources.total_cost = 25.0;
        exec.resources.peak_in_flight = 6;
        let breaches = monitor.check_constraints(&def, &exec, Utc::now());
        assert_eq!(breaches.len(), 2);
        assert!(breaches[0].is_fatal());
        assert_eq!(breaches[1].constraint, ConstraintKind::Resource);
        assert!(!breaches[1].is_fatal());
    }

    #[test]
    fn test_bottleneck_detection() {
        let def = definition();
        let mut exec = WorkflowExecution::new(&def, HashMap::new(), ExecutionOptions::default());
        for (id, duration) in [("slow", 400), ("fast", 120)] {
            let state = exec.task_state_mut(id);
            state.status = TaskStatus::Completed;
            state.metrics.duration_ms = duration;
        }
        let bottlenecks = SlaMonitor::default().bottlenecks(&def, &exec);
        assert_eq!(bottlenecks.len(), 1);
        assert_eq!(bottlenecks[0].task_id, "slow");
    }
}
