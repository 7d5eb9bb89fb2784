use std::collections::HashMap;

use serde_json::Value;

use crate::domain::models::WorkflowExecution;

/// Read-only view a condition is evaluated against.
#[derive(Debug)]
pub struct ConditionContext<'a> {
    pub execution: &'a WorkflowExecution,
    /// Loop iteration just finished (0 outside loops)
    pub iteration: u32,
}

impl ConditionContext<'_> {
    /// Output of a task, or an execution input when `task_id` is `inputs`.
    pub fn lookup(&self, task_id: &str, output: &str) -> Option<&Value> {
        self.execution
            .task_state(task_id)
            .and_then(|s| s.outputs.get(output))
            .or_else(|| {
                (task_id == "inputs")
                    .then(|| self.execution.inputs.get(output))
                    .flatten()
            })
    }

    pub fn inputs(&self) -> &HashMap<String, Value> {
        &self.execution.inputs
    }
}

/// Evaluates named conditions for conditional phases, loop exits and
/// checkpoint gates. Business rules are injected through this seam.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, condition: &str, context: &ConditionContext<'_>) -> anyhow::Result<bool>;
}

/// Truthiness of an output value: `null`, `false`, `0`, `""`, `[]` and `{}`
/// are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
