//! Built-in condition evaluator.
//!
//! Grammar, whitespace-insensitive:
//! - `always` / `true`, `never` / `false`
//! - `iteration <op> N` with `<op>` one of `>=`, `>`, `<=`, `<`, `==`, `!=`
//! - `task.output` (truthiness of a task output, or `inputs.name`)
//! - `task.output == literal` / `task.output != literal`, where the literal
//!   is parsed as JSON and falls back to a bare string
//! - a leading `!` negates the whole expression

use anyhow::{anyhow, bail, Context};
use serde_json::Value;

use crate::domain::ports::{is_truthy, ConditionContext, ConditionEvaluator};

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConditionEvaluator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
    Ne,
}

impl Op {
    /// Two-character operators first so `>=` is not read as `>`.
    const ALL: [(&'static str, Self); 6] = [
        (">=", Self::Ge),
        ("<=", Self::Le),
        ("==", Self::Eq),
        ("!=", Self::Ne),
        (">", Self::Gt),
        ("<", Self::Lt),
    ];

    fn split(expr: &str) -> Option<(&str, Self, &str)> {
        Self::ALL.iter().find_map(|(token, op)| {
            expr.split_once(token)
                .map(|(lhs, rhs)| (lhs.trim(), *op, rhs.trim()))
        })
    }

    fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
            Self::Lt => lhs < rhs,
            Self::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Self::Ne => (lhs - rhs).abs() >= f64::EPSILON,
        }
    }
}

fn parse_literal(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.trim_matches('\'').to_string()))
}

fn reference<'a>(expr: &'a str) -> anyhow::Result<(&'a str, &'a str)> {
    expr.split_once('.')
        .filter(|(task, output)| !task.is_empty() && !output.is_empty())
        .ok_or_else(|| anyhow!("expected 'task.output', got '{expr}'"))
}

impl ConditionEvaluator for OutputConditionEvaluator {
    fn evaluate(&self, condition: &str, context: &ConditionContext<'_>) -> anyhow::Result<bool> {
        let expr = condition.trim();
        if let Some(inner) = expr.strip_prefix('!').filter(|rest| !rest.starts_with('=')) {
            return self.evaluate(inner, context).map(|v| !v);
        }

        match expr.to_ascii_lowercase().as_str() {
            "" => bail!("empty condition"),
            "always" | "true" => return Ok(true),
            "never" | "false" => return Ok(false),
            _ => {}
        }

        let Some((lhs, op, rhs)) = Op::split(expr) else {
            let (task, output) = reference(expr)?;
            return Ok(context.lookup(task, output).is_some_and(is_truthy));
        };

        if lhs == "iteration" {
            let bound: f64 = rhs
                .parse()
                .with_context(|| format!("invalid iteration bound '{rhs}'"))?;
            return Ok(op.compare(f64::from(context.iteration), bound));
        }

        let (task, output) = reference(lhs)?;
        let Some(actual) = context.lookup(task, output) else {
            return Ok(op == Op::Ne);
        };
        let expected = parse_literal(rhs);

        match (op, actual.as_f64(), expected.as_f64()) {
            (Op::Eq, _, _) => Ok(*actual == expected),
            (Op::Ne, _, _) => Ok(*actual != expected),
            (op, Some(lhs), Some(rhs)) => Ok(op.compare(lhs, rhs)),
            _ => bail!("'{condition}' compares non-numeric values"),
        }
    }
}
