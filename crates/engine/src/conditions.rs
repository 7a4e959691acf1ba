//! Pure condition evaluation against an evaluation context.
//!
//! Missing source paths resolve to absent; numeric operators coerce both
//! sides to f64 and fail (not error) on type mismatch. Only `matches` with
//! an invalid regex and baseline checks without a provider report errors,
//! which the pipeline records as trace details.

use serde_json::{Map, Value};

use reflex_core::{
    BaselineComparison, Condition, ConditionSource, ConditionValue, Operator,
};

use crate::context::EvalContext;

/// External provider resolving baseline checks to a source value
/// (commonly a boolean verdict).
pub trait BaselineProvider: Send + Sync {
    fn check(
        &self,
        metric: &str,
        comparison: BaselineComparison,
        sensitivity: Option<f64>,
    ) -> Option<Value>;
}

/// Result of evaluating one condition.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub passed: bool,
    /// Set for condition errors (invalid regex, unavailable baseline).
    pub error: Option<String>,
}

impl ConditionOutcome {
    fn pass(passed: bool) -> Self {
        Self { passed, error: None }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { passed: false, error: Some(message.into()) }
    }
}

/// Evaluate a single condition.
pub fn evaluate(
    condition: &Condition,
    ctx: &EvalContext,
    baseline: Option<&dyn BaselineProvider>,
) -> ConditionOutcome {
    let source = match &condition.source {
        ConditionSource::Event { field } => ctx.lookup(&format!("event.{}", field)),
        ConditionSource::Fact { pattern } => ctx.fact(pattern),
        ConditionSource::Context { key } => ctx.lookup(&format!("context.{}", key)),
        ConditionSource::Baseline { metric, comparison, sensitivity } => {
            match baseline {
                Some(provider) => provider.check(metric, *comparison, *sensitivity),
                None => return ConditionOutcome::error("baseline_unavailable"),
            }
        }
    };

    let value = match &condition.value {
        None => None,
        Some(ConditionValue::Ref(r)) => ctx.lookup(&r.path),
        Some(ConditionValue::Literal(v)) => Some(substitute_refs(v, ctx)),
    };

    apply_operator(condition.operator, source.as_ref(), value.as_ref())
}

/// Deep-substitute `{ "ref": path }` subtrees in a condition value.
///
/// Unlike action interpolation, plain strings are left untouched so regex
/// and literal `$` content survive.
fn substitute_refs(input: &Value, ctx: &EvalContext) -> Value {
    match input {
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute_refs(v, ctx)).collect()),
        Value::Object(map) => {
            if let Some(path) = ref_path(map) {
                return ctx.lookup(path).unwrap_or(Value::Null);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), substitute_refs(v, ctx)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn ref_path(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get("ref").and_then(|v| v.as_str())
}

fn apply_operator(
    operator: Operator,
    source: Option<&Value>,
    value: Option<&Value>,
) -> ConditionOutcome {
    match operator {
        Operator::Exists => ConditionOutcome::pass(source.is_some()),
        Operator::NotExists => ConditionOutcome::pass(source.is_none()),
        Operator::Eq => ConditionOutcome::pass(values_equal(
            source.unwrap_or(&Value::Null),
            value.unwrap_or(&Value::Null),
        )),
        Operator::Neq => ConditionOutcome::pass(!values_equal(
            source.unwrap_or(&Value::Null),
            value.unwrap_or(&Value::Null),
        )),
        Operator::Gt => numeric(source, value, |a, b| a > b),
        Operator::Gte => numeric(source, value, |a, b| a >= b),
        Operator::Lt => numeric(source, value, |a, b| a < b),
        Operator::Lte => numeric(source, value, |a, b| a <= b),
        Operator::In => ConditionOutcome::pass(in_sequence(source, value)),
        Operator::NotIn => ConditionOutcome::pass(!in_sequence(source, value)),
        Operator::Contains => ConditionOutcome::pass(contains(source, value)),
        Operator::NotContains => ConditionOutcome::pass(!contains(source, value)),
        Operator::Matches => regex_match(source, value),
    }
}

/// Equality with numeric coercion: `1` equals `1.0`.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return a.as_f64() == b.as_f64();
    }
    a == b
}

fn numeric(
    source: Option<&Value>,
    value: Option<&Value>,
    cmp: impl Fn(f64, f64) -> bool,
) -> ConditionOutcome {
    let passed = match (source.and_then(Value::as_f64), value.and_then(Value::as_f64)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    };
    ConditionOutcome::pass(passed)
}

fn in_sequence(source: Option<&Value>, value: Option<&Value>) -> bool {
    let (Some(source), Some(Value::Array(items))) = (source, value) else {
        return false;
    };
    items.iter().any(|item| values_equal(item, source))
}

fn contains(source: Option<&Value>, value: Option<&Value>) -> bool {
    let (Some(source), Some(needle)) = (source, value) else {
        return false;
    };
    match source {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
        Value::Object(map) => needle.as_str().map(|n| map.contains_key(n)).unwrap_or(false),
        _ => false,
    }
}

fn regex_match(source: Option<&Value>, value: Option<&Value>) -> ConditionOutcome {
    let Some(pattern) = value.and_then(Value::as_str) else {
        return ConditionOutcome::pass(false);
    };
    let regex = match regex::Regex::new(pattern) {
        Ok(r) => r,
        Err(e) => return ConditionOutcome::error(format!("invalid regex '{}': {}", pattern, e)),
    };
    let passed = source
        .and_then(Value::as_str)
        .map(|s| regex.is_match(s))
        .unwrap_or(false);
    ConditionOutcome::pass(passed)
}
