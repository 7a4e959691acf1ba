//! Condition trees: sources, operators, and value references.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single condition. Conditions in a rule combine with logical AND.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub source: ConditionSource,
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ConditionValue>,
}

/// Where the left-hand value of a condition comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ConditionSource {
    /// A field of the triggering event (`data.total`, `topic`, ...).
    Event { field: String },
    /// The first fact whose key matches the pattern.
    Fact { pattern: String },
    /// A key in the evaluation context map (temporal aliases, catch bindings).
    Context { key: String },
    /// A metric checked against an external baseline provider.
    Baseline {
        metric: String,
        comparison: BaselineComparison,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sensitivity: Option<f64>,
    },
}

/// Direction of a baseline deviation check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaselineComparison {
    Above,
    Below,
    Deviates,
}

/// Comparison operator applied between the resolved source and value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    Matches,
    Exists,
    NotExists,
}

impl Operator {
    /// Operators that compare against a right-hand value.
    pub fn needs_value(&self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::Matches => "matches",
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
        }
    }
}

/// The right-hand side of a condition: a literal or a runtime reference.
///
/// `{ "ref": "event.data.x" }` resolves at evaluation time. A literal object
/// whose only key is `ref` cannot round-trip as data; documented limitation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionValue {
    Ref(RefValue),
    Literal(Value),
}

/// A runtime reference into the evaluation context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RefValue {
    #[serde(rename = "ref")]
    pub path: String,
}

impl ConditionValue {
    /// Shorthand for a literal value.
    pub fn literal(v: impl Into<Value>) -> Self {
        ConditionValue::Literal(v.into())
    }

    /// Shorthand for a runtime reference.
    pub fn reference(path: impl Into<String>) -> Self {
        ConditionValue::Ref(RefValue { path: path.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_literal_value() {
        let c: Condition = serde_json::from_value(json!({
            "source": {"type": "event", "field": "data.total"},
            "operator": "gte",
            "value": 100
        }))
        .unwrap();
        assert_eq!(c.operator, Operator::Gte);
        assert_eq!(c.value, Some(ConditionValue::literal(100)));
    }

    #[test]
    fn deserializes_ref_value() {
        let c: Condition = serde_json::from_value(json!({
            "source": {"type": "fact", "pattern": "customer:*:tier"},
            "operator": "eq",
            "value": {"ref": "event.data.tier"}
        }))
        .unwrap();
        assert_eq!(c.value, Some(ConditionValue::reference("event.data.tier")));
    }

    #[test]
    fn exists_needs_no_value() {
        let c: Condition = serde_json::from_value(json!({
            "source": {"type": "context", "key": "payment"},
            "operator": "exists"
        }))
        .unwrap();
        assert!(c.value.is_none());
        assert!(!c.operator.needs_value());
    }

    #[test]
    fn unknown_fields_rejected() {
        let r: Result<Condition, _> = serde_json::from_value(json!({
            "source": {"type": "event", "field": "x"},
            "operator": "eq",
            "value": 1,
            "bogus": true
        }));
        assert!(r.is_err());
    }

    #[test]
    fn baseline_source_roundtrips() {
        let c: ConditionSource = serde_json::from_value(json!({
            "type": "baseline",
            "metric": "checkout_latency",
            "comparison": "above",
            "sensitivity": 2.5
        }))
        .unwrap();
        match &c {
            ConditionSource::Baseline { metric, sensitivity, .. } => {
                assert_eq!(metric, "checkout_latency");
                assert_eq!(*sensitivity, Some(2.5));
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }
}
