//! Fluent builder API for authoring rules in code.
//!
//! Mirrors the JSON/YAML document shape: a rule built here is
//! indistinguishable from one parsed from a document.
//!
//! ```
//! use reflex_core::builder::{cond, RuleBuilder};
//! use reflex_core::{Action, Operator};
//! use serde_json::json;
//!
//! let rule = RuleBuilder::new("high-order", "High order")
//!     .on_event("order.created")
//!     .when(cond::event("data.total", Operator::Gte, json!(100)))
//!     .then(Action::SetFact {
//!         key: "orders:high:${event.data.id}".into(),
//!         value: json!(true),
//!     })
//!     .build()
//!     .unwrap();
//! assert_eq!(rule.id, "high-order");
//! ```

use serde_json::{Map, Value};

use crate::action::{Action, CatchBlock, LogLevel};
use crate::condition::{Condition, ConditionSource, ConditionValue, Operator};
use crate::error::EngineError;
use crate::rule::{RuleInput, Trigger};
use crate::temporal::TemporalPattern;
use crate::timer::TimerConfig;
use crate::validation::ensure_valid;

pub struct RuleBuilder {
    id: String,
    name: String,
    description: Option<String>,
    priority: i32,
    enabled: bool,
    tags: Vec<String>,
    group: Option<String>,
    trigger: Option<Trigger>,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
}

impl RuleBuilder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            priority: 0,
            enabled: true,
            tags: Vec::new(),
            group: None,
            trigger: None,
            conditions: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    // ── Triggers ─────────────────────────────────────────────────────

    /// Trigger on an event topic (literal or pattern).
    pub fn on_event(mut self, topic: impl Into<String>) -> Self {
        self.trigger = Some(Trigger::Event { topic: topic.into() });
        self
    }

    /// Trigger on fact changes matching a key pattern.
    pub fn on_fact(mut self, pattern: impl Into<String>) -> Self {
        self.trigger = Some(Trigger::Fact { pattern: pattern.into() });
        self
    }

    /// Trigger on expiry of a named timer.
    pub fn on_timer(mut self, name: impl Into<String>) -> Self {
        self.trigger = Some(Trigger::Timer { name: name.into() });
        self
    }

    /// Trigger on a temporal pattern.
    pub fn on_temporal(mut self, pattern: TemporalPattern) -> Self {
        self.trigger = Some(Trigger::Temporal { pattern });
        self
    }

    // ── Conditions & actions ─────────────────────────────────────────

    /// Add a condition (AND-combined with the others).
    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Append an action.
    pub fn then(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Append a `set_fact` action.
    pub fn set_fact(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.then(Action::SetFact { key: key.into(), value: value.into() })
    }

    /// Append an `emit_event` action.
    pub fn emit_event(self, topic: impl Into<String>, data: Map<String, Value>) -> Self {
        self.then(Action::EmitEvent { topic: topic.into(), data })
    }

    /// Append a `set_timer` action.
    pub fn set_timer(self, timer: TimerConfig) -> Self {
        self.then(Action::SetTimer { timer })
    }

    /// Append a `cancel_timer` action.
    pub fn cancel_timer(self, name: impl Into<String>) -> Self {
        self.then(Action::CancelTimer { name: name.into() })
    }

    /// Append a `log` action.
    pub fn log(self, level: LogLevel, message: impl Into<String>) -> Self {
        self.then(Action::Log { level, message: message.into() })
    }

    /// Append a `call_service` action.
    pub fn call_service(
        self,
        service: impl Into<String>,
        method: impl Into<String>,
        args: Value,
    ) -> Self {
        self.then(Action::CallService {
            service: service.into(),
            method: method.into(),
            args,
            timeout_ms: None,
        })
    }

    /// Append a guarded block: run `try`, handle failures with `catch`.
    pub fn guarded(
        self,
        try_actions: Vec<Action>,
        bind_as: impl Into<String>,
        catch_actions: Vec<Action>,
    ) -> Self {
        self.then(Action::TryCatch {
            try_actions,
            catch: Some(CatchBlock { bind_as: bind_as.into(), actions: catch_actions }),
            finally: None,
        })
    }

    /// Finish and validate the rule.
    pub fn build(self) -> Result<RuleInput, EngineError> {
        let trigger = self.trigger.ok_or_else(|| {
            EngineError::Validation(format!("rule '{}' has no trigger", self.id))
        })?;
        let input = RuleInput {
            id: self.id,
            name: self.name,
            description: self.description,
            priority: self.priority,
            enabled: self.enabled,
            tags: self.tags,
            group: self.group,
            trigger,
            conditions: self.conditions,
            actions: self.actions,
        };
        ensure_valid(&input)?;
        Ok(input)
    }
}

/// Condition constructors matching the document shape.
pub mod cond {
    use super::*;
    use crate::condition::BaselineComparison;

    /// Condition over a field of the triggering event.
    pub fn event(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Condition {
        Condition {
            source: ConditionSource::Event { field: field.into() },
            operator,
            value: Some(ConditionValue::Literal(value.into())),
        }
    }

    /// Condition over the first fact matching a key pattern.
    pub fn fact(pattern: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Condition {
        Condition {
            source: ConditionSource::Fact { pattern: pattern.into() },
            operator,
            value: Some(ConditionValue::Literal(value.into())),
        }
    }

    /// Condition over a context binding.
    pub fn context(key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Condition {
        Condition {
            source: ConditionSource::Context { key: key.into() },
            operator,
            value: Some(ConditionValue::Literal(value.into())),
        }
    }

    /// Presence check without a right-hand value.
    pub fn exists(source: ConditionSource) -> Condition {
        Condition { source, operator: Operator::Exists, value: None }
    }

    /// Absence check without a right-hand value.
    pub fn not_exists(source: ConditionSource) -> Condition {
        Condition { source, operator: Operator::NotExists, value: None }
    }

    /// Condition comparing a source against a runtime reference.
    pub fn with_ref(source: ConditionSource, operator: Operator, path: impl Into<String>) -> Condition {
        Condition {
            source,
            operator,
            value: Some(ConditionValue::reference(path)),
        }
    }

    /// Baseline deviation check.
    pub fn baseline(
        metric: impl Into<String>,
        comparison: BaselineComparison,
        sensitivity: Option<f64>,
    ) -> Condition {
        Condition {
            source: ConditionSource::Baseline {
                metric: metric.into(),
                comparison,
                sensitivity,
            },
            operator: Operator::Eq,
            value: Some(ConditionValue::literal(true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_matches_document_shape() {
        let built = RuleBuilder::new("high-order", "High order")
            .priority(10)
            .tag("billing")
            .on_event("order.created")
            .when(cond::event("data.total", Operator::Gte, json!(100)))
            .set_fact("orders:high:${event.data.id}", true)
            .build()
            .unwrap();

        let authored: RuleInput = serde_json::from_value(json!({
            "id": "high-order",
            "name": "High order",
            "priority": 10,
            "tags": ["billing"],
            "trigger": {"type": "event", "topic": "order.created"},
            "conditions": [
                {"source": {"type": "event", "field": "data.total"},
                 "operator": "gte", "value": 100}
            ],
            "actions": [
                {"type": "set_fact", "key": "orders:high:${event.data.id}", "value": true}
            ]
        }))
        .unwrap();

        assert_eq!(built, authored);
    }

    #[test]
    fn missing_trigger_is_a_validation_error() {
        let err = RuleBuilder::new("r", "R")
            .set_fact("k", 1)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no trigger"));
    }

    #[test]
    fn built_rules_are_validated() {
        let err = RuleBuilder::new("r", "R").on_event("t").build().unwrap_err();
        assert!(err.to_string().contains("at least one action"));
    }

    #[test]
    fn temporal_and_timer_triggers() {
        let rule = RuleBuilder::new("late", "Late payment")
            .on_temporal(TemporalPattern::Absence {
                after: crate::temporal::EventMatcher {
                    topic: "payment.started".into(),
                    data: None,
                    alias: None,
                },
                expected: crate::temporal::EventMatcher {
                    topic: "payment.completed".into(),
                    data: None,
                    alias: None,
                },
                within: 30_000,
            })
            .set_fact("late", true)
            .build()
            .unwrap();
        assert!(matches!(rule.trigger, Trigger::Temporal { .. }));

        let rule = RuleBuilder::new("nightly", "Nightly")
            .on_timer("nightly")
            .log(LogLevel::Info, "tick")
            .build()
            .unwrap();
        assert!(matches!(rule.trigger, Trigger::Timer { .. }));
    }

    #[test]
    fn guarded_builds_try_catch() {
        let rule = RuleBuilder::new("guarded", "Guarded")
            .on_event("go")
            .guarded(
                vec![Action::CallService {
                    service: "svc".into(),
                    method: "m".into(),
                    args: Value::Null,
                    timeout_ms: None,
                }],
                "failure",
                vec![Action::Log { level: LogLevel::Error, message: "${failure}".into() }],
            )
            .build()
            .unwrap();
        match &rule.actions[0] {
            Action::TryCatch { catch, .. } => {
                assert_eq!(catch.as_ref().unwrap().bind_as, "failure");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn ref_conditions_via_helper() {
        let condition = cond::with_ref(
            ConditionSource::Event { field: "data.total".into() },
            Operator::Gt,
            "fact.orders:limit",
        );
        assert_eq!(condition.value, Some(ConditionValue::reference("fact.orders:limit")));
    }
}
