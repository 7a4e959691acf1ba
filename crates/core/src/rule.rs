//! Rules: triggers, metadata, and registration inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::condition::Condition;
use crate::temporal::TemporalPattern;

fn default_true() -> bool {
    true
}

/// What causes a rule to be considered for firing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Trigger {
    /// An event whose topic matches a literal or pattern (`order.*`, `*`).
    Event { topic: String },
    /// A fact change whose key matches the pattern.
    Fact { pattern: String },
    /// Expiry of a named timer.
    Timer { name: String },
    /// A temporal pattern over the event history.
    Temporal { pattern: TemporalPattern },
}

/// User-supplied rule definition, as authored in JSON/YAML or via a builder.
///
/// Registration assigns the bookkeeping fields (`created_at`, `updated_at`,
/// `version`) and produces a [`Rule`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleInput {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Higher priority rules are attempted first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

/// A registered rule. Owned exclusively by the engine; external code reads
/// immutable snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub priority: i32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Rule {
    /// Materialize a registered rule from an input, assigning metadata.
    pub fn from_input(input: RuleInput, version: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            id: input.id,
            name: input.name,
            description: input.description,
            priority: input.priority,
            enabled: input.enabled,
            tags: input.tags,
            group: input.group,
            trigger: input.trigger,
            conditions: input.conditions,
            actions: input.actions,
            created_at,
            updated_at: Utc::now(),
            version,
        }
    }

    /// Project back to the authored shape (drops assigned metadata).
    pub fn to_input(&self) -> RuleInput {
        RuleInput {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            enabled: self.enabled,
            tags: self.tags.clone(),
            group: self.group.clone(),
            trigger: self.trigger.clone(),
            conditions: self.conditions.clone(),
            actions: self.actions.clone(),
        }
    }
}

/// Filter for listing rules.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFilter {
    pub enabled: Option<bool>,
    pub group: Option<String>,
    pub tag: Option<String>,
}

impl RuleFilter {
    pub fn accepts(&self, rule: &Rule) -> bool {
        if let Some(enabled) = self.enabled {
            if rule.enabled != enabled {
                return false;
            }
        }
        if let Some(group) = &self.group {
            if rule.group.as_deref() != Some(group.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !rule.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_input() -> RuleInput {
        serde_json::from_value(json!({
            "id": "high-order",
            "name": "High order",
            "priority": 10,
            "trigger": {"type": "event", "topic": "order.created"},
            "conditions": [
                {"source": {"type": "event", "field": "data.total"}, "operator": "gte", "value": 100}
            ],
            "actions": [
                {"type": "set_fact", "key": "orders:high:${event.data.id}", "value": true}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn input_defaults() {
        let input = sample_input();
        assert!(input.enabled);
        assert!(input.tags.is_empty());
        assert!(input.group.is_none());
    }

    #[test]
    fn from_input_roundtrips_modulo_metadata() {
        let input = sample_input();
        let rule = Rule::from_input(input.clone(), 1, Utc::now());
        assert_eq!(rule.version, 1);
        assert_eq!(rule.to_input(), input);
    }

    #[test]
    fn unknown_rule_fields_rejected() {
        let r: Result<RuleInput, _> = serde_json::from_value(json!({
            "id": "r", "name": "r",
            "trigger": {"type": "event", "topic": "t"},
            "actions": [],
            "surprise": 1
        }));
        assert!(r.is_err());
    }

    #[test]
    fn filter_by_group_and_tag() {
        let mut rule = Rule::from_input(sample_input(), 1, Utc::now());
        rule.group = Some("checkout".to_string());
        rule.tags = vec!["billing".to_string()];

        let f = RuleFilter { group: Some("checkout".to_string()), ..Default::default() };
        assert!(f.accepts(&rule));
        let f = RuleFilter { tag: Some("fraud".to_string()), ..Default::default() };
        assert!(!f.accepts(&rule));
        let f = RuleFilter { enabled: Some(false), ..Default::default() };
        assert!(!f.accepts(&rule));
    }
}
