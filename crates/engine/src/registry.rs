//! Indexed store of registered rules.
//!
//! Rules live in an insertion-ordered map; trigger indexes are rebuilt on
//! mutation (mutations are rare next to lookups) so `register`/`unregister`
//! stay atomic with respect to every index. Candidate lists order literal
//! topic matches before pattern matches; within each, priority descending
//! with insertion order breaking ties.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use indexmap::IndexMap;
use tracing::info;

use reflex_core::{ensure_valid, pattern, EngineError, Rule, RuleFilter, RuleInput, Trigger};

#[derive(Default)]
struct Indexes {
    /// Literal topic → rule ids, insertion-ordered.
    by_topic: HashMap<String, Vec<String>>,
    /// (topic pattern, rule id), insertion-ordered.
    by_topic_pattern: Vec<(String, String)>,
    /// (fact key pattern, rule id), insertion-ordered.
    by_fact_pattern: Vec<(String, String)>,
    /// Timer name → rule ids.
    by_timer: HashMap<String, Vec<String>>,
    /// Rule ids with temporal triggers.
    temporal: Vec<String>,
}

struct Inner {
    rules: IndexMap<String, Arc<Rule>>,
    indexes: Indexes,
    disabled_groups: HashSet<String>,
}

pub struct RuleRegistry {
    inner: RwLock<Inner>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                rules: IndexMap::new(),
                indexes: Indexes::default(),
                disabled_groups: HashSet::new(),
            }),
        }
    }

    /// Register a rule, replacing any existing rule with the same id.
    ///
    /// Replacement preserves `created_at` and bumps `version`; a fresh rule
    /// starts at version 1.
    pub fn register(
        &self,
        input: RuleInput,
        skip_validation: bool,
    ) -> Result<Arc<Rule>, EngineError> {
        if !skip_validation {
            ensure_valid(&input)?;
        }

        let mut inner = self.inner.write().expect("registry lock poisoned");
        let (version, created_at) = match inner.rules.get(&input.id) {
            Some(existing) => (existing.version + 1, existing.created_at),
            None => (1, Utc::now()),
        };
        let rule = Arc::new(Rule::from_input(input, version, created_at));
        info!(rule_id = %rule.id, version = rule.version, "registered rule");
        inner.rules.insert(rule.id.clone(), Arc::clone(&rule));
        rebuild_indexes(&mut inner);
        Ok(rule)
    }

    /// Remove a rule. Returns whether it existed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let removed = inner.rules.shift_remove(id).is_some();
        if removed {
            info!(rule_id = %id, "unregistered rule");
            rebuild_indexes(&mut inner);
        }
        removed
    }

    /// Atomically apply a hot-reload diff: removals then upserts, all under
    /// one lock so readers never observe a partial swap.
    pub fn apply_diff(&self, removed: &[String], upserts: Vec<RuleInput>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        for id in removed {
            inner.rules.shift_remove(id);
        }
        for input in upserts {
            let (version, created_at) = match inner.rules.get(&input.id) {
                Some(existing) => (existing.version + 1, existing.created_at),
                None => (1, Utc::now()),
            };
            let rule = Arc::new(Rule::from_input(input, version, created_at));
            inner.rules.insert(rule.id.clone(), rule);
        }
        rebuild_indexes(&mut inner);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Rule>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .rules
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .rules
            .contains_key(id)
    }

    /// All rules passing the filter, in insertion order.
    pub fn list(&self, filter: &RuleFilter) -> Vec<Arc<Rule>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .rules
            .values()
            .filter(|r| filter.accepts(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("registry lock poisoned").rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        let rule = inner
            .rules
            .get(id)
            .ok_or_else(|| EngineError::NotFound(format!("rule '{}'", id)))?;
        let mut updated = (**rule).clone();
        updated.enabled = enabled;
        updated.updated_at = Utc::now();
        inner.rules.insert(id.to_string(), Arc::new(updated));
        Ok(())
    }

    pub fn enable(&self, id: &str) -> Result<(), EngineError> {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> Result<(), EngineError> {
        self.set_enabled(id, false)
    }

    pub fn enable_group(&self, group: &str) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .disabled_groups
            .remove(group);
    }

    pub fn disable_group(&self, group: &str) {
        self.inner
            .write()
            .expect("registry lock poisoned")
            .disabled_groups
            .insert(group.to_string());
    }

    pub fn is_group_disabled(&self, group: &str) -> bool {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .disabled_groups
            .contains(group)
    }

    /// Candidate rules for an event topic: literal matches, then pattern
    /// matches, each priority-ordered, deduplicated by rule id.
    pub fn rules_for_event(&self, topic: &str) -> Vec<Arc<Rule>> {
        let inner = self.inner.read().expect("registry lock poisoned");

        let mut literal: Vec<&str> = inner
            .indexes
            .by_topic
            .get(topic)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();

        let mut patterned: Vec<&str> = inner
            .indexes
            .by_topic_pattern
            .iter()
            .filter(|(pat, _)| pattern::matches(pat, topic))
            .map(|(_, id)| id.as_str())
            .collect();

        sort_by_priority(&inner, &mut literal);
        sort_by_priority(&inner, &mut patterned);

        let mut seen = HashSet::new();
        literal
            .into_iter()
            .chain(patterned)
            .filter(|id| seen.insert(id.to_string()))
            .filter_map(|id| inner.rules.get(id).cloned())
            .collect()
    }

    /// Candidate rules for a changed fact key.
    pub fn rules_for_fact_change(&self, key: &str) -> Vec<Arc<Rule>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut ids: Vec<&str> = inner
            .indexes
            .by_fact_pattern
            .iter()
            .filter(|(pat, _)| pat == key || pattern::matches(pat, key))
            .map(|(_, id)| id.as_str())
            .collect();
        sort_by_priority(&inner, &mut ids);
        ids.into_iter()
            .filter_map(|id| inner.rules.get(id).cloned())
            .collect()
    }

    /// Candidate rules for an expired timer name.
    pub fn rules_for_timer(&self, name: &str) -> Vec<Arc<Rule>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut ids: Vec<&str> = inner
            .indexes
            .by_timer
            .get(name)
            .map(|ids| ids.iter().map(String::as_str).collect())
            .unwrap_or_default();
        sort_by_priority(&inner, &mut ids);
        ids.into_iter()
            .filter_map(|id| inner.rules.get(id).cloned())
            .collect()
    }

    /// All rules with temporal triggers, in insertion order.
    pub fn temporal_rules(&self) -> Vec<Arc<Rule>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .indexes
            .temporal
            .iter()
            .filter_map(|id| inner.rules.get(id).cloned())
            .collect()
    }

    /// Replace the whole rule set with restored rules, metadata preserved.
    pub fn restore(&self, rules: Vec<Rule>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.rules.clear();
        for rule in rules {
            inner.rules.insert(rule.id.clone(), Arc::new(rule));
        }
        rebuild_indexes(&mut inner);
    }

    /// Snapshot of all rules in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<Rule>> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .rules
            .values()
            .cloned()
            .collect()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn rebuild_indexes(inner: &mut Inner) {
    let mut indexes = Indexes::default();
    for (id, rule) in &inner.rules {
        match &rule.trigger {
            Trigger::Event { topic } => {
                if pattern::is_pattern(topic) {
                    indexes.by_topic_pattern.push((topic.clone(), id.clone()));
                } else {
                    indexes.by_topic.entry(topic.clone()).or_default().push(id.clone());
                }
            }
            Trigger::Fact { pattern: pat } => {
                indexes.by_fact_pattern.push((pat.clone(), id.clone()));
            }
            Trigger::Timer { name } => {
                indexes.by_timer.entry(name.clone()).or_default().push(id.clone());
            }
            Trigger::Temporal { .. } => {
                indexes.temporal.push(id.clone());
            }
        }
    }
    inner.indexes = indexes;
}

/// Sort ids by priority descending; `ids` arrive in insertion order, and the
/// stable sort keeps that order on ties.
fn sort_by_priority(inner: &Inner, ids: &mut [&str]) {
    ids.sort_by_key(|id| {
        std::cmp::Reverse(inner.rules.get(*id).map(|r| r.priority).unwrap_or(i32::MIN))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_input(id: &str, topic: &str, priority: i32) -> RuleInput {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "priority": priority,
            "trigger": {"type": "event", "topic": topic},
            "actions": [{"type": "log", "level": "info", "message": "m"}]
        }))
        .unwrap()
    }

    #[test]
    fn register_then_get_roundtrips() {
        let registry = RuleRegistry::new();
        let rule = registry.register(rule_input("r1", "order.created", 0), false).unwrap();
        assert_eq!(rule.version, 1);
        let fetched = registry.get("r1").unwrap();
        assert_eq!(fetched.to_input(), rule.to_input());
    }

    #[test]
    fn replace_bumps_version_and_keeps_created_at() {
        let registry = RuleRegistry::new();
        let v1 = registry.register(rule_input("r1", "a", 0), false).unwrap();
        let v2 = registry.register(rule_input("r1", "b", 5), false).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.created_at, v1.created_at);
        assert_eq!(registry.len(), 1);
        assert!(registry.rules_for_event("a").is_empty());
        assert_eq!(registry.rules_for_event("b").len(), 1);
    }

    #[test]
    fn invalid_rule_rejected_unless_skipped() {
        let registry = RuleRegistry::new();
        let mut input = rule_input("r1", "a", 0);
        input.actions.clear();
        assert!(matches!(
            registry.register(input.clone(), false),
            Err(EngineError::Validation(_))
        ));
        assert!(registry.register(input, true).is_ok());
    }

    #[test]
    fn priority_ordering_stable_on_ties() {
        let registry = RuleRegistry::new();
        registry.register(rule_input("low", "t", 1), false).unwrap();
        registry.register(rule_input("first-high", "t", 10), false).unwrap();
        registry.register(rule_input("second-high", "t", 10), false).unwrap();

        let ids: Vec<_> = registry
            .rules_for_event("t")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        assert_eq!(ids, ["first-high", "second-high", "low"]);
    }

    #[test]
    fn literals_precede_patterns() {
        let registry = RuleRegistry::new();
        registry.register(rule_input("wild", "order.*", 100), false).unwrap();
        registry.register(rule_input("exact", "order.created", 0), false).unwrap();

        let ids: Vec<_> = registry
            .rules_for_event("order.created")
            .iter()
            .map(|r| r.id.clone())
            .collect();
        // The literal wins placement despite its lower priority.
        assert_eq!(ids, ["exact", "wild"]);
    }

    #[test]
    fn fact_pattern_candidates() {
        let registry = RuleRegistry::new();
        let input: RuleInput = serde_json::from_value(json!({
            "id": "fact-watch",
            "name": "fact-watch",
            "trigger": {"type": "fact", "pattern": "customer:*:tier"},
            "actions": [{"type": "log", "level": "info", "message": "m"}]
        }))
        .unwrap();
        registry.register(input, false).unwrap();

        assert_eq!(registry.rules_for_fact_change("customer:42:tier").len(), 1);
        assert!(registry.rules_for_fact_change("customer:42:name").is_empty());
    }

    #[test]
    fn timer_and_temporal_indexes() {
        let registry = RuleRegistry::new();
        let timer_rule: RuleInput = serde_json::from_value(json!({
            "id": "on-timer",
            "name": "on-timer",
            "trigger": {"type": "timer", "name": "nightly"},
            "actions": [{"type": "log", "level": "info", "message": "m"}]
        }))
        .unwrap();
        let temporal_rule: RuleInput = serde_json::from_value(json!({
            "id": "absent",
            "name": "absent",
            "trigger": {"type": "temporal", "pattern": {
                "type": "absence",
                "after": {"topic": "payment.started"},
                "expected": {"topic": "payment.completed"},
                "within": 1000
            }},
            "actions": [{"type": "log", "level": "info", "message": "m"}]
        }))
        .unwrap();
        registry.register(timer_rule, false).unwrap();
        registry.register(temporal_rule, false).unwrap();

        assert_eq!(registry.rules_for_timer("nightly").len(), 1);
        assert!(registry.rules_for_timer("other").is_empty());
        assert_eq!(registry.temporal_rules().len(), 1);
    }

    #[test]
    fn enable_disable_and_groups() {
        let registry = RuleRegistry::new();
        registry.register(rule_input("r1", "t", 0), false).unwrap();

        registry.disable("r1").unwrap();
        assert!(!registry.get("r1").unwrap().enabled);
        registry.enable("r1").unwrap();
        assert!(registry.get("r1").unwrap().enabled);
        assert!(matches!(registry.enable("ghost"), Err(EngineError::NotFound(_))));

        registry.disable_group("checkout");
        assert!(registry.is_group_disabled("checkout"));
        registry.enable_group("checkout");
        assert!(!registry.is_group_disabled("checkout"));
    }

    #[test]
    fn apply_diff_is_single_swap() {
        let registry = RuleRegistry::new();
        registry.register(rule_input("r1", "a", 0), false).unwrap();
        registry.register(rule_input("r2", "b", 0), false).unwrap();

        registry.apply_diff(
            &["r2".to_string()],
            vec![rule_input("r1", "a2", 1), rule_input("r3", "c", 0)],
        );

        assert!(registry.get("r2").is_none());
        assert_eq!(registry.get("r1").unwrap().version, 2);
        assert_eq!(registry.get("r3").unwrap().version, 1);
        assert_eq!(registry.rules_for_event("a2").len(), 1);
    }

    #[test]
    fn list_respects_filter() {
        let registry = RuleRegistry::new();
        registry.register(rule_input("r1", "a", 0), false).unwrap();
        registry.register(rule_input("r2", "b", 0), false).unwrap();
        registry.disable("r2").unwrap();

        let enabled = registry.list(&RuleFilter { enabled: Some(true), ..Default::default() });
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "r1");
    }
}
