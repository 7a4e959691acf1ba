//! Temporal pattern matcher over the event store.
//!
//! Sequence progress is tracked per (rule, correlation key) and expired
//! lazily against the pattern window. Absence watches are tokio sleep tasks
//! that fire unless a matching expected event was observed strictly before
//! the deadline wake; an expected event arriving exactly at the boundary
//! does not suppress. Count and aggregate patterns re-evaluate their
//! sliding window on every matching event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::AbortHandle;
use tracing::warn;

use reflex_core::{
    path, pattern, AggregateFunction, Event, EventMatcher, Rule, TemporalPattern, Trigger,
};

use crate::events::EventStore;

/// Synthetic trigger topics for temporal firings.
pub const SEQUENCE_TOPIC: &str = "temporal.sequence";
pub const ABSENCE_TOPIC: &str = "temporal.absence";
pub const COUNT_TOPIC: &str = "temporal.count";
pub const AGGREGATE_TOPIC: &str = "temporal.aggregate";

/// A temporal pattern match, delivered to the engine's firing handler.
#[derive(Debug, Clone)]
pub struct TemporalFiring {
    pub rule_id: String,
    pub topic: &'static str,
    pub correlation_id: Option<String>,
    /// Alias bindings exposed to conditions and actions.
    pub bindings: Map<String, Value>,
    /// Details carried in the synthetic trigger event's data.
    pub data: Map<String, Value>,
}

/// Callback receiving temporal firings (wired to the engine's ingress).
pub type FiringHandler = Arc<dyn Fn(TemporalFiring) + Send + Sync>;

struct SequenceProgress {
    next_index: usize,
    started: tokio::time::Instant,
    bindings: Map<String, Value>,
}

struct AbsenceWatch {
    rule_id: String,
    correlation_id: Option<String>,
    suppressed: bool,
    abort: AbortHandle,
}

struct State {
    sequences: HashMap<(String, String), SequenceProgress>,
    absences: HashMap<u64, AbsenceWatch>,
    next_watch_id: u64,
}

pub struct TemporalMatcher {
    state: Arc<Mutex<State>>,
    handler: Arc<RwLock<Option<FiringHandler>>>,
}

impl TemporalMatcher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                sequences: HashMap::new(),
                absences: HashMap::new(),
                next_watch_id: 1,
            })),
            handler: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_firing_handler(&self, handler: FiringHandler) {
        *self.handler.write().expect("temporal handler lock poisoned") = Some(handler);
    }

    /// Feed one ingested event through every temporal rule.
    pub fn on_event(&self, event: &Event, rules: &[Arc<Rule>], events: &EventStore) {
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            let Trigger::Temporal { pattern } = &rule.trigger else {
                continue;
            };
            match pattern {
                TemporalPattern::Sequence { events: matchers, within, correlate_by } => {
                    self.on_sequence_event(rule, matchers, *within, correlate_by.as_deref(), event);
                }
                TemporalPattern::Absence { after, expected, within } => {
                    self.on_absence_event(rule, after, expected, *within, event);
                }
                TemporalPattern::Count { event: matcher, window, threshold, comparison } => {
                    if matcher_matches(matcher, event) {
                        let count = count_matching(events, matcher, *window) as f64;
                        if comparison.check(count, *threshold as f64) {
                            let mut bindings = Map::new();
                            bind_alias(&mut bindings, matcher, event);
                            self.fire(TemporalFiring {
                                rule_id: rule.id.clone(),
                                topic: COUNT_TOPIC,
                                correlation_id: event.correlation_id.clone(),
                                bindings,
                                data: details(&[("count", json!(count as u64))]),
                            });
                        }
                    }
                }
                TemporalPattern::Aggregate {
                    event: matcher,
                    field,
                    function,
                    window,
                    threshold,
                    comparison,
                } => {
                    if matcher_matches(matcher, event) {
                        let (value, samples) = aggregate(events, matcher, field, *function, *window);
                        // No numeric samples → nothing to compare.
                        if samples > 0 && comparison.check(value, *threshold) {
                            let mut bindings = Map::new();
                            bind_alias(&mut bindings, matcher, event);
                            self.fire(TemporalFiring {
                                rule_id: rule.id.clone(),
                                topic: AGGREGATE_TOPIC,
                                correlation_id: event.correlation_id.clone(),
                                bindings,
                                data: details(&[
                                    ("value", json!(value)),
                                    ("samples", json!(samples)),
                                ]),
                            });
                        }
                    }
                }
            }
        }
    }

    fn on_sequence_event(
        &self,
        rule: &Arc<Rule>,
        matchers: &[EventMatcher],
        within: u64,
        correlate_by: Option<&str>,
        event: &Event,
    ) {
        if matchers.is_empty() {
            return;
        }
        let key_value = sequence_key(correlate_by, event);
        let state_key = (rule.id.clone(), key_value);
        let window = Duration::from_millis(within);
        let now = tokio::time::Instant::now();

        let firing = {
            let mut state = self.state.lock().expect("temporal state poisoned");

            // Expire a stale in-flight sequence before matching.
            if let Some(progress) = state.sequences.get(&state_key) {
                if now.duration_since(progress.started) > window {
                    state.sequences.remove(&state_key);
                }
            }

            match state.sequences.get_mut(&state_key) {
                Some(progress) => {
                    if matcher_matches(&matchers[progress.next_index], event) {
                        bind_alias(&mut progress.bindings, &matchers[progress.next_index], event);
                        progress.next_index += 1;
                        if progress.next_index == matchers.len() {
                            let progress = state
                                .sequences
                                .remove(&state_key)
                                .expect("progress present");
                            Some(TemporalFiring {
                                rule_id: rule.id.clone(),
                                topic: SEQUENCE_TOPIC,
                                correlation_id: event.correlation_id.clone(),
                                bindings: progress.bindings,
                                data: details(&[("length", json!(matchers.len()))]),
                            })
                        } else {
                            None
                        }
                    } else {
                        None
                    }
                }
                None => {
                    if matcher_matches(&matchers[0], event) {
                        let mut bindings = Map::new();
                        bind_alias(&mut bindings, &matchers[0], event);
                        if matchers.len() == 1 {
                            Some(TemporalFiring {
                                rule_id: rule.id.clone(),
                                topic: SEQUENCE_TOPIC,
                                correlation_id: event.correlation_id.clone(),
                                bindings,
                                data: details(&[("length", json!(1))]),
                            })
                        } else {
                            state.sequences.insert(
                                state_key,
                                SequenceProgress { next_index: 1, started: now, bindings },
                            );
                            None
                        }
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(firing) = firing {
            self.fire(firing);
        }
    }

    fn on_absence_event(
        &self,
        rule: &Arc<Rule>,
        after: &EventMatcher,
        expected: &EventMatcher,
        within: u64,
        event: &Event,
    ) {
        // An expected event suppresses pending watches for this rule and
        // correlation, but only if it is observed before the deadline wake.
        if matcher_matches(expected, event) {
            let mut state = self.state.lock().expect("temporal state poisoned");
            for watch in state.absences.values_mut() {
                if watch.rule_id == rule.id
                    && correlations_overlap(&watch.correlation_id, &event.correlation_id)
                {
                    watch.suppressed = true;
                }
            }
        }

        if matcher_matches(after, event) {
            let mut bindings = Map::new();
            bind_alias(&mut bindings, after, event);

            let watch_id = {
                let mut state = self.state.lock().expect("temporal state poisoned");
                let id = state.next_watch_id;
                state.next_watch_id += 1;
                id
            };

            let state_ref = Arc::clone(&self.state);
            let handler_ref = Arc::clone(&self.handler);
            let rule_id = rule.id.clone();
            let correlation_id = event.correlation_id.clone();
            let task = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(within)).await;
                let fired = {
                    let mut state = state_ref.lock().expect("temporal state poisoned");
                    match state.absences.remove(&watch_id) {
                        Some(watch) if !watch.suppressed => Some(TemporalFiring {
                            rule_id: watch.rule_id,
                            topic: ABSENCE_TOPIC,
                            correlation_id: watch.correlation_id,
                            bindings,
                            data: details(&[("withinMs", json!(within))]),
                        }),
                        _ => None,
                    }
                };
                if let Some(firing) = fired {
                    deliver(&handler_ref, firing);
                }
            });

            let mut state = self.state.lock().expect("temporal state poisoned");
            state.absences.insert(
                watch_id,
                AbsenceWatch {
                    rule_id: rule.id.clone(),
                    correlation_id,
                    suppressed: false,
                    abort: task.abort_handle(),
                },
            );
        }
    }

    fn fire(&self, firing: TemporalFiring) {
        deliver(&self.handler, firing);
    }

    /// Abort pending absence watches and clear sequence progress.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("temporal state poisoned");
        for (_, watch) in state.absences.drain() {
            watch.abort.abort();
        }
        state.sequences.clear();
    }

    /// Number of in-flight sequences and absence watches (debug stats).
    pub fn pending(&self) -> (usize, usize) {
        let state = self.state.lock().expect("temporal state poisoned");
        (state.sequences.len(), state.absences.len())
    }
}

impl Default for TemporalMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(handler: &RwLock<Option<FiringHandler>>, firing: TemporalFiring) {
    let handler = handler.read().expect("temporal handler lock poisoned").clone();
    match handler {
        Some(h) => h(firing),
        None => warn!(rule_id = %firing.rule_id, "temporal firing dropped: no handler installed"),
    }
}

/// Whether a matcher accepts an event: topic pattern plus optional data
/// field equality.
fn matcher_matches(matcher: &EventMatcher, event: &Event) -> bool {
    if !pattern::matches(&matcher.topic, &event.topic) {
        return false;
    }
    match &matcher.data {
        None => true,
        Some(required) => required
            .iter()
            .all(|(k, v)| event.data.get(k) == Some(v)),
    }
}

fn bind_alias(bindings: &mut Map<String, Value>, matcher: &EventMatcher, event: &Event) {
    if let Some(alias) = &matcher.alias {
        bindings.insert(alias.clone(), Value::Object(event.data.clone()));
    }
}

fn sequence_key(correlate_by: Option<&str>, event: &Event) -> String {
    match correlate_by {
        Some(field) => event
            .data
            .get(field)
            .map(value_key)
            .unwrap_or_default(),
        None => event.correlation_id.clone().unwrap_or_default(),
    }
}

fn value_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn correlations_overlap(a: &Option<String>, b: &Option<String>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn count_matching(events: &EventStore, matcher: &EventMatcher, window_ms: u64) -> usize {
    if !pattern::is_pattern(&matcher.topic) && matcher.data.is_none() {
        return events.count_in_window(&matcher.topic, window_ms);
    }
    events
        .recent(window_ms)
        .iter()
        .filter(|e| matcher_matches(matcher, e))
        .count()
}

fn aggregate(
    events: &EventStore,
    matcher: &EventMatcher,
    field: &str,
    function: AggregateFunction,
    window_ms: u64,
) -> (f64, usize) {
    let matching: Vec<Event> = events
        .recent(window_ms)
        .into_iter()
        .filter(|e| matcher_matches(matcher, e))
        .collect();

    let values: Vec<f64> = matching
        .iter()
        .filter_map(|e| {
            let root = e.to_value();
            path::resolve(&root, field).and_then(Value::as_f64)
        })
        .collect();

    let value = match function {
        AggregateFunction::Count => values.len() as f64,
        AggregateFunction::Sum => values.iter().sum(),
        AggregateFunction::Avg => {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        }
        AggregateFunction::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateFunction::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    (value, values.len())
}

fn details(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
