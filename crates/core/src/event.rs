//! Immutable event envelopes flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Immutable event envelope.
///
/// Created by producers (HTTP, internal emitters, timers), consumed by the
/// processing pipeline and appended to the event store. Never mutated after
/// creation. `correlation_id` tags everything derived from one root ingress;
/// `causation_id` is the id of the immediate parent event (absent for roots).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub topic: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl Event {
    /// Create a new root event with a fresh id and the current timestamp.
    pub fn new(topic: impl Into<String>, data: Map<String, Value>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic: topic.into(),
            data,
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
            causation_id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Attach a causation id (the parent event's id).
    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }

    /// View the event as a JSON value for path resolution.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn new_event_has_fresh_id_and_no_lineage() {
        let e = Event::new("order.created", data(&[("total", json!(150))]), "test");
        assert!(!e.id.is_empty());
        assert!(e.correlation_id.is_none());
        assert!(e.causation_id.is_none());
    }

    #[test]
    fn builders_attach_lineage() {
        let e = Event::new("a", Map::new(), "test")
            .with_correlation("corr-1")
            .with_causation("parent-1");
        assert_eq!(e.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(e.causation_id.as_deref(), Some("parent-1"));
    }

    #[test]
    fn serializes_camel_case() {
        let e = Event::new("a", Map::new(), "test").with_correlation("c");
        let v = serde_json::to_value(&e).unwrap();
        assert!(v.get("correlationId").is_some());
        assert!(v.get("causationId").is_none());
    }
}
