//! Typed trace entries recording observable moments inside the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// What kind of moment a trace entry records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TraceEntryType {
    RuleTriggered,
    RuleExecuted,
    RuleSkipped,
    RuleFailed,
    ConditionEvaluated,
    ActionCompleted,
    ActionFailed,
    EventEmitted,
    FactChanged,
    TimerSet,
    TimerExpired,
    TimerCancelled,
    ChainDepthExceeded,
    HotReloadStarted,
    HotReloadCompleted,
    HotReloadFailed,
}

/// A structured record written to the trace ring buffer and fanned out to
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entry_type: TraceEntryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl TraceEntry {
    pub fn new(entry_type: TraceEntryType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            entry_type,
            rule_id: None,
            rule_name: None,
            correlation_id: None,
            duration_ms: None,
            details: Map::new(),
        }
    }

    pub fn with_rule(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.rule_id = Some(id.into());
        self.rule_name = Some(name.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Query parameters for filtering trace entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceFilter {
    pub correlation_id: Option<String>,
    pub rule_id: Option<String>,
    pub types: Option<Vec<TraceEntryType>>,
    pub limit: Option<usize>,
}

impl TraceFilter {
    pub fn accepts(&self, entry: &TraceEntry) -> bool {
        if let Some(cid) = &self.correlation_id {
            if entry.correlation_id.as_deref() != Some(cid.as_str()) {
                return false;
            }
        }
        if let Some(rid) = &self.rule_id {
            if entry.rule_id.as_deref() != Some(rid.as_str()) {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&entry.entry_type) {
                return false;
            }
        }
        true
    }
}
