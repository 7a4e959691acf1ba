//! Temporal trigger patterns over the event history.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Matches a single event within a temporal pattern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EventMatcher {
    /// Topic literal or pattern (`payment.*`).
    pub topic: String,
    /// Optional equality constraints on event data fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// Alias binding the matched event's data into the evaluation context.
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Threshold comparison for count and aggregate patterns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gte,
    Lte,
    Eq,
}

impl Comparison {
    pub fn check(&self, observed: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gte => observed >= threshold,
            Comparison::Lte => observed <= threshold,
            Comparison::Eq => observed == threshold,
        }
    }
}

/// Aggregation applied to a numeric event field over a window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

/// A temporal trigger pattern. All windows are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TemporalPattern {
    /// Ordered matchers that must all occur within the window, in order,
    /// per correlation key. Fires once the last matcher arrives.
    #[serde(rename_all = "camelCase")]
    Sequence {
        events: Vec<EventMatcher>,
        within: u64,
        /// Event data field used to partition sequence progress
        /// (falls back to the event correlation id when absent).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlate_by: Option<String>,
    },
    /// Fires `within` ms after an `after` event if no matching `expected`
    /// event has been observed in that window.
    Absence {
        after: EventMatcher,
        expected: EventMatcher,
        within: u64,
    },
    /// Fires when the count of matching events in a sliding window
    /// satisfies the threshold.
    Count {
        event: EventMatcher,
        window: u64,
        threshold: u64,
        comparison: Comparison,
    },
    /// Fires when an aggregate of a numeric field over matching events in
    /// a sliding window satisfies the threshold.
    Aggregate {
        event: EventMatcher,
        field: String,
        function: AggregateFunction,
        window: u64,
        threshold: f64,
        comparison: Comparison,
    },
}
