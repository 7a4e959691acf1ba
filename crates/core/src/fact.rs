//! Keyed facts with per-key versioning metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single fact: a keyed value with write metadata.
///
/// Keys are dot/colon-delimited strings (e.g. `customer:42:tier`).
/// `version` is monotonic per key; concurrent writes to the same key are
/// serialized by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The kind of change a fact-store write produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactChangeKind {
    Set,
    Deleted,
}

/// A committed fact change, delivered to subscribers after the write.
#[derive(Debug, Clone)]
pub struct FactChange {
    pub kind: FactChangeKind,
    pub fact: Fact,
}
