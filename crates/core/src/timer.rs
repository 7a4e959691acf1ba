//! Timer configuration and runtime state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

/// What to emit when a timer expires.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OnExpire {
    pub topic: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// A duration given either as milliseconds or a human string ("90s", "2h30m").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum DurationSpec {
    Millis(u64),
    Human(String),
}

impl DurationSpec {
    /// Resolve to a concrete duration. Zero or unparseable specs are timer errors.
    pub fn to_duration(&self) -> Result<Duration, EngineError> {
        let d = match self {
            DurationSpec::Millis(ms) => Duration::from_millis(*ms),
            DurationSpec::Human(s) => parse_duration(s)
                .ok_or_else(|| EngineError::Timer(format!("invalid duration '{}'", s)))?,
        };
        if d.is_zero() {
            return Err(EngineError::Timer("duration must be positive".to_string()));
        }
        Ok(d)
    }
}

/// Parse a human-readable duration string into a [`Duration`].
///
/// Supports components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs`
/// (seconds), `Xms` (milliseconds). Components can be combined: "2h30m",
/// "1d12h", "90s". A bare number is milliseconds. Returns `None` if the
/// string is empty or unparseable.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            match ch {
                'd' => total_ms += n * 86_400_000,
                'h' => total_ms += n * 3_600_000,
                'm' => {
                    if chars.peek() == Some(&'s') {
                        chars.next();
                        total_ms += n;
                    } else {
                        total_ms += n * 60_000;
                    }
                }
                's' => total_ms += n * 1_000,
                _ => return None,
            }
            found_unit = true;
        }
    }

    // Trailing bare number: milliseconds, but only when no unit preceded it.
    if !num_buf.is_empty() {
        if found_unit {
            return None;
        }
        total_ms += num_buf.parse::<u64>().ok()?;
    }

    if total_ms == 0 && !found_unit {
        return None;
    }
    Some(Duration::from_millis(total_ms))
}

/// Configuration for a named timer.
///
/// Exactly one of `duration` or `cron` must be set. Setting a timer whose
/// name already exists replaces the prior timer atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TimerConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    pub on_expire: OnExpire,
    #[serde(default)]
    pub repeat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
}

/// Runtime state of a scheduled timer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default)]
    pub repeat: bool,
    /// Number of deliveries so far.
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
    pub on_expire: OnExpire,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7_200)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn parses_combined_units() {
        assert_eq!(parse_duration("2h30m"), Some(Duration::from_secs(9_000)));
        assert_eq!(parse_duration("1d12h"), Some(Duration::from_secs(129_600)));
    }

    #[test]
    fn bare_number_is_millis() {
        assert_eq!(parse_duration("1500"), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("30m15"), None);
    }

    #[test]
    fn duration_spec_rejects_zero() {
        assert!(DurationSpec::Millis(0).to_duration().is_err());
        assert!(DurationSpec::Millis(10).to_duration().is_ok());
    }

    #[test]
    fn timer_config_accepts_human_duration() {
        let cfg: TimerConfig = serde_json::from_value(json!({
            "name": "t",
            "duration": "10s",
            "onExpire": {"topic": "e"}
        }))
        .unwrap();
        assert_eq!(
            cfg.duration.unwrap().to_duration().unwrap(),
            Duration::from_secs(10)
        );
    }
}
