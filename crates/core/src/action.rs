//! Action sum type executed by firing rules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::condition::Condition;
use crate::timer::TimerConfig;

/// Severity level for `log` actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Error binding and handler actions for `try_catch`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CatchBlock {
    /// Context key the error message is bound under while `actions` run.
    #[serde(rename = "as", default = "default_catch_binding")]
    pub bind_as: String,
    pub actions: Vec<Action>,
}

fn default_catch_binding() -> String {
    "error".to_string()
}

/// A single action in a rule's ordered action list.
///
/// Strings in keys, topics, messages, and arg positions support `${path}`
/// interpolation from the evaluation context; `$$` escapes a literal `$`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Action {
    SetFact {
        key: String,
        value: Value,
    },
    DeleteFact {
        key: String,
    },
    EmitEvent {
        topic: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    SetTimer {
        timer: TimerConfig,
    },
    CancelTimer {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    CallService {
        service: String,
        method: String,
        #[serde(default)]
        args: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Conditional {
        conditions: Vec<Condition>,
        then: Vec<Action>,
        #[serde(default, rename = "else", skip_serializing_if = "Option::is_none")]
        otherwise: Option<Vec<Action>>,
    },
    TryCatch {
        #[serde(rename = "try")]
        try_actions: Vec<Action>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        catch: Option<CatchBlock>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finally: Option<Vec<Action>>,
    },
}

impl Action {
    /// The wire tag of this action, used in traces and error reporting.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::SetFact { .. } => "set_fact",
            Action::DeleteFact { .. } => "delete_fact",
            Action::EmitEvent { .. } => "emit_event",
            Action::SetTimer { .. } => "set_timer",
            Action::CancelTimer { .. } => "cancel_timer",
            Action::CallService { .. } => "call_service",
            Action::Log { .. } => "log",
            Action::Conditional { .. } => "conditional",
            Action::TryCatch { .. } => "try_catch",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_fact_roundtrips() {
        let a: Action = serde_json::from_value(json!({
            "type": "set_fact",
            "key": "orders:high:${event.data.id}",
            "value": true
        }))
        .unwrap();
        assert_eq!(a.type_name(), "set_fact");
        let back = serde_json::to_value(&a).unwrap();
        assert_eq!(back["type"], "set_fact");
    }

    #[test]
    fn conditional_uses_else_keyword() {
        let a: Action = serde_json::from_value(json!({
            "type": "conditional",
            "conditions": [
                {"source": {"type": "event", "field": "data.total"}, "operator": "gt", "value": 10}
            ],
            "then": [{"type": "log", "level": "info", "message": "big"}],
            "else": [{"type": "log", "level": "debug", "message": "small"}]
        }))
        .unwrap();
        match a {
            Action::Conditional { otherwise, .. } => assert!(otherwise.is_some()),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn try_catch_defaults_error_binding() {
        let a: Action = serde_json::from_value(json!({
            "type": "try_catch",
            "try": [{"type": "call_service", "service": "s", "method": "m"}],
            "catch": {"actions": [{"type": "log", "level": "error", "message": "${error}"}]}
        }))
        .unwrap();
        match a {
            Action::TryCatch { catch, .. } => {
                assert_eq!(catch.unwrap().bind_as, "error");
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn unknown_action_type_rejected() {
        let r: Result<Action, _> = serde_json::from_value(json!({"type": "rm_rf", "path": "/"}));
        assert!(r.is_err());
    }

    #[test]
    fn set_timer_nests_timer_config() {
        let a: Action = serde_json::from_value(json!({
            "type": "set_timer",
            "timer": {
                "name": "escalate:${event.data.id}",
                "duration": "15m",
                "onExpire": {"topic": "ticket.escalate", "data": {"id": "${event.data.id}"}}
            }
        }))
        .unwrap();
        assert_eq!(a.type_name(), "set_timer");
    }
}
