//! Structural validation of rule inputs beyond what serde enforces.

use std::str::FromStr;

use serde_json::Value;

use crate::action::Action;
use crate::condition::{Condition, ConditionValue, Operator};
use crate::error::EngineError;
use crate::rule::{RuleInput, Trigger};
use crate::temporal::TemporalPattern;
use crate::timer::TimerConfig;

/// A single validation finding, with a path into the rule document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validate a rule input, returning all findings (empty = valid).
pub fn validate_rule(input: &RuleInput) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if input.id.trim().is_empty() {
        issues.push(issue("id", "must not be empty"));
    }
    if input.name.trim().is_empty() {
        issues.push(issue("name", "must not be empty"));
    }

    validate_trigger(&input.trigger, &mut issues);

    for (i, condition) in input.conditions.iter().enumerate() {
        validate_condition(condition, &format!("conditions[{}]", i), &mut issues);
    }

    if input.actions.is_empty() {
        issues.push(issue("actions", "rule must have at least one action"));
    }
    for (i, action) in input.actions.iter().enumerate() {
        validate_action(action, &format!("actions[{}]", i), &mut issues);
    }

    issues
}

/// Validate and convert the findings into an `EngineError::Validation`.
pub fn ensure_valid(input: &RuleInput) -> Result<(), EngineError> {
    let issues = validate_rule(input);
    if issues.is_empty() {
        return Ok(());
    }
    let summary = issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Err(EngineError::Validation(format!(
        "rule '{}': {}",
        input.id, summary
    )))
}

fn issue(path: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        message: message.to_string(),
    }
}

fn validate_trigger(trigger: &Trigger, issues: &mut Vec<ValidationIssue>) {
    match trigger {
        Trigger::Event { topic } => {
            if topic.trim().is_empty() {
                issues.push(issue("trigger.topic", "must not be empty"));
            }
        }
        Trigger::Fact { pattern } => {
            if pattern.trim().is_empty() {
                issues.push(issue("trigger.pattern", "must not be empty"));
            }
        }
        Trigger::Timer { name } => {
            if name.trim().is_empty() {
                issues.push(issue("trigger.name", "must not be empty"));
            }
        }
        Trigger::Temporal { pattern } => validate_temporal(pattern, issues),
    }
}

fn validate_temporal(pattern: &TemporalPattern, issues: &mut Vec<ValidationIssue>) {
    match pattern {
        TemporalPattern::Sequence { events, within, .. } => {
            if events.len() < 2 {
                issues.push(issue("trigger.pattern.events", "sequence needs at least two matchers"));
            }
            if *within == 0 {
                issues.push(issue("trigger.pattern.within", "window must be positive"));
            }
        }
        TemporalPattern::Absence { within, .. } => {
            if *within == 0 {
                issues.push(issue("trigger.pattern.within", "window must be positive"));
            }
        }
        TemporalPattern::Count { window, .. } => {
            if *window == 0 {
                issues.push(issue("trigger.pattern.window", "window must be positive"));
            }
        }
        TemporalPattern::Aggregate { window, field, .. } => {
            if *window == 0 {
                issues.push(issue("trigger.pattern.window", "window must be positive"));
            }
            if field.trim().is_empty() {
                issues.push(issue("trigger.pattern.field", "must not be empty"));
            }
        }
    }
}

fn validate_condition(condition: &Condition, path: &str, issues: &mut Vec<ValidationIssue>) {
    if condition.operator.needs_value() && condition.value.is_none() {
        issues.push(issue(
            path,
            &format!("operator '{}' requires a value", condition.operator.as_str()),
        ));
    }

    if let Some(ConditionValue::Literal(literal)) = &condition.value {
        match condition.operator {
            Operator::Matches => {
                if let Value::String(s) = literal {
                    if regex::Regex::new(s).is_err() {
                        issues.push(issue(path, &format!("invalid regex '{}'", s)));
                    }
                } else {
                    issues.push(issue(path, "'matches' requires a string pattern"));
                }
            }
            Operator::In | Operator::NotIn => {
                if !literal.is_array() {
                    issues.push(issue(
                        path,
                        &format!("'{}' requires a sequence value", condition.operator.as_str()),
                    ));
                }
            }
            _ => {}
        }
    }
}

fn validate_timer(config: &TimerConfig, path: &str, issues: &mut Vec<ValidationIssue>) {
    if config.name.trim().is_empty() {
        issues.push(issue(&format!("{}.name", path), "must not be empty"));
    }
    match (&config.duration, &config.cron) {
        (None, None) => {
            issues.push(issue(path, "timer needs either a duration or a cron expression"));
        }
        (Some(_), Some(_)) => {
            issues.push(issue(path, "timer cannot have both duration and cron"));
        }
        (Some(spec), None) => {
            // Interpolated durations are only checkable at execution time.
            let is_templated = matches!(spec, crate::timer::DurationSpec::Human(s) if s.contains("${"));
            if !is_templated {
                if let Err(e) = spec.to_duration() {
                    issues.push(issue(&format!("{}.duration", path), &e.to_string()));
                }
            }
        }
        (None, Some(expr)) => {
            if cron::Schedule::from_str(&normalize_cron(expr)).is_err() {
                issues.push(issue(
                    &format!("{}.cron", path),
                    &format!("invalid cron expression '{}'", expr),
                ));
            }
        }
    }
    if config.on_expire.topic.trim().is_empty() {
        issues.push(issue(&format!("{}.onExpire.topic", path), "must not be empty"));
    }
}

fn validate_action(action: &Action, path: &str, issues: &mut Vec<ValidationIssue>) {
    match action {
        Action::SetFact { key, .. } | Action::DeleteFact { key } => {
            if key.trim().is_empty() {
                issues.push(issue(&format!("{}.key", path), "must not be empty"));
            }
        }
        Action::EmitEvent { topic, .. } => {
            if topic.trim().is_empty() {
                issues.push(issue(&format!("{}.topic", path), "must not be empty"));
            }
        }
        Action::SetTimer { timer } => validate_timer(timer, &format!("{}.timer", path), issues),
        Action::CancelTimer { name } => {
            if name.trim().is_empty() {
                issues.push(issue(&format!("{}.name", path), "must not be empty"));
            }
        }
        Action::CallService { service, method, .. } => {
            if service.trim().is_empty() {
                issues.push(issue(&format!("{}.service", path), "must not be empty"));
            }
            if method.trim().is_empty() {
                issues.push(issue(&format!("{}.method", path), "must not be empty"));
            }
        }
        Action::Log { .. } => {}
        Action::Conditional { conditions, then, otherwise } => {
            for (i, c) in conditions.iter().enumerate() {
                validate_condition(c, &format!("{}.conditions[{}]", path, i), issues);
            }
            for (i, a) in then.iter().enumerate() {
                validate_action(a, &format!("{}.then[{}]", path, i), issues);
            }
            if let Some(actions) = otherwise {
                for (i, a) in actions.iter().enumerate() {
                    validate_action(a, &format!("{}.else[{}]", path, i), issues);
                }
            }
        }
        Action::TryCatch { try_actions, catch, finally } => {
            for (i, a) in try_actions.iter().enumerate() {
                validate_action(a, &format!("{}.try[{}]", path, i), issues);
            }
            if let Some(catch) = catch {
                for (i, a) in catch.actions.iter().enumerate() {
                    validate_action(a, &format!("{}.catch[{}]", path, i), issues);
                }
            }
            if let Some(actions) = finally {
                for (i, a) in actions.iter().enumerate() {
                    validate_action(a, &format!("{}.finally[{}]", path, i), issues);
                }
            }
        }
    }
}

/// Normalize a 5-field cron expression to 6-field by prepending "0 " for
/// seconds. The `cron` crate requires 6 fields; user documents use standard
/// 5-field cron.
pub fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}
