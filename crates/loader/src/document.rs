//! Rule document parsing for JSON and YAML.
//!
//! YAML accepts three top-level shapes: a single rule object, a sequence of
//! rules, or `{ rules: [...] }`. A top-level `{ template: {...} }` document
//! dispatches to the template type instead. The reference shorthand
//! `"${path}"` in a condition value position normalizes to `{ ref: path }`
//! before deserialization.

use serde_json::Value;

use reflex_core::{EngineError, RuleInput};

use crate::template::RuleTemplate;

/// A parsed rule document: either concrete rules or a template.
#[derive(Debug, Clone)]
pub enum RuleDocument {
    Rules(Vec<RuleInput>),
    Template(RuleTemplate),
}

/// Document text format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFormat {
    Json,
    Yaml,
}

impl DocFormat {
    /// Guess the format from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(DocFormat::Json),
            "yml" | "yaml" => Some(DocFormat::Yaml),
            _ => None,
        }
    }
}

/// Parse a rule document from text.
pub fn parse_document(text: &str, format: DocFormat) -> Result<RuleDocument, EngineError> {
    let raw: Value = match format {
        DocFormat::Json => serde_json::from_str(text)
            .map_err(|e| EngineError::Validation(format!("invalid JSON: {}", e)))?,
        DocFormat::Yaml => serde_yaml::from_str(text)
            .map_err(|e| EngineError::Validation(format!("invalid YAML: {}", e)))?,
    };
    parse_value(raw)
}

/// Parse a rule document from an already-decoded value.
pub fn parse_value(raw: Value) -> Result<RuleDocument, EngineError> {
    match raw {
        Value::Array(items) => {
            let rules = items
                .into_iter()
                .map(parse_rule_value)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RuleDocument::Rules(rules))
        }
        Value::Object(mut map) => {
            if let Some(template) = map.remove("template") {
                if !map.is_empty() {
                    return Err(EngineError::Validation(
                        "template documents must have no sibling keys".to_string(),
                    ));
                }
                return Ok(RuleDocument::Template(RuleTemplate::from_value(template)?));
            }
            if let Some(rules) = map.remove("rules") {
                if !map.is_empty() {
                    return Err(EngineError::Validation(
                        "rules documents must have no sibling keys".to_string(),
                    ));
                }
                let Value::Array(items) = rules else {
                    return Err(EngineError::Validation("'rules' must be a sequence".to_string()));
                };
                let rules = items
                    .into_iter()
                    .map(parse_rule_value)
                    .collect::<Result<Vec<_>, _>>()?;
                return Ok(RuleDocument::Rules(rules));
            }
            parse_rule_value(Value::Object(map)).map(|r| RuleDocument::Rules(vec![r]))
        }
        other => Err(EngineError::Validation(format!(
            "rule document must be an object or sequence, got {}",
            type_name(&other)
        ))),
    }
}

/// Parse a single rule object, normalizing reference shorthands first.
pub fn parse_rule_value(mut raw: Value) -> Result<RuleInput, EngineError> {
    normalize_refs(&mut raw);
    serde_json::from_value(raw).map_err(|e| EngineError::Validation(format!("invalid rule: {}", e)))
}

/// Rewrite `"${path}"` condition values into `{ "ref": "path" }`, walking
/// nested conditional and try/catch action trees.
fn normalize_refs(rule: &mut Value) {
    let Some(obj) = rule.as_object_mut() else { return };
    if let Some(conditions) = obj.get_mut("conditions") {
        normalize_condition_list(conditions);
    }
    if let Some(actions) = obj.get_mut("actions") {
        normalize_action_list(actions);
    }
}

fn normalize_condition_list(conditions: &mut Value) {
    let Some(items) = conditions.as_array_mut() else { return };
    for condition in items {
        let Some(obj) = condition.as_object_mut() else { continue };
        if let Some(value) = obj.get_mut("value") {
            if let Some(path) = shorthand_path(value) {
                *value = serde_json::json!({ "ref": path });
            }
        }
    }
}

fn normalize_action_list(actions: &mut Value) {
    let Some(items) = actions.as_array_mut() else { return };
    for action in items {
        let Some(obj) = action.as_object_mut() else { continue };
        match obj.get("type").and_then(Value::as_str) {
            Some("conditional") => {
                if let Some(conditions) = obj.get_mut("conditions") {
                    normalize_condition_list(conditions);
                }
                if let Some(then) = obj.get_mut("then") {
                    normalize_action_list(then);
                }
                if let Some(otherwise) = obj.get_mut("else") {
                    normalize_action_list(otherwise);
                }
            }
            Some("try_catch") => {
                if let Some(try_actions) = obj.get_mut("try") {
                    normalize_action_list(try_actions);
                }
                if let Some(catch) = obj.get_mut("catch").and_then(Value::as_object_mut) {
                    if let Some(actions) = catch.get_mut("actions") {
                        normalize_action_list(actions);
                    }
                }
                if let Some(finally) = obj.get_mut("finally") {
                    normalize_action_list(finally);
                }
            }
            _ => {}
        }
    }
}

/// `"${path}"` — the whole string is one placeholder.
fn shorthand_path(value: &Value) -> Option<String> {
    let s = value.as_str()?;
    let inner = s.strip_prefix("${")?.strip_suffix('}')?;
    if inner.is_empty() || inner.contains("${") {
        return None;
    }
    Some(inner.to_string())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "object",
    }
}
