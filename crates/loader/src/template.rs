//! Rule templates: parameterized blueprints instantiated into rules.
//!
//! Placeholders come in two forms: an exact `"{{name}}"` string is replaced
//! by the parameter value of any type; a mixed `"pre-{{name}}-post"` string
//! interpolates the rendered value. Placeholders referencing undeclared
//! parameters are rejected when the template is built, missing required
//! parameters and type mismatches at instantiation time.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use reflex_core::{ensure_valid, EngineError, RuleInput};

use crate::document::parse_rule_value;

/// Declared parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Any,
}

impl ParamType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Object => value.is_object(),
            ParamType::Array => value.is_array(),
            ParamType::Any => true,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Object => "object",
            ParamType::Array => "array",
            ParamType::Any => "any",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TemplateParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Regex a string parameter value must match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleTemplate {
    pub template_id: String,
    #[serde(default)]
    pub parameters: Vec<TemplateParameter>,
    pub blueprint: Value,
}

impl RuleTemplate {
    /// Build a template from its decoded value, checking that every
    /// placeholder in the blueprint names a declared parameter.
    pub fn from_value(raw: Value) -> Result<Self, EngineError> {
        let template: RuleTemplate = serde_json::from_value(raw)
            .map_err(|e| EngineError::Validation(format!("invalid template: {}", e)))?;

        if template.template_id.trim().is_empty() {
            return Err(EngineError::Validation("templateId must not be empty".to_string()));
        }
        for parameter in &template.parameters {
            if let Some(pattern) = &parameter.validate {
                regex::Regex::new(pattern).map_err(|e| {
                    EngineError::Validation(format!(
                        "parameter '{}' has invalid validate pattern: {}",
                        parameter.name, e
                    ))
                })?;
            }
        }

        let declared: HashSet<&str> =
            template.parameters.iter().map(|p| p.name.as_str()).collect();
        let mut referenced = HashSet::new();
        collect_placeholders(&template.blueprint, &mut referenced);
        for name in &referenced {
            if !declared.contains(name.as_str()) {
                return Err(EngineError::Validation(format!(
                    "blueprint references undeclared parameter '{}'",
                    name
                )));
            }
        }

        Ok(template)
    }

    /// Instantiate the blueprint with concrete parameter values.
    pub fn instantiate(&self, provided: &Map<String, Value>) -> Result<RuleInput, EngineError> {
        let mut resolved: HashMap<&str, Value> = HashMap::new();
        for parameter in &self.parameters {
            let value = match provided.get(&parameter.name) {
                Some(value) => value.clone(),
                None => parameter.default.clone().ok_or_else(|| {
                    EngineError::Validation(format!(
                        "missing required parameter '{}'",
                        parameter.name
                    ))
                })?,
            };
            if !parameter.param_type.accepts(&value) {
                return Err(EngineError::Validation(format!(
                    "parameter '{}' expects {}, got {}",
                    parameter.name,
                    parameter.param_type.label(),
                    value_type(&value)
                )));
            }
            if let (Some(pattern), Some(s)) = (&parameter.validate, value.as_str()) {
                let regex = regex::Regex::new(pattern)
                    .map_err(|e| EngineError::Validation(format!("invalid validate pattern: {}", e)))?;
                if !regex.is_match(s) {
                    return Err(EngineError::Validation(format!(
                        "parameter '{}' value '{}' fails validation '{}'",
                        parameter.name, s, pattern
                    )));
                }
            }
            resolved.insert(parameter.name.as_str(), value);
        }

        for name in provided.keys() {
            if !self.parameters.iter().any(|p| &p.name == name) {
                return Err(EngineError::Validation(format!(
                    "unknown parameter '{}'",
                    name
                )));
            }
        }

        let substituted = substitute(&self.blueprint, &resolved);
        let rule = parse_rule_value(substituted)?;
        ensure_valid(&rule)?;
        Ok(rule)
    }
}

/// Collect `{{name}}` placeholder names from every string in the blueprint.
fn collect_placeholders(value: &Value, out: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            let mut rest = s.as_str();
            while let Some(start) = rest.find("{{") {
                let Some(end) = rest[start + 2..].find("}}") else { break };
                out.insert(rest[start + 2..start + 2 + end].trim().to_string());
                rest = &rest[start + 2 + end + 2..];
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_placeholders(item, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_placeholders(item, out);
            }
        }
        _ => {}
    }
}

fn substitute(value: &Value, params: &HashMap<&str, Value>) -> Value {
    match value {
        Value::String(s) => substitute_string(s, params),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, params)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (render_string(k, params), substitute(v, params)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute_string(s: &str, params: &HashMap<&str, Value>) -> Value {
    // Exact placeholder: the parameter value passes through with its type.
    if let Some(inner) = s.strip_prefix("{{").and_then(|rest| rest.strip_suffix("}}")) {
        let name = inner.trim();
        if !inner.contains("{{") {
            if let Some(value) = params.get(name) {
                return value.clone();
            }
        }
    }
    Value::String(render_string(s, params))
}

fn render_string(s: &str, params: &HashMap<&str, Value>) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("}}") {
            Some(end) => {
                let name = rest[start + 2..start + 2 + end].trim();
                match params.get(name) {
                    Some(value) => out.push_str(&render_value(value)),
                    None => {
                        out.push_str("{{");
                        out.push_str(&rest[start + 2..start + 2 + end + 2]);
                    }
                }
                rest = &rest[start + 2 + end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
