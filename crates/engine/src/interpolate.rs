//! `${path}` string interpolation and `{ "ref": … }` substitution.

use serde_json::{Map, Value};
use tracing::debug;

use crate::context::EvalContext;

/// Interpolate `${path}` placeholders in a string from the context.
///
/// A missing path resolves to the empty string. `$$` is a literal `$`;
/// an unterminated `${` is kept verbatim.
pub fn interpolate_string(input: &str, ctx: &EvalContext) -> String {
    let mut out = String::with_capacity(input.len());
    let mut remaining = input;

    while let Some(pos) = remaining.find('$') {
        out.push_str(&remaining[..pos]);
        let after = &remaining[pos + 1..];
        if let Some(rest) = after.strip_prefix('$') {
            out.push('$');
            remaining = rest;
        } else if let Some(body) = after.strip_prefix('{') {
            match body.find('}') {
                Some(end) => {
                    let path = &body[..end];
                    match ctx.lookup(path) {
                        Some(value) => out.push_str(&value_to_string(&value)),
                        None => {
                            debug!(path = %path, "interpolation path not found");
                        }
                    }
                    remaining = &body[end + 1..];
                }
                None => {
                    out.push_str("${");
                    out.push_str(body);
                    remaining = "";
                }
            }
        } else {
            out.push('$');
            remaining = after;
        }
    }

    out.push_str(remaining);
    out
}

/// Deep-substitute a JSON value against the context.
///
/// Strings interpolate `${path}` placeholders; an object whose only key is
/// `ref` is replaced by the referenced subtree (null when missing); other
/// objects and arrays recurse.
pub fn interpolate_value(input: &Value, ctx: &EvalContext) -> Value {
    match input {
        Value::String(s) => Value::String(interpolate_string(s, ctx)),
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| interpolate_value(v, ctx)).collect())
        }
        Value::Object(map) => {
            if let Some(path) = ref_path(map) {
                return ctx.lookup(path).unwrap_or(Value::Null);
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), interpolate_value(v, ctx)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

/// Interpolate every value of an event-data map.
pub fn interpolate_map(input: &Map<String, Value>, ctx: &EvalContext) -> Map<String, Value> {
    input
        .iter()
        .map(|(k, v)| (interpolate_string(k, ctx), interpolate_value(v, ctx)))
        .collect()
}

fn ref_path(map: &Map<String, Value>) -> Option<&str> {
    if map.len() != 1 {
        return None;
    }
    map.get("ref").and_then(|v| v.as_str())
}

/// Render a JSON value for string positions: strings stay raw, null is
/// empty, everything else is compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FactLookup;
    use reflex_core::Event;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> EvalContext {
        let data = [
            ("id".to_string(), json!("X")),
            ("total".to_string(), json!(150)),
        ]
        .into_iter()
        .collect();
        let event = Event::new("order.created", data, "test");
        let lookup: FactLookup = Arc::new(|_| None);
        EvalContext::new(Some(event), lookup, Map::new(), "c1")
    }

    #[test]
    fn interpolates_paths() {
        let ctx = ctx();
        assert_eq!(
            interpolate_string("orders:high:${event.data.id}", &ctx),
            "orders:high:X"
        );
        assert_eq!(
            interpolate_string("total=${event.data.total}", &ctx),
            "total=150"
        );
    }

    #[test]
    fn missing_path_is_empty() {
        let ctx = ctx();
        assert_eq!(interpolate_string("v=${event.data.nope}!", &ctx), "v=!");
    }

    #[test]
    fn dollar_escape() {
        let ctx = ctx();
        assert_eq!(interpolate_string("cost: $$${event.data.total}", &ctx), "cost: $150");
        assert_eq!(interpolate_string("$$", &ctx), "$");
    }

    #[test]
    fn unterminated_placeholder_kept() {
        let ctx = ctx();
        assert_eq!(interpolate_string("${event.data.id", &ctx), "${event.data.id");
    }

    #[test]
    fn lone_dollar_passes_through() {
        let ctx = ctx();
        assert_eq!(interpolate_string("a$b", &ctx), "a$b");
    }

    #[test]
    fn ref_object_substitutes_subtree() {
        let ctx = ctx();
        let v = json!({"order": {"ref": "event.data"}, "label": "order ${event.data.id}"});
        let out = interpolate_value(&v, &ctx);
        assert_eq!(out["order"]["total"], json!(150));
        assert_eq!(out["label"], json!("order X"));
    }

    #[test]
    fn missing_ref_becomes_null() {
        let ctx = ctx();
        let out = interpolate_value(&json!({"ref": "event.data.nope"}), &ctx);
        assert_eq!(out, Value::Null);
    }

    #[test]
    fn multi_key_object_with_ref_key_recurses() {
        let ctx = ctx();
        let v = json!({"ref": "event.data.id", "other": 1});
        let out = interpolate_value(&v, &ctx);
        // Not a pure ref object, so it is treated as plain data.
        assert_eq!(out["other"], json!(1));
    }
}
