//! Dot-separated path resolution into JSON values.

use serde_json::Value;

/// Resolve a dot-separated path (`data.items.0.id`) inside a JSON value.
///
/// Objects are traversed by key, arrays by numeric index. Returns `None`
/// when any step is missing or of the wrong shape.
pub fn resolve<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for step in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(step)?,
            Value::Array(items) => {
                let idx: usize = step.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Split a path into its first segment and the remainder.
///
/// `"event.data.total"` → `("event", "data.total")`; `"event"` → `("event", "")`.
pub fn split_root(path: &str) -> (&str, &str) {
    match path.find('.') {
        Some(i) => (&path[..i], &path[i + 1..]),
        None => (path, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_objects() {
        let v = json!({"data": {"order": {"total": 150}}});
        assert_eq!(resolve(&v, "data.order.total"), Some(&json!(150)));
    }

    #[test]
    fn resolves_array_indices() {
        let v = json!({"items": [{"id": "a"}, {"id": "b"}]});
        assert_eq!(resolve(&v, "items.1.id"), Some(&json!("b")));
    }

    #[test]
    fn missing_path_is_none() {
        let v = json!({"a": 1});
        assert_eq!(resolve(&v, "a.b"), None);
        assert_eq!(resolve(&v, "x"), None);
    }

    #[test]
    fn empty_path_is_root() {
        let v = json!({"a": 1});
        assert_eq!(resolve(&v, ""), Some(&v));
    }

    #[test]
    fn split_root_variants() {
        assert_eq!(split_root("event.data.total"), ("event", "data.total"));
        assert_eq!(split_root("event"), ("event", ""));
    }
}
