//! Per-firing evaluation context.
//!
//! Built once per rule firing and never mutated afterwards; catch/alias
//! bindings construct a child context. All value resolution funnels through
//! [`EvalContext::lookup`].

use std::sync::Arc;

use serde_json::{Map, Value};

use reflex_core::{path, Event};

/// Capability to read the current value of a fact by exact key.
pub type FactLookup = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Transient context for one rule firing.
#[derive(Clone)]
pub struct EvalContext {
    event: Option<Event>,
    /// Cached JSON view of the event for path resolution.
    event_value: Value,
    fact_lookup: FactLookup,
    bindings: Map<String, Value>,
    correlation_id: String,
}

impl EvalContext {
    pub fn new(
        event: Option<Event>,
        fact_lookup: FactLookup,
        bindings: Map<String, Value>,
        correlation_id: impl Into<String>,
    ) -> Self {
        let event_value = event
            .as_ref()
            .map(|e| e.to_value())
            .unwrap_or(Value::Null);
        Self {
            event,
            event_value,
            fact_lookup,
            bindings,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn event(&self) -> Option<&Event> {
        self.event.as_ref()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    /// Child context with one extra binding (used for `catch.as`).
    pub fn with_binding(&self, key: &str, value: Value) -> Self {
        let mut child = self.clone();
        child.bindings.insert(key.to_string(), value);
        child
    }

    /// Resolve a context path to a value.
    ///
    /// Roots: `event.*` (fields of the triggering event), `fact.<key>`
    /// (exact fact key — the remainder of the path, dots included),
    /// `context.<key>` (binding map), or a bare binding name such as a
    /// temporal alias (`payment.amount`).
    pub fn lookup(&self, full_path: &str) -> Option<Value> {
        let (root, rest) = path::split_root(full_path);
        match root {
            "event" => path::resolve(&self.event_value, rest).cloned(),
            "fact" => {
                if rest.is_empty() {
                    None
                } else {
                    (self.fact_lookup)(rest)
                }
            }
            "context" => {
                let bindings = Value::Object(self.bindings.clone());
                path::resolve(&bindings, rest).cloned()
            }
            _ => {
                // Bare binding (temporal alias, catch binding).
                let value = self.bindings.get(root)?;
                path::resolve(value, rest).cloned()
            }
        }
    }

    /// Read the current value of a fact by exact key.
    pub fn fact(&self, key: &str) -> Option<Value> {
        (self.fact_lookup)(key)
    }
}
