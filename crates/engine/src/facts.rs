//! Keyed fact store with versioning, pattern queries, and change callbacks.
//!
//! A store-wide write lock serializes writes, so per-key versions are
//! monotonic. Subscriber callbacks fire after the write is committed and
//! visible to `get`. Equal-value writes still bump the version and notify;
//! the store treats every committed `set` as a change.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use reflex_core::{pattern, EngineError, Fact, FactChange, FactChangeKind};

/// Callback invoked after a committed fact change.
pub type FactSubscriber = Arc<dyn Fn(&FactChange) + Send + Sync>;

/// Handle for removing a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

pub struct FactStore {
    facts: RwLock<HashMap<String, Fact>>,
    subscribers: RwLock<Vec<(SubscriptionId, String, FactSubscriber)>>,
    next_sub_id: AtomicU64,
}

impl FactStore {
    pub fn new() -> Self {
        Self {
            facts: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
        }
    }

    /// Get the current value of a fact.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.facts
            .read()
            .expect("facts lock poisoned")
            .get(key)
            .map(|f| f.value.clone())
    }

    /// Get a fact with its metadata.
    pub fn get_full(&self, key: &str) -> Option<Fact> {
        self.facts
            .read()
            .expect("facts lock poisoned")
            .get(key)
            .cloned()
    }

    /// Write a fact, bumping its version, and notify subscribers.
    ///
    /// Returns the committed fact. Fails with a validation error for empty
    /// keys; total otherwise.
    pub fn set(
        &self,
        key: &str,
        value: Value,
        source: Option<&str>,
    ) -> Result<Fact, EngineError> {
        if key.trim().is_empty() {
            return Err(EngineError::Validation("fact key must not be empty".to_string()));
        }

        let fact = {
            let mut facts = self.facts.write().expect("facts lock poisoned");
            let version = facts.get(key).map(|f| f.version + 1).unwrap_or(1);
            let fact = Fact {
                key: key.to_string(),
                value,
                updated_at: Utc::now(),
                version,
                source: source.map(|s| s.to_string()),
            };
            facts.insert(key.to_string(), fact.clone());
            fact
        };

        self.notify(&FactChange { kind: FactChangeKind::Set, fact: fact.clone() });
        Ok(fact)
    }

    /// Delete a fact. Returns whether a fact was removed.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self
            .facts
            .write()
            .expect("facts lock poisoned")
            .remove(key);

        match removed {
            Some(fact) => {
                self.notify(&FactChange { kind: FactChangeKind::Deleted, fact });
                true
            }
            None => false,
        }
    }

    /// All facts whose key matches the pattern, ordered by key.
    pub fn query(&self, pattern_str: &str) -> Vec<Fact> {
        let facts = self.facts.read().expect("facts lock poisoned");
        let mut matched: Vec<Fact> = facts
            .values()
            .filter(|f| pattern::matches(pattern_str, &f.key))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.key.cmp(&b.key));
        matched
    }

    /// Subscribe to committed changes on keys matching the pattern.
    pub fn subscribe(&self, pattern_str: &str, callback: FactSubscriber) -> SubscriptionId {
        let id = SubscriptionId(self.next_sub_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("subscribers lock poisoned")
            .push((id, pattern_str.to_string(), callback));
        id
    }

    /// Remove a subscription. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.write().expect("subscribers lock poisoned");
        let before = subs.len();
        subs.retain(|(sub_id, _, _)| *sub_id != id);
        subs.len() != before
    }

    pub fn len(&self) -> usize {
        self.facts.read().expect("facts lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all facts, ordered by key.
    pub fn snapshot(&self) -> Vec<Fact> {
        let facts = self.facts.read().expect("facts lock poisoned");
        let mut all: Vec<Fact> = facts.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Drop all facts without notifying subscribers (restore/teardown path).
    pub fn clear(&self) {
        self.facts.write().expect("facts lock poisoned").clear();
    }

    /// Restore a fact verbatim, preserving its metadata (no notifications).
    pub fn restore(&self, fact: Fact) {
        self.facts
            .write()
            .expect("facts lock poisoned")
            .insert(fact.key.clone(), fact);
    }

    fn notify(&self, change: &FactChange) {
        let subs = self.subscribers.read().expect("subscribers lock poisoned");
        for (_, pattern_str, callback) in subs.iter() {
            if pattern::matches(pattern_str, &change.fact.key) {
                if catch_unwind(AssertUnwindSafe(|| callback(change))).is_err() {
                    warn!(key = %change.fact.key, "fact subscriber panicked");
                }
            }
        }
    }
}

impl Default for FactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn set_then_get() {
        let store = FactStore::new();
        store.set("customer:42:tier", json!("gold"), None).unwrap();
        assert_eq!(store.get("customer:42:tier"), Some(json!("gold")));
    }

    #[test]
    fn version_is_monotonic_per_key() {
        let store = FactStore::new();
        let f1 = store.set("k", json!(1), None).unwrap();
        let f2 = store.set("k", json!(2), None).unwrap();
        let f3 = store.set("k", json!(2), None).unwrap(); // equal value still bumps
        assert_eq!(f1.version, 1);
        assert_eq!(f2.version, 2);
        assert_eq!(f3.version, 3);
    }

    #[test]
    fn empty_key_rejected() {
        let store = FactStore::new();
        assert!(matches!(
            store.set("  ", json!(1), None),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn delete_removes_metadata() {
        let store = FactStore::new();
        store.set("k", json!(1), None).unwrap();
        assert!(store.delete("k"));
        assert!(store.get_full("k").is_none());
        assert!(!store.delete("k"));
    }

    #[test]
    fn query_by_pattern() {
        let store = FactStore::new();
        store.set("orders:high:A", json!(true), None).unwrap();
        store.set("orders:high:B", json!(true), None).unwrap();
        store.set("orders:low:C", json!(true), None).unwrap();

        let high = store.query("orders:high:*");
        assert_eq!(high.len(), 2);
        assert_eq!(high[0].key, "orders:high:A");

        let all = store.query("orders:**");
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn subscribers_fire_after_commit() {
        let store = Arc::new(FactStore::new());
        let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));

        let store_ref = Arc::clone(&store);
        let seen_ref = Arc::clone(&seen);
        store.subscribe(
            "counter:*",
            Arc::new(move |change| {
                // The committed write must already be visible to `get`.
                let visible = store_ref.get(&change.fact.key);
                assert_eq!(visible, Some(change.fact.value.clone()));
                seen_ref
                    .lock()
                    .unwrap()
                    .push((change.fact.key.clone(), change.fact.version));
            }),
        );

        store.set("counter:a", json!(1), None).unwrap();
        store.set("counter:a", json!(2), None).unwrap();
        store.set("other:b", json!(3), None).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[("counter:a".to_string(), 1), ("counter:a".to_string(), 2)]);
    }

    #[test]
    fn subscriber_observes_delete() {
        let store = FactStore::new();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let deleted_ref = Arc::clone(&deleted);
        store.subscribe(
            "**",
            Arc::new(move |change| {
                if change.kind == FactChangeKind::Deleted {
                    deleted_ref.lock().unwrap().push(change.fact.key.clone());
                }
            }),
        );
        store.set("k", json!(1), None).unwrap();
        store.delete("k");
        assert_eq!(deleted.lock().unwrap().as_slice(), &["k".to_string()]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = FactStore::new();
        let count = Arc::new(AtomicU64::new(0));
        let count_ref = Arc::clone(&count);
        let id = store.subscribe(
            "**",
            Arc::new(move |_| {
                count_ref.fetch_add(1, Ordering::SeqCst);
            }),
        );
        store.set("a", json!(1), None).unwrap();
        assert!(store.unsubscribe(id));
        store.set("a", json!(2), None).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let store = FactStore::new();
        let reached = Arc::new(AtomicU64::new(0));
        store.subscribe("**", Arc::new(|_| panic!("boom")));
        let reached_ref = Arc::clone(&reached);
        store.subscribe(
            "**",
            Arc::new(move |_| {
                reached_ref.fetch_add(1, Ordering::SeqCst);
            }),
        );
        store.set("k", json!(1), None).unwrap();
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}
