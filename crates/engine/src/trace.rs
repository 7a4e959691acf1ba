//! Trace collector: bounded ring of trace entries with synchronous fan-out.
//!
//! Uses `std::sync::RwLock` so it can be recorded into from both async
//! (tokio) and sync contexts. Subscribers are notified in registration
//! order before `record` returns; a panicking subscriber is logged and
//! skipped, never blocking the rest.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

use reflex_core::{TraceEntry, TraceFilter};

/// Callback invoked synchronously for each recorded entry.
pub type TraceSubscriber = Arc<dyn Fn(&TraceEntry) + Send + Sync>;

/// Handle for removing a trace subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSubscriptionId(u64);

pub struct TraceCollector {
    entries: RwLock<VecDeque<TraceEntry>>,
    subscribers: RwLock<Vec<(TraceSubscriptionId, TraceSubscriber)>>,
    max_entries: usize,
    enabled: AtomicBool,
    next_sub_id: AtomicU64,
}

impl TraceCollector {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(max_entries.min(1024))),
            subscribers: RwLock::new(Vec::new()),
            max_entries: max_entries.max(1),
            enabled: AtomicBool::new(true),
            next_sub_id: AtomicU64::new(1),
        }
    }

    /// Record an entry and fan it out to subscribers. No-op when disabled.
    pub fn record(&self, entry: TraceEntry) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        {
            let mut entries = self.entries.write().expect("trace lock poisoned");
            if entries.len() == self.max_entries {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        let subs = self.subscribers.read().expect("trace subscribers lock poisoned");
        for (_, callback) in subs.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(&entry))).is_err() {
                warn!(entry_id = %entry.id, "trace subscriber panicked");
            }
        }
    }

    /// Query entries matching a filter, newest-first, bounded by `limit`
    /// (default 100).
    pub fn query(&self, filter: &TraceFilter) -> Vec<TraceEntry> {
        let entries = self.entries.read().expect("trace lock poisoned");
        let limit = filter.limit.unwrap_or(100);
        entries
            .iter()
            .rev()
            .filter(|e| filter.accepts(e))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn subscribe(&self, callback: TraceSubscriber) -> TraceSubscriptionId {
        let id = TraceSubscriptionId(self.next_sub_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .expect("trace subscribers lock poisoned")
            .push((id, callback));
        id
    }

    pub fn unsubscribe(&self, id: TraceSubscriptionId) -> bool {
        let mut subs = self.subscribers.write().expect("trace subscribers lock poisoned");
        let before = subs.len();
        subs.retain(|(sub_id, _)| *sub_id != id);
        subs.len() != before
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("trace lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::TraceEntryType;
    use std::sync::Mutex;

    #[test]
    fn record_and_query() {
        let collector = TraceCollector::new(100);
        collector.record(TraceEntry::new(TraceEntryType::RuleTriggered).with_rule("r1", "R"));
        collector.record(TraceEntry::new(TraceEntryType::RuleExecuted).with_rule("r1", "R"));

        let all = collector.query(&TraceFilter::default());
        assert_eq!(all.len(), 2);
        // Newest first.
        assert_eq!(all[0].entry_type, TraceEntryType::RuleExecuted);
    }

    #[test]
    fn ring_never_exceeds_capacity() {
        let collector = TraceCollector::new(3);
        for _ in 0..10 {
            collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        }
        assert_eq!(collector.len(), 3);
    }

    #[test]
    fn fifo_eviction_drops_oldest() {
        let collector = TraceCollector::new(2);
        let first = TraceEntry::new(TraceEntryType::EventEmitted);
        let first_id = first.id.clone();
        collector.record(first);
        collector.record(TraceEntry::new(TraceEntryType::FactChanged));
        collector.record(TraceEntry::new(TraceEntryType::TimerSet));

        let all = collector.query(&TraceFilter::default());
        assert!(all.iter().all(|e| e.id != first_id));
    }

    #[test]
    fn disabled_collector_drops_records() {
        let collector = TraceCollector::new(10);
        let count = Arc::new(AtomicU64::new(0));
        let count_ref = Arc::clone(&count);
        collector.subscribe(Arc::new(move |_| {
            count_ref.fetch_add(1, Ordering::SeqCst);
        }));

        collector.disable();
        assert!(!collector.is_enabled());
        collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        assert!(collector.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        collector.enable();
        collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        assert_eq!(collector.len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribers_notified_in_registration_order() {
        let collector = TraceCollector::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order_ref = Arc::clone(&order);
            collector.subscribe(Arc::new(move |_| {
                order_ref.lock().unwrap().push(tag);
            }));
        }
        collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        assert_eq!(order.lock().unwrap().as_slice(), &["first", "second", "third"]);
    }

    #[test]
    fn panicking_subscriber_does_not_block_rest() {
        let collector = TraceCollector::new(10);
        collector.subscribe(Arc::new(|_| panic!("bad subscriber")));
        let reached = Arc::new(AtomicU64::new(0));
        let reached_ref = Arc::clone(&reached);
        collector.subscribe(Arc::new(move |_| {
            reached_ref.fetch_add(1, Ordering::SeqCst);
        }));
        collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn query_filters_by_rule_and_type() {
        let collector = TraceCollector::new(10);
        collector.record(TraceEntry::new(TraceEntryType::RuleTriggered).with_rule("r1", "R1"));
        collector.record(TraceEntry::new(TraceEntryType::RuleTriggered).with_rule("r2", "R2"));
        collector.record(TraceEntry::new(TraceEntryType::RuleSkipped).with_rule("r1", "R1"));

        let filter = TraceFilter {
            rule_id: Some("r1".to_string()),
            types: Some(vec![TraceEntryType::RuleTriggered]),
            ..Default::default()
        };
        let hits = collector.query(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rule_id.as_deref(), Some("r1"));
    }

    #[test]
    fn unsubscribe_removes_callback() {
        let collector = TraceCollector::new(10);
        let count = Arc::new(AtomicU64::new(0));
        let count_ref = Arc::clone(&count);
        let id = collector.subscribe(Arc::new(move |_| {
            count_ref.fetch_add(1, Ordering::SeqCst);
        }));
        collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        assert!(collector.unsubscribe(id));
        collector.record(TraceEntry::new(TraceEntryType::EventEmitted));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
