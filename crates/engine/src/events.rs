//! Bounded event store with topic and correlation indexes.
//!
//! Events land in a fixed-capacity ring; when full, the oldest event is
//! evicted from the ring and from every secondary index atomically.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use reflex_core::Event;

struct Inner {
    ring: VecDeque<Event>,
    by_id: HashMap<String, Event>,
    /// Topic → insertion-ordered event ids.
    by_topic: HashMap<String, Vec<String>>,
    /// Correlation id → insertion-ordered event ids.
    by_correlation: HashMap<String, Vec<String>>,
}

pub struct EventStore {
    inner: RwLock<Inner>,
    max_events: usize,
}

impl EventStore {
    pub fn new(max_events: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                ring: VecDeque::with_capacity(max_events.min(1024)),
                by_id: HashMap::new(),
                by_topic: HashMap::new(),
                by_correlation: HashMap::new(),
            }),
            max_events: max_events.max(1),
        }
    }

    /// Append an event, evicting the oldest if the ring is full.
    pub fn store(&self, event: Event) {
        let mut inner = self.inner.write().expect("events lock poisoned");

        if inner.ring.len() == self.max_events {
            if let Some(oldest) = inner.ring.pop_front() {
                Self::unindex(&mut inner, &oldest);
            }
        }

        inner.by_id.insert(event.id.clone(), event.clone());
        inner
            .by_topic
            .entry(event.topic.clone())
            .or_default()
            .push(event.id.clone());
        if let Some(cid) = &event.correlation_id {
            inner
                .by_correlation
                .entry(cid.clone())
                .or_default()
                .push(event.id.clone());
        }
        inner.ring.push_back(event);
    }

    pub fn get(&self, id: &str) -> Option<Event> {
        self.inner
            .read()
            .expect("events lock poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    /// All stored events sharing a correlation id, in store order.
    pub fn by_correlation(&self, correlation_id: &str) -> Vec<Event> {
        let inner = self.inner.read().expect("events lock poisoned");
        inner
            .by_correlation
            .get(correlation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Events on a topic within `[from, to]`, in store order.
    pub fn in_time_range(
        &self,
        topic: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<Event> {
        let inner = self.inner.read().expect("events lock poisoned");
        inner
            .by_topic
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .filter(|e| e.timestamp >= from && e.timestamp <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Count of events on a topic within the trailing window.
    /// The lower bound `now - window_ms` is inclusive.
    pub fn count_in_window(&self, topic: &str, window_ms: u64) -> usize {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms as i64);
        let inner = self.inner.read().expect("events lock poisoned");
        inner
            .by_topic
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .filter(|e| e.timestamp >= cutoff)
                    .count()
            })
            .unwrap_or(0)
    }

    /// All events within the trailing window, in store order. Used by the
    /// temporal matcher for patterned-topic windows.
    pub fn recent(&self, window_ms: u64) -> Vec<Event> {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms as i64);
        let inner = self.inner.read().expect("events lock poisoned");
        inner
            .ring
            .iter()
            .filter(|e| e.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Remove events older than the given age. Returns how many were pruned.
    pub fn prune(&self, older_than_ms: u64) -> usize {
        let cutoff = Utc::now() - Duration::milliseconds(older_than_ms as i64);
        let mut inner = self.inner.write().expect("events lock poisoned");
        let mut pruned = 0;
        while let Some(front) = inner.ring.front() {
            if front.timestamp >= cutoff {
                break;
            }
            let oldest = inner.ring.pop_front().expect("front checked above");
            Self::unindex(&mut inner, &oldest);
            pruned += 1;
        }
        pruned
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("events lock poisoned").ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unindex(inner: &mut Inner, event: &Event) {
        inner.by_id.remove(&event.id);
        if let Some(ids) = inner.by_topic.get_mut(&event.topic) {
            ids.retain(|id| id != &event.id);
            if ids.is_empty() {
                inner.by_topic.remove(&event.topic);
            }
        }
        if let Some(cid) = &event.correlation_id {
            if let Some(ids) = inner.by_correlation.get_mut(cid) {
                ids.retain(|id| id != &event.id);
                if ids.is_empty() {
                    inner.by_correlation.remove(cid);
                }
            }
        }
    }
}
