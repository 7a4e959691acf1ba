//! Metrics collector: a pure consumer of the trace stream.
//!
//! Counters and duration histograms accumulate from trace entries; gauges
//! are supplied lazily by the engine at snapshot time. The snapshot feeds
//! the Prometheus text formatter in the server crate.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use reflex_core::{TraceEntry, TraceEntryType};

use crate::trace::{TraceCollector, TraceSubscriptionId};

/// Default buckets spanning sub-millisecond to multi-second durations.
const DURATION_BUCKETS: [f64; 14] = [
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

// ── Histogram ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: DURATION_BUCKETS.to_vec(),
            counts: vec![0; DURATION_BUCKETS.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, seconds: f64) {
        self.sum += seconds;
        self.count += 1;
        for (i, bound) in self.buckets.iter().enumerate() {
            if seconds <= *bound {
                self.counts[i] += 1;
                break;
            }
        }
    }

    fn snapshot(&self, name: &str) -> HistogramSnapshot {
        let mut cumulative = 0;
        let buckets = self
            .buckets
            .iter()
            .zip(&self.counts)
            .map(|(bound, count)| {
                cumulative += count;
                BucketSnapshot { le: *bound, cumulative_count: cumulative }
            })
            .collect();
        HistogramSnapshot {
            name: name.to_string(),
            buckets,
            sum: self.sum,
            count: self.count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub le: f64,
    pub cumulative_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub name: String,
    pub buckets: Vec<BucketSnapshot>,
    pub sum: f64,
    pub count: u64,
}

// ── Counters & gauges ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct CounterSnapshot {
    pub rules_triggered_total: u64,
    pub rules_executed_total: u64,
    pub rules_skipped_total: u64,
    pub rules_failed_total: u64,
    pub events_processed_total: u64,
    pub facts_changed_total: u64,
    pub actions_executed_total: u64,
    pub actions_failed_total: u64,
    pub conditions_evaluated_total: u64,
}

/// Point-in-time gauge values supplied by the engine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GaugeSnapshot {
    pub active_rules: u64,
    pub active_facts: u64,
    pub active_timers: u64,
    pub trace_buffer_utilization: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: CounterSnapshot,
    pub gauges: GaugeSnapshot,
    pub histograms: Vec<HistogramSnapshot>,
}

// ── Collector ────────────────────────────────────────────────────────

struct Inner {
    counters: CounterSnapshot,
    evaluation: Histogram,
    condition: Histogram,
    action: Histogram,
}

pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                counters: CounterSnapshot::default(),
                evaluation: Histogram::new(),
                condition: Histogram::new(),
                action: Histogram::new(),
            }),
        }
    }

    /// Record one trace entry into counters and histograms.
    pub fn record(&self, entry: &TraceEntry) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        let duration_secs = entry.duration_ms.map(|ms| ms / 1_000.0);
        match entry.entry_type {
            TraceEntryType::RuleTriggered => inner.counters.rules_triggered_total += 1,
            TraceEntryType::RuleExecuted => {
                inner.counters.rules_executed_total += 1;
                if let Some(secs) = duration_secs {
                    inner.evaluation.observe(secs);
                }
            }
            TraceEntryType::RuleSkipped => inner.counters.rules_skipped_total += 1,
            TraceEntryType::RuleFailed => inner.counters.rules_failed_total += 1,
            TraceEntryType::ConditionEvaluated => {
                inner.counters.conditions_evaluated_total += 1;
                if let Some(secs) = duration_secs {
                    inner.condition.observe(secs);
                }
            }
            TraceEntryType::ActionCompleted => {
                inner.counters.actions_executed_total += 1;
                if let Some(secs) = duration_secs {
                    inner.action.observe(secs);
                }
            }
            TraceEntryType::ActionFailed => {
                inner.counters.actions_failed_total += 1;
                if let Some(secs) = duration_secs {
                    inner.action.observe(secs);
                }
            }
            TraceEntryType::EventEmitted => inner.counters.events_processed_total += 1,
            TraceEntryType::FactChanged => inner.counters.facts_changed_total += 1,
            _ => {}
        }
    }

    /// Subscribe this collector to a trace stream.
    pub fn attach(self: &Arc<Self>, trace: &TraceCollector) -> TraceSubscriptionId {
        let collector = Arc::clone(self);
        trace.subscribe(Arc::new(move |entry| collector.record(entry)))
    }

    /// Snapshot counters and histograms, merging in lazily-computed gauges.
    pub fn snapshot(&self, gauges: GaugeSnapshot) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        MetricsSnapshot {
            counters: inner.counters.clone(),
            gauges,
            histograms: vec![
                inner.evaluation.snapshot("evaluation_duration_seconds"),
                inner.condition.snapshot("condition_duration_seconds"),
                inner.action.snapshot("action_duration_seconds"),
            ],
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
