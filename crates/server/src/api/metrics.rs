//! Prometheus text exposition of the engine's metrics snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use reflex_engine::MetricsSnapshot;

use crate::state::AppState;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.engine.metrics_snapshot();
    (
        [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        render(&snapshot),
    )
}

/// Render a snapshot in Prometheus text format 0.0.4.
pub fn render(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::new();

    let counters = [
        ("rules_triggered_total", snapshot.counters.rules_triggered_total),
        ("rules_executed_total", snapshot.counters.rules_executed_total),
        ("rules_skipped_total", snapshot.counters.rules_skipped_total),
        ("rules_failed_total", snapshot.counters.rules_failed_total),
        ("events_processed_total", snapshot.counters.events_processed_total),
        ("facts_changed_total", snapshot.counters.facts_changed_total),
        ("actions_executed_total", snapshot.counters.actions_executed_total),
        ("actions_failed_total", snapshot.counters.actions_failed_total),
        (
            "conditions_evaluated_total",
            snapshot.counters.conditions_evaluated_total,
        ),
    ];
    for (name, value) in counters {
        out.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, value));
    }

    let gauges = [
        ("active_rules", snapshot.gauges.active_rules as f64),
        ("active_facts", snapshot.gauges.active_facts as f64),
        ("active_timers", snapshot.gauges.active_timers as f64),
        (
            "trace_buffer_utilization",
            snapshot.gauges.trace_buffer_utilization,
        ),
    ];
    for (name, value) in gauges {
        out.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, value));
    }

    for histogram in &snapshot.histograms {
        out.push_str(&format!("# TYPE {} histogram\n", histogram.name));
        for bucket in &histogram.buckets {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                histogram.name, bucket.le, bucket.cumulative_count
            ));
        }
        out.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            histogram.name, histogram.count
        ));
        out.push_str(&format!("{}_sum {}\n", histogram.name, histogram.sum));
        out.push_str(&format!("{}_count {}\n", histogram.name, histogram.count));
    }

    out
}
