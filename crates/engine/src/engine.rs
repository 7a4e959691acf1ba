//! Engine core: ingress, processing workers, forward chaining, lifecycle.
//!
//! Every ingress path (events, fact writes, timer expiries, temporal
//! matches) lands on the processing queue; workers pull jobs, match rules,
//! evaluate conditions, and execute actions. Re-entrant `emit`/`set_fact`
//! from actions always enqueue — never execute inline — which breaks cycles
//! and keeps per-correlation FIFO ordering.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reflex_core::{
    pattern, EngineConfig, EngineError, Event, Fact, FactChangeKind, Rule, RuleFilter,
    RuleInput, Timer, TimerConfig, TraceEntry, TraceEntryType,
};

use crate::actions::execute_actions;
use crate::conditions::{self, BaselineProvider};
use crate::context::{EvalContext, FactLookup};
use crate::events::EventStore;
use crate::facts::FactStore;
use crate::metrics::{CounterSnapshot, GaugeSnapshot, MetricsCollector, MetricsSnapshot};
use crate::queue::{Job, JobPayload, JobQueue};
use crate::registry::RuleRegistry;
use crate::reload::ReloadHandle;
use crate::services::ServiceRegistry;
use crate::storage::{StorageAdapter, StorageMetadata, StorageRecord, SCHEMA_VERSION};
use crate::temporal::{TemporalFiring, TemporalMatcher};
use crate::timers::TimerManager;
use crate::trace::TraceCollector;

/// Source label stamped on engine-synthesized events.
const ENGINE_SOURCE: &str = "engine";

/// Operational snapshot for `/debug/stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub counters: CounterSnapshot,
    pub queue_depth: usize,
    pub active_rules: usize,
    pub active_facts: usize,
    pub active_timers: usize,
    pub stored_events: usize,
    pub trace_entries: usize,
}

pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) facts: Arc<FactStore>,
    pub(crate) events: Arc<EventStore>,
    pub(crate) timers: Arc<TimerManager>,
    pub(crate) trace: Arc<TraceCollector>,
    pub(crate) registry: Arc<RuleRegistry>,
    pub(crate) temporal: Arc<TemporalMatcher>,
    pub(crate) services: Arc<ServiceRegistry>,
    pub(crate) metrics: Arc<MetricsCollector>,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) baseline: RwLock<Option<Arc<dyn BaselineProvider>>>,
    /// Per-correlation visited (rule id, event id) pairs.
    visited: Mutex<HashMap<String, HashSet<(String, String)>>>,
    workers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    reload: Mutex<Option<ReloadHandle>>,
    running: AtomicBool,
}

impl Engine {
    /// Build an engine. Call [`start`](Engine::start) to spawn the workers.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let trace = Arc::new(TraceCollector::new(config.max_trace_entries));
        let metrics = Arc::new(MetricsCollector::new());
        metrics.attach(&trace);

        Arc::new(Self {
            facts: Arc::new(FactStore::new()),
            events: Arc::new(EventStore::new(config.max_events)),
            timers: Arc::new(TimerManager::new()),
            trace,
            registry: Arc::new(RuleRegistry::new()),
            temporal: Arc::new(TemporalMatcher::new()),
            services: Arc::new(ServiceRegistry::new()),
            metrics,
            queue: Arc::new(JobQueue::new()),
            baseline: RwLock::new(None),
            visited: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
            reload: Mutex::new(None),
            running: AtomicBool::new(false),
            config,
        })
    }

    /// Spawn the worker pool and wire timer/temporal delivery.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak: Weak<Engine> = Arc::downgrade(self);
        self.timers.set_expiry_handler(Arc::new({
            let weak = weak.clone();
            move |timer| {
                if let Some(engine) = weak.upgrade() {
                    engine.on_timer_expired(timer);
                }
            }
        }));
        self.temporal.set_firing_handler(Arc::new(move |firing| {
            if let Some(engine) = weak.upgrade() {
                engine.on_temporal_firing(firing);
            }
        }));

        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for worker_id in 0..self.config.max_concurrency.max(1) {
            let engine = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "worker started");
                while let Some(job) = engine.queue.pop().await {
                    let correlation_id = job.correlation_id.clone();
                    engine.process_job(job).await;
                    if engine.queue.complete(&correlation_id) {
                        engine
                            .visited
                            .lock()
                            .expect("visited lock poisoned")
                            .remove(&correlation_id);
                    }
                }
                debug!(worker_id, "worker stopped");
            }));
        }
        info!(workers = self.config.max_concurrency, "engine started");
    }

    // ── Ingress ──────────────────────────────────────────────────────

    /// Emit an event into the pipeline. Returns the event id.
    pub fn emit(
        &self,
        topic: impl Into<String>,
        data: Map<String, Value>,
        correlation_id: Option<String>,
    ) -> Result<String, EngineError> {
        let correlation_id = correlation_id.unwrap_or_else(mint_correlation);
        let event = Event::new(topic, data, ENGINE_SOURCE).with_correlation(correlation_id.clone());
        let event_id = event.id.clone();
        self.ingest_event(event, correlation_id, 0)?;
        Ok(event_id)
    }

    /// Write a fact and schedule fact-triggered rules.
    pub fn set_fact(&self, key: &str, value: Value) -> Result<Fact, EngineError> {
        let fact = self.facts.set(key, value, Some("api"))?;
        self.enqueue_fact_change(fact.clone(), FactChangeKind::Set, mint_correlation(), 0);
        Ok(fact)
    }

    /// Delete a fact and schedule fact-triggered rules.
    pub fn delete_fact(&self, key: &str) -> bool {
        let existing = self.facts.get_full(key);
        if !self.facts.delete(key) {
            return false;
        }
        if let Some(fact) = existing {
            self.enqueue_fact_change(fact, FactChangeKind::Deleted, mint_correlation(), 0);
        }
        true
    }

    /// Schedule (or replace) a named timer.
    pub fn set_timer(
        &self,
        config: TimerConfig,
        correlation_id: Option<String>,
    ) -> Result<Timer, EngineError> {
        let timer = self.timers.set_timer(config, correlation_id)?;
        self.trace.record(
            TraceEntry::new(TraceEntryType::TimerSet)
                .with_correlation(timer.correlation_id.clone().unwrap_or_default())
                .with_detail("name", timer.name.clone())
                .with_detail("fireAt", timer.fire_at.to_rfc3339()),
        );
        Ok(timer)
    }

    /// Cancel a named timer.
    pub fn cancel_timer(&self, name: &str) -> bool {
        let cancelled = self.timers.cancel_timer(name);
        if cancelled {
            self.trace.record(
                TraceEntry::new(TraceEntryType::TimerCancelled).with_detail("name", name),
            );
        }
        cancelled
    }

    // ── Rule management ──────────────────────────────────────────────

    pub fn register_rule(
        &self,
        input: RuleInput,
        skip_validation: bool,
    ) -> Result<Arc<Rule>, EngineError> {
        self.registry.register(input, skip_validation)
    }

    pub fn unregister_rule(&self, id: &str) -> bool {
        self.registry.unregister(id)
    }

    pub fn enable_rule(&self, id: &str) -> Result<(), EngineError> {
        self.registry.enable(id)
    }

    pub fn disable_rule(&self, id: &str) -> Result<(), EngineError> {
        self.registry.disable(id)
    }

    pub fn enable_group(&self, group: &str) {
        self.registry.enable_group(group);
    }

    pub fn disable_group(&self, group: &str) {
        self.registry.disable_group(group);
    }

    pub fn get_rule(&self, id: &str) -> Option<Arc<Rule>> {
        self.registry.get(id)
    }

    pub fn list_rules(&self, filter: &RuleFilter) -> Vec<Arc<Rule>> {
        self.registry.list(filter)
    }

    // ── Capabilities ─────────────────────────────────────────────────

    pub fn register_service(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn crate::services::ServiceHandler>,
    ) {
        self.services.register(name, handler);
    }

    pub fn set_baseline_provider(&self, provider: Arc<dyn BaselineProvider>) {
        *self.baseline.write().expect("baseline lock poisoned") = Some(provider);
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    pub fn trace(&self) -> &TraceCollector {
        &self.trace
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Observability ────────────────────────────────────────────────

    pub fn stats(&self) -> EngineStats {
        let counters = self.metrics.snapshot(GaugeSnapshot::default()).counters;
        EngineStats {
            counters,
            queue_depth: self.queue.pending(),
            active_rules: self.registry.len(),
            active_facts: self.facts.len(),
            active_timers: self.timers.len(),
            stored_events: self.events.len(),
            trace_entries: self.trace.len(),
        }
    }

    /// Counters, histograms, and lazily-computed gauges.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let gauges = GaugeSnapshot {
            active_rules: self.registry.len() as u64,
            active_facts: self.facts.len() as u64,
            active_timers: self.timers.len() as u64,
            trace_buffer_utilization: self.trace.len() as f64 / self.trace.capacity() as f64,
        };
        self.metrics.snapshot(gauges)
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Persist facts and rules through a storage adapter.
    pub async fn persist(&self, adapter: &dyn StorageAdapter) -> Result<(), EngineError> {
        let metadata = StorageMetadata::now(self.config.server_id.clone());
        adapter
            .save(
                "engine:facts",
                StorageRecord {
                    state: serde_json::to_value(self.facts.snapshot())?,
                    metadata: metadata.clone(),
                },
            )
            .await?;
        adapter
            .save(
                "engine:rules",
                StorageRecord {
                    state: serde_json::to_value(
                        self.registry.snapshot().iter().map(|r| (**r).clone()).collect::<Vec<_>>(),
                    )?,
                    metadata,
                },
            )
            .await?;
        Ok(())
    }

    /// Restore facts and rules from a storage adapter, replacing current
    /// state. Schema-version mismatches are storage errors.
    pub async fn restore(&self, adapter: &dyn StorageAdapter) -> Result<(), EngineError> {
        if let Some(record) = adapter.load("engine:facts").await? {
            check_schema(&record)?;
            let facts: Vec<Fact> = serde_json::from_value(record.state)?;
            self.facts.clear();
            for fact in facts {
                self.facts.restore(fact);
            }
        }
        if let Some(record) = adapter.load("engine:rules").await? {
            check_schema(&record)?;
            let rules: Vec<Rule> = serde_json::from_value(record.state)?;
            self.registry.restore(rules);
        }
        Ok(())
    }

    // ── Hot reload ───────────────────────────────────────────────────

    pub(crate) fn install_reload(&self, handle: ReloadHandle) {
        let mut slot = self.reload.lock().expect("reload lock poisoned");
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Resolve once the queue is empty and no worker is executing.
    pub async fn wait_for_queue(&self) {
        self.queue.wait_idle().await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Halt ingress, drain in-flight jobs (bounded by the shutdown
    /// timeout), cancel timers, and stop the reload watcher. Engine state
    /// does not survive; instances are independent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("engine stopping");

        if let Some(handle) = self.reload.lock().expect("reload lock poisoned").take() {
            handle.abort();
        }

        self.queue.close();
        let drain = tokio::time::timeout(
            Duration::from_millis(self.config.shutdown_timeout_ms),
            self.queue.wait_idle(),
        )
        .await;
        if drain.is_err() {
            warn!("shutdown timeout elapsed with jobs still in flight");
        }
        self.queue.shutdown();

        let handles: Vec<_> =
            std::mem::take(&mut *self.workers.lock().expect("workers lock poisoned"));
        let join = futures::future::join_all(handles.into_iter().map(|h| async move {
            let _ = h.await;
        }));
        let _ = tokio::time::timeout(
            Duration::from_millis(self.config.shutdown_timeout_ms),
            join,
        )
        .await;

        self.timers.stop();
        self.temporal.stop();
        info!("engine stopped");
    }

    // ── Internal ingress plumbing ────────────────────────────────────

    fn ingest_event(
        &self,
        event: Event,
        correlation_id: String,
        chain_depth: u32,
    ) -> Result<(), EngineError> {
        if !self.running.load(Ordering::SeqCst) || self.queue.is_closed() {
            return Err(EngineError::ServiceUnavailable("engine is not accepting events".to_string()));
        }
        self.events.store(event.clone());
        self.queue.push(Job {
            payload: JobPayload::Event(event),
            correlation_id,
            chain_depth,
        });
        Ok(())
    }

    /// Emit from inside an action: enqueues a child job with bumped depth
    /// and causation. Returns `None` when the chain depth cap drops it.
    pub(crate) fn chain_emit(
        &self,
        topic: String,
        data: Map<String, Value>,
        correlation_id: &str,
        causation_id: Option<&str>,
        chain_depth: u32,
    ) -> Result<Option<String>, EngineError> {
        if chain_depth > self.config.max_chain_depth {
            self.record_chain_depth_exceeded(correlation_id, &topic, chain_depth);
            return Ok(None);
        }
        let mut event = Event::new(topic, data, ENGINE_SOURCE).with_correlation(correlation_id);
        if let Some(causation) = causation_id {
            event = event.with_causation(causation);
        }
        let event_id = event.id.clone();
        self.ingest_event(event, correlation_id.to_string(), chain_depth)?;
        Ok(Some(event_id))
    }

    /// Enqueue the processing job for a committed fact change.
    pub(crate) fn enqueue_fact_change(
        &self,
        fact: Fact,
        kind: FactChangeKind,
        correlation_id: String,
        chain_depth: u32,
    ) {
        if chain_depth > self.config.max_chain_depth {
            self.record_chain_depth_exceeded(&correlation_id, &fact.key, chain_depth);
            return;
        }
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.queue.push(Job {
            payload: JobPayload::FactChange { fact, kind },
            correlation_id,
            chain_depth,
        });
    }

    fn record_chain_depth_exceeded(&self, correlation_id: &str, subject: &str, depth: u32) {
        warn!(correlation_id, subject, depth, "chain depth exceeded, dropping job");
        self.trace.record(
            TraceEntry::new(TraceEntryType::ChainDepthExceeded)
                .with_correlation(correlation_id)
                .with_detail("subject", subject)
                .with_detail("depth", depth),
        );
    }

    fn on_timer_expired(&self, timer: Timer) {
        let correlation_id = timer.correlation_id.clone().unwrap_or_else(mint_correlation);
        self.queue.push(Job {
            payload: JobPayload::TimerFired(timer.clone()),
            correlation_id: correlation_id.clone(),
            chain_depth: 0,
        });
        // The configured expiry event re-enters the pipeline as its own job.
        if !timer.on_expire.topic.is_empty() {
            let event = Event::new(timer.on_expire.topic.clone(), timer.on_expire.data.clone(), "timer")
                .with_correlation(correlation_id.clone());
            if let Err(e) = self.ingest_event(event, correlation_id, 0) {
                debug!(name = %timer.name, error = %e, "dropping expiry event");
            }
        }
    }

    fn on_temporal_firing(&self, firing: TemporalFiring) {
        let correlation_id = firing.correlation_id.clone().unwrap_or_else(mint_correlation);
        let event = Event::new(firing.topic, firing.data.clone(), "temporal")
            .with_correlation(correlation_id.clone());
        self.events.store(event.clone());
        self.queue.push(Job {
            payload: JobPayload::TemporalMatch {
                rule_id: firing.rule_id,
                event,
                bindings: firing.bindings,
            },
            correlation_id,
            chain_depth: 0,
        });
    }

    // ── Job processing ───────────────────────────────────────────────

    async fn process_job(self: &Arc<Self>, job: Job) {
        match &job.payload {
            JobPayload::Event(event) => {
                self.trace.record(
                    TraceEntry::new(TraceEntryType::EventEmitted)
                        .with_correlation(&job.correlation_id)
                        .with_detail("topic", event.topic.clone())
                        .with_detail("eventId", event.id.clone()),
                );
                let temporal_rules = self.registry.temporal_rules();
                if !temporal_rules.is_empty() {
                    self.temporal.on_event(event, &temporal_rules, &self.events);
                }
                let candidates = self.registry.rules_for_event(&event.topic);
                self.run_rules(candidates, event.clone(), Map::new(), &job).await;
            }
            JobPayload::FactChange { fact, kind } => {
                self.trace.record(
                    TraceEntry::new(TraceEntryType::FactChanged)
                        .with_correlation(&job.correlation_id)
                        .with_detail("key", fact.key.clone())
                        .with_detail("version", fact.version)
                        .with_detail("deleted", *kind == FactChangeKind::Deleted),
                );
                let candidates = self.registry.rules_for_fact_change(&fact.key);
                if candidates.is_empty() {
                    return;
                }
                let event = fact_change_event(fact, *kind, &job.correlation_id);
                self.run_rules(candidates, event, Map::new(), &job).await;
            }
            JobPayload::TimerFired(timer) => {
                self.trace.record(
                    TraceEntry::new(TraceEntryType::TimerExpired)
                        .with_correlation(&job.correlation_id)
                        .with_detail("name", timer.name.clone())
                        .with_detail("count", timer.count),
                );
                let candidates = self.registry.rules_for_timer(&timer.name);
                if candidates.is_empty() {
                    return;
                }
                let event = timer_event(timer, &job.correlation_id);
                self.run_rules(candidates, event, Map::new(), &job).await;
            }
            JobPayload::TemporalMatch { rule_id, event, bindings } => {
                let Some(rule) = self.registry.get(rule_id) else {
                    return;
                };
                self.run_rules(vec![rule], event.clone(), bindings.clone(), &job).await;
            }
        }
    }

    async fn run_rules(
        self: &Arc<Self>,
        candidates: Vec<Arc<Rule>>,
        event: Event,
        bindings: Map<String, Value>,
        job: &Job,
    ) {
        if candidates.is_empty() {
            return;
        }
        let baseline = self.baseline.read().expect("baseline lock poisoned").clone();
        let lookup = self.fact_lookup();

        for rule in candidates {
            if !rule.enabled {
                continue;
            }
            if let Some(group) = &rule.group {
                if self.registry.is_group_disabled(group) {
                    continue;
                }
            }
            if !self.mark_visited(&job.correlation_id, &rule.id, &event.id) {
                continue;
            }

            self.trace.record(
                TraceEntry::new(TraceEntryType::RuleTriggered)
                    .with_rule(&rule.id, &rule.name)
                    .with_correlation(&job.correlation_id)
                    .with_detail("eventId", event.id.clone()),
            );

            let ctx = EvalContext::new(
                Some(event.clone()),
                Arc::clone(&lookup),
                bindings.clone(),
                job.correlation_id.clone(),
            );

            let started = Instant::now();
            let mut failed_condition = None;
            for condition in &rule.conditions {
                let condition_started = Instant::now();
                let outcome = conditions::evaluate(condition, &ctx, baseline.as_deref());
                let mut entry = TraceEntry::new(TraceEntryType::ConditionEvaluated)
                    .with_rule(&rule.id, &rule.name)
                    .with_correlation(&job.correlation_id)
                    .with_duration(elapsed_ms(condition_started))
                    .with_detail("operator", condition.operator.as_str())
                    .with_detail("passed", outcome.passed);
                if let Some(error) = &outcome.error {
                    entry = entry.with_detail("conditionError", error.clone());
                }
                self.trace.record(entry);
                if !outcome.passed {
                    failed_condition = Some(condition.operator.as_str());
                    break;
                }
            }

            if let Some(operator) = failed_condition {
                self.trace.record(
                    TraceEntry::new(TraceEntryType::RuleSkipped)
                        .with_rule(&rule.id, &rule.name)
                        .with_correlation(&job.correlation_id)
                        .with_detail("failedOperator", operator),
                );
                continue;
            }

            match execute_actions(self, &rule, &rule.actions, &ctx, job.chain_depth).await {
                Ok(()) => {
                    self.trace.record(
                        TraceEntry::new(TraceEntryType::RuleExecuted)
                            .with_rule(&rule.id, &rule.name)
                            .with_correlation(&job.correlation_id)
                            .with_duration(elapsed_ms(started))
                            .with_detail("actions", rule.actions.len()),
                    );
                }
                Err(e) => {
                    error!(rule_id = %rule.id, error = %e, "rule execution failed");
                    self.trace.record(
                        TraceEntry::new(TraceEntryType::RuleFailed)
                            .with_rule(&rule.id, &rule.name)
                            .with_correlation(&job.correlation_id)
                            .with_duration(elapsed_ms(started))
                            .with_detail("error", e.to_string()),
                    );
                }
            }
        }
    }

    /// Record a (rule, event) firing for the correlation; `false` when the
    /// pair already fired.
    fn mark_visited(&self, correlation_id: &str, rule_id: &str, event_id: &str) -> bool {
        self.visited
            .lock()
            .expect("visited lock poisoned")
            .entry(correlation_id.to_string())
            .or_default()
            .insert((rule_id.to_string(), event_id.to_string()))
    }

    fn fact_lookup(&self) -> FactLookup {
        let facts = Arc::clone(&self.facts);
        Arc::new(move |key: &str| {
            if pattern::is_pattern(key) {
                facts.query(key).into_iter().next().map(|f| f.value)
            } else {
                facts.get(key)
            }
        })
    }
}

fn mint_correlation() -> String {
    Uuid::new_v4().to_string()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}

fn check_schema(record: &StorageRecord) -> Result<(), EngineError> {
    if record.metadata.schema_version != SCHEMA_VERSION {
        return Err(EngineError::Storage(format!(
            "schema version mismatch: stored {}, expected {}",
            record.metadata.schema_version, SCHEMA_VERSION
        )));
    }
    Ok(())
}

/// Context view of a committed fact change for fact-triggered rules.
/// Not appended to the event store; producer events only live there.
fn fact_change_event(fact: &Fact, kind: FactChangeKind, correlation_id: &str) -> Event {
    let mut data = Map::new();
    data.insert("key".to_string(), json!(fact.key));
    data.insert("value".to_string(), fact.value.clone());
    data.insert("version".to_string(), json!(fact.version));
    data.insert("deleted".to_string(), json!(kind == FactChangeKind::Deleted));
    Event::new("fact.changed", data, ENGINE_SOURCE).with_correlation(correlation_id)
}

/// Context view of a timer expiry for timer-triggered rules.
fn timer_event(timer: &Timer, correlation_id: &str) -> Event {
    let mut data = Map::new();
    data.insert("name".to_string(), json!(timer.name));
    data.insert("count".to_string(), json!(timer.count));
    for (k, v) in &timer.on_expire.data {
        data.insert(k.clone(), v.clone());
    }
    Event::new("timer.expired", data, ENGINE_SOURCE).with_correlation(correlation_id)
}
