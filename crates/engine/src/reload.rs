//! Hot-reload watcher: periodic diffing of external rule sources.
//!
//! Each cycle loads every configured source, hashes each rule over its
//! canonical JSON (map keys serialize alphabetized), and diffs against the
//! cached id → hash map. Changes are applied after the processing queue
//! drains; a failed load or validation aborts the cycle and keeps the
//! previous rule set. Cycles with no changes record nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use reflex_core::{validate_rule, EngineError, RuleInput, TraceEntry, TraceEntryType};

use crate::engine::Engine;

/// An external provider of rule definitions (filesystem, HTTP, ...).
#[async_trait]
pub trait RuleSource: Send + Sync {
    fn name(&self) -> &str;
    async fn load(&self) -> Result<Vec<RuleInput>, EngineError>;
}

/// Counts from one applied reload cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ReloadOutcome {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.modified == 0
    }
}

/// Handle to a running reload watcher task.
pub struct ReloadHandle {
    task: tokio::task::JoinHandle<()>,
}

impl ReloadHandle {
    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}

pub struct ReloadWatcher {
    sources: Vec<Arc<dyn RuleSource>>,
    cache: HashMap<String, String>,
}

impl ReloadWatcher {
    pub fn new(sources: Vec<Arc<dyn RuleSource>>) -> Self {
        Self {
            sources,
            cache: HashMap::new(),
        }
    }

    /// Run one poll cycle against the engine.
    pub async fn poll_once(&mut self, engine: &Engine) -> Result<ReloadOutcome, EngineError> {
        // Load every source up front; a failing source aborts the cycle.
        let mut current: Vec<RuleInput> = Vec::new();
        for source in &self.sources {
            match source.load().await {
                Ok(rules) => current.extend(rules),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "rule source load failed");
                    engine.trace.record(
                        TraceEntry::new(TraceEntryType::HotReloadFailed)
                            .with_detail("source", source.name())
                            .with_detail("error", e.to_string()),
                    );
                    return Err(e);
                }
            }
        }

        let mut hashes: HashMap<String, (String, RuleInput)> = HashMap::new();
        for input in current {
            let hash = rule_hash(&input);
            if hashes.insert(input.id.clone(), (hash, input)).is_some() {
                warn!("duplicate rule id across sources, keeping the last");
            }
        }

        let added: Vec<&str> = hashes
            .keys()
            .filter(|id| !self.cache.contains_key(*id))
            .map(String::as_str)
            .collect();
        let modified: Vec<&str> = hashes
            .iter()
            .filter(|(id, (hash, _))| {
                self.cache.get(*id).map(|old| old != hash).unwrap_or(false)
            })
            .map(|(id, _)| id.as_str())
            .collect();
        let removed: Vec<String> = self
            .cache
            .keys()
            .filter(|id| !hashes.contains_key(*id))
            .cloned()
            .collect();

        let outcome = ReloadOutcome {
            added: added.len(),
            removed: removed.len(),
            modified: modified.len(),
        };
        if outcome.is_noop() {
            return Ok(outcome);
        }

        engine.trace.record(
            TraceEntry::new(TraceEntryType::HotReloadStarted)
                .with_detail("sources", self.sources.len())
                .with_detail("rules", hashes.len()),
        );

        if engine.config.reload.validate_before_apply {
            for (hash_id, (_, input)) in &hashes {
                let issues = validate_rule(input);
                if !issues.is_empty() {
                    let summary = issues
                        .iter()
                        .map(|i| i.to_string())
                        .collect::<Vec<_>>()
                        .join("; ");
                    warn!(rule_id = %hash_id, issues = %summary, "reload validation failed");
                    engine.trace.record(
                        TraceEntry::new(TraceEntryType::HotReloadFailed)
                            .with_detail("ruleId", hash_id.clone())
                            .with_detail("error", summary.clone()),
                    );
                    return Err(EngineError::Validation(format!(
                        "rule '{}': {}",
                        hash_id, summary
                    )));
                }
            }
        }

        // Swap only once in-flight work has drained.
        engine.wait_for_queue().await;

        let upserts: Vec<RuleInput> = added
            .iter()
            .chain(modified.iter())
            .filter_map(|id| hashes.get(*id).map(|(_, input)| input.clone()))
            .collect();

        if engine.config.reload.atomic {
            engine.registry.apply_diff(&removed, upserts);
        } else {
            for id in &removed {
                engine.registry.unregister(id);
            }
            for input in upserts {
                // Validated above (or validation disabled by config).
                let _ = engine.registry.register(input, true);
            }
        }

        self.cache = hashes
            .into_iter()
            .map(|(id, (hash, _))| (id, hash))
            .collect();

        info!(
            added = outcome.added,
            removed = outcome.removed,
            modified = outcome.modified,
            "hot reload applied"
        );
        engine.trace.record(
            TraceEntry::new(TraceEntryType::HotReloadCompleted)
                .with_detail("added", outcome.added)
                .with_detail("removed", outcome.removed)
                .with_detail("modified", outcome.modified),
        );
        Ok(outcome)
    }
}

/// Start the periodic reload watcher for the given sources.
pub fn start_reload_watcher(engine: &Arc<Engine>, sources: Vec<Arc<dyn RuleSource>>) {
    start_reload_watcher_with_nudge(engine, sources, None);
}

/// Start the reload watcher with an optional nudge: a notification (e.g.
/// from a filesystem watcher) triggers an immediate poll ahead of the next
/// interval tick.
pub fn start_reload_watcher_with_nudge(
    engine: &Arc<Engine>,
    sources: Vec<Arc<dyn RuleSource>>,
    nudge: Option<Arc<tokio::sync::Notify>>,
) {
    let interval = Duration::from_millis(engine.config.reload.interval_ms.max(100));
    let engine_ref = Arc::clone(engine);
    let task = tokio::spawn(async move {
        let mut watcher = ReloadWatcher::new(sources);
        let mut ticker = tokio::time::interval(interval);
        loop {
            // The interval's first tick is immediate, so sources load at startup.
            tokio::select! {
                _ = ticker.tick() => {}
                _ = nudged(nudge.as_ref()) => {}
            }
            // Failures are recorded in the trace; the engine stays live.
            let _ = watcher.poll_once(&engine_ref).await;
        }
    });
    engine.install_reload(ReloadHandle { task });
}

async fn nudged(nudge: Option<&Arc<tokio::sync::Notify>>) {
    match nudge {
        Some(notify) => notify.notified().await,
        None => std::future::pending().await,
    }
}

/// SHA-256 over the rule's canonical JSON. `serde_json` maps serialize with
/// alphabetized keys, so equal rules hash equal regardless of authoring
/// order.
pub fn rule_hash(input: &RuleInput) -> String {
    let canonical = serde_json::to_vec(input).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflex_core::EngineConfig;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeSource {
        rules: Mutex<Vec<RuleInput>>,
        fail: Mutex<bool>,
    }

    impl FakeSource {
        fn new(rules: Vec<RuleInput>) -> Arc<Self> {
            Arc::new(Self {
                rules: Mutex::new(rules),
                fail: Mutex::new(false),
            })
        }

        fn set_rules(&self, rules: Vec<RuleInput>) {
            *self.rules.lock().unwrap() = rules;
        }

        fn set_fail(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    #[async_trait]
    impl RuleSource for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn load(&self) -> Result<Vec<RuleInput>, EngineError> {
            if *self.fail.lock().unwrap() {
                return Err(EngineError::Io(std::io::Error::other("source down")));
            }
            Ok(self.rules.lock().unwrap().clone())
        }
    }

    fn rule(id: &str, topic: &str) -> RuleInput {
        serde_json::from_value(json!({
            "id": id,
            "name": id,
            "trigger": {"type": "event", "topic": topic},
            "actions": [{"type": "log", "level": "info", "message": "m"}]
        }))
        .unwrap()
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let a = rule("r1", "topic.a");
        let b = rule("r1", "topic.a");
        let c = rule("r1", "topic.b");
        assert_eq!(rule_hash(&a), rule_hash(&b));
        assert_ne!(rule_hash(&a), rule_hash(&c));
    }

    #[tokio::test]
    async fn first_poll_registers_everything() {
        let engine = Engine::new(EngineConfig::default());
        engine.start();
        let source = FakeSource::new(vec![rule("r1", "a"), rule("r2", "b")]);
        let mut watcher = ReloadWatcher::new(vec![source as Arc<dyn RuleSource>]);

        let outcome = watcher.poll_once(&engine).await.unwrap();
        assert_eq!(outcome, ReloadOutcome { added: 2, removed: 0, modified: 0 });
        assert!(engine.get_rule("r1").is_some());
        assert!(engine.get_rule("r2").is_some());
        engine.stop().await;
    }

    #[tokio::test]
    async fn diff_cycle_applies_add_remove_modify() {
        let engine = Engine::new(EngineConfig::default());
        engine.start();
        let source = FakeSource::new(vec![rule("r1", "a"), rule("r2", "b")]);
        let mut watcher = ReloadWatcher::new(vec![Arc::clone(&source) as Arc<dyn RuleSource>]);
        watcher.poll_once(&engine).await.unwrap();

        // r1 modified, r2 removed, r3 added.
        source.set_rules(vec![rule("r1", "a-changed"), rule("r3", "c")]);
        let outcome = watcher.poll_once(&engine).await.unwrap();
        assert_eq!(outcome, ReloadOutcome { added: 1, removed: 1, modified: 1 });

        assert!(engine.get_rule("r2").is_none());
        assert!(engine.get_rule("r3").is_some());
        let r1 = engine.get_rule("r1").unwrap();
        assert_eq!(r1.version, 2);
        assert!(engine.registry.rules_for_event("a-changed").len() == 1);

        // Trace shows a completed reload with the counts.
        let completed = engine.trace.query(&reflex_core::TraceFilter {
            types: Some(vec![TraceEntryType::HotReloadCompleted]),
            ..Default::default()
        });
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].details["added"], json!(1));
        assert_eq!(completed[0].details["removed"], json!(1));
        assert_eq!(completed[0].details["modified"], json!(1));
        engine.stop().await;
    }

    #[tokio::test]
    async fn unchanged_cycle_records_nothing() {
        let engine = Engine::new(EngineConfig::default());
        engine.start();
        let source = FakeSource::new(vec![rule("r1", "a")]);
        let mut watcher = ReloadWatcher::new(vec![source as Arc<dyn RuleSource>]);
        watcher.poll_once(&engine).await.unwrap();

        let before = engine.trace.len();
        let outcome = watcher.poll_once(&engine).await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(engine.trace.len(), before);
        engine.stop().await;
    }

    #[tokio::test]
    async fn failed_load_aborts_and_keeps_rules() {
        let engine = Engine::new(EngineConfig::default());
        engine.start();
        let source = FakeSource::new(vec![rule("r1", "a")]);
        let mut watcher = ReloadWatcher::new(vec![Arc::clone(&source) as Arc<dyn RuleSource>]);
        watcher.poll_once(&engine).await.unwrap();

        source.set_fail(true);
        assert!(watcher.poll_once(&engine).await.is_err());
        assert!(engine.get_rule("r1").is_some(), "previous rules kept");

        let failed = engine.trace.query(&reflex_core::TraceFilter {
            types: Some(vec![TraceEntryType::HotReloadFailed]),
            ..Default::default()
        });
        assert_eq!(failed.len(), 1);
        engine.stop().await;
    }

    #[tokio::test]
    async fn invalid_rule_aborts_whole_cycle() {
        let engine = Engine::new(EngineConfig::default());
        engine.start();
        let source = FakeSource::new(vec![rule("r1", "a")]);
        let mut watcher = ReloadWatcher::new(vec![Arc::clone(&source) as Arc<dyn RuleSource>]);
        watcher.poll_once(&engine).await.unwrap();

        let mut bad = rule("r2", "b");
        bad.actions.clear();
        source.set_rules(vec![rule("r1", "a"), bad]);

        assert!(matches!(
            watcher.poll_once(&engine).await,
            Err(EngineError::Validation(_))
        ));
        assert!(engine.get_rule("r2").is_none(), "nothing from the cycle applied");
        engine.stop().await;
    }
}
