//! Reactive rule engine runtime.
//!
//! This crate provides:
//! - The fact store, event store, timer manager, and trace collector
//! - Pure condition evaluation and interpolated action execution
//! - Temporal pattern matching (sequence / absence / count / aggregate)
//! - The engine core: per-correlation FIFO processing queue, worker pool,
//!   forward chaining with depth caps, correlation propagation
//! - Hot-reload watching over pluggable rule sources
//! - Metrics aggregation fed by the trace stream
//! - Service, baseline, and storage adapter capabilities

pub mod actions;
pub mod conditions;
pub mod context;
pub mod engine;
pub mod events;
pub mod facts;
pub mod interpolate;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod reload;
pub mod services;
pub mod storage;
pub mod temporal;
pub mod timers;
pub mod trace;

pub use conditions::{BaselineProvider, ConditionOutcome};
pub use context::EvalContext;
pub use engine::{Engine, EngineStats};
pub use events::EventStore;
pub use facts::FactStore;
pub use metrics::{GaugeSnapshot, MetricsCollector, MetricsSnapshot};
pub use registry::RuleRegistry;
pub use reload::{
    start_reload_watcher, start_reload_watcher_with_nudge, ReloadOutcome, ReloadWatcher,
    RuleSource,
};
pub use services::{ServiceHandler, ServiceRegistry};
pub use storage::{
    FileStorageAdapter, MemoryStorageAdapter, StorageAdapter, StorageMetadata, StorageRecord,
    SCHEMA_VERSION,
};
pub use temporal::TemporalMatcher;
pub use timers::TimerManager;
pub use trace::{TraceCollector, TraceSubscriber, TraceSubscriptionId};
