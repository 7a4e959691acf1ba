//! Shared data model for the reflex rule engine.
//!
//! This crate defines:
//! - Event, fact, rule, timer, and trace entry types with serde schemas
//! - The trigger/condition/action sum types rules are authored from
//! - Segment-wise pattern matching for fact keys and event topics
//! - Structural rule validation
//! - The shared error taxonomy and engine configuration

pub mod action;
pub mod builder;
pub mod condition;
pub mod config;
pub mod error;
pub mod event;
pub mod fact;
pub mod path;
pub mod pattern;
pub mod rule;
pub mod temporal;
pub mod timer;
pub mod trace;
pub mod validation;

pub use action::{Action, CatchBlock, LogLevel};
pub use builder::RuleBuilder;
pub use condition::{BaselineComparison, Condition, ConditionSource, ConditionValue, Operator, RefValue};
pub use config::{EngineConfig, ReloadConfig, ServerConfig};
pub use error::EngineError;
pub use event::Event;
pub use fact::{Fact, FactChange, FactChangeKind};
pub use rule::{Rule, RuleFilter, RuleInput, Trigger};
pub use temporal::{AggregateFunction, Comparison, EventMatcher, TemporalPattern};
pub use timer::{DurationSpec, OnExpire, Timer, TimerConfig};
pub use trace::{TraceEntry, TraceEntryType, TraceFilter};
pub use validation::{ensure_valid, normalize_cron, validate_rule, ValidationIssue};
