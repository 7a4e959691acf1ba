//! Rule document loading for the reflex engine.
//!
//! This crate provides:
//! - JSON/YAML rule documents (single rule, sequence, or `{ rules: [...] }`)
//!   with `"${path}"` reference shorthand normalization
//! - Rule templates with typed parameters and `{{name}}` placeholders
//! - A filesystem rule source with recursive scanning, per-file lint
//!   results, and a `notify`-based nudge for the hot-reload watcher

pub mod document;
pub mod source;
pub mod template;

pub use document::{parse_document, parse_rule_value, parse_value, DocFormat, RuleDocument};
pub use source::{FileRuleSource, LoadResult, LoadStatus};
pub use template::{ParamType, RuleTemplate, TemplateParameter};
