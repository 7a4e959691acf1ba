//! Engine configuration with env-var overrides.

use std::env;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

// ── Engine config ─────────────────────────────────────────────

/// Runtime configuration for a single engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Width of the processing worker pool.
    pub max_concurrency: usize,
    /// Forward-chaining depth cap; jobs beyond this are dropped and recorded.
    pub max_chain_depth: u32,
    /// Ring capacity of the event store.
    pub max_events: usize,
    /// Ring capacity of the trace collector.
    pub max_trace_entries: usize,
    /// Bound on draining in-flight jobs during `stop()`.
    pub shutdown_timeout_ms: u64,
    /// Identifier stamped into storage metadata and event sources.
    pub server_id: String,
    pub reload: ReloadConfig,
}

/// Hot-reload watcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Poll interval for configured rule sources.
    pub interval_ms: u64,
    /// Validate the full union before applying a diff; abort the cycle on error.
    pub validate_before_apply: bool,
    /// Apply the wait-and-swap indivisibly from the engine's point of view.
    pub atomic: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_chain_depth: 64,
            max_events: 10_000,
            max_trace_entries: 10_000,
            shutdown_timeout_ms: 5_000,
            server_id: "reflex".to_string(),
            reload: ReloadConfig::default(),
        }
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            validate_before_apply: true,
            atomic: true,
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            max_concurrency: env_usize("REFLEX_MAX_CONCURRENCY", 10),
            max_chain_depth: env_u32("REFLEX_MAX_CHAIN_DEPTH", 64),
            max_events: env_usize("REFLEX_MAX_EVENTS", 10_000),
            max_trace_entries: env_usize("REFLEX_MAX_TRACE_ENTRIES", 10_000),
            shutdown_timeout_ms: env_u64("REFLEX_SHUTDOWN_TIMEOUT_MS", 5_000),
            server_id: env_or("REFLEX_SERVER_ID", "reflex"),
            reload: ReloadConfig {
                interval_ms: env_u64("REFLEX_RELOAD_INTERVAL_MS", 5_000),
                validate_before_apply: env_bool("REFLEX_RELOAD_VALIDATE", true),
                atomic: env_bool("REFLEX_RELOAD_ATOMIC", true),
            },
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Engine config:");
        tracing::info!("  workers:   max_concurrency={}", self.max_concurrency);
        tracing::info!("  chaining:  max_chain_depth={}", self.max_chain_depth);
        tracing::info!(
            "  buffers:   max_events={}, max_trace_entries={}",
            self.max_events,
            self.max_trace_entries
        );
        tracing::info!(
            "  reload:    interval_ms={}, validate={}, atomic={}",
            self.reload.interval_ms,
            self.reload.validate_before_apply,
            self.reload.atomic
        );
    }
}

// ── Server config ─────────────────────────────────────────────

/// HTTP listener configuration (consumed by the server crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3080,
            cors_origin: "*".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("REFLEX_HOST", "0.0.0.0"),
            port: env_or("REFLEX_PORT", "3080").parse().unwrap_or(3080),
            cors_origin: env_or("REFLEX_CORS_ORIGIN", "*"),
        }
    }
}
