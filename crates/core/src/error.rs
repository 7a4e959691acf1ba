use thiserror::Error;

/// Error surface shared across the engine, loader, and server crates.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Input shape wrong (rule, template, condition, action). Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Optional subsystem not configured (storage, baseline provider, ...).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A single action failed. Surfaced through `try_catch` bindings;
    /// otherwise aborts the remaining actions of the firing rule.
    #[error("action '{action_type}' failed: {message}")]
    ActionFailed { action_type: String, message: String },

    /// Invalid timer duration or cron expression, rejected at set time.
    #[error("timer error: {0}")]
    Timer(String),

    /// Forward-chaining depth cap hit; the job is dropped and recorded.
    #[error("chain depth exceeded at {0}")]
    ChainDepthExceeded(u32),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),
}

impl EngineError {
    /// Wrap an error as an action failure for the given action type.
    pub fn action(action_type: &str, err: impl std::fmt::Display) -> Self {
        EngineError::ActionFailed {
            action_type: action_type.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialize(e.to_string())
    }
}
