//! Timer management endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use reflex_core::{EngineError, Timer, TimerConfig};

use crate::error::{not_found, ApiError};
use crate::state::AppState;

pub async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<Timer>> {
    Json(state.engine.timers().list())
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(config): Json<TimerConfig>,
) -> Result<Json<Timer>, ApiError> {
    if config.name != name {
        return Err(ApiError(EngineError::Validation(format!(
            "timer name mismatch: path '{}', body '{}'",
            name, config.name
        ))));
    }
    let timer = state.engine.set_timer(config, None)?;
    Ok(Json(timer))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.cancel_timer(&name) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&format!("timer '{}'", name)))
    }
}
