//! Fact store endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use reflex_core::Fact;

use crate::error::{not_found, ApiError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FactQuery {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "**".to_string()
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FactQuery>,
) -> Json<Vec<Fact>> {
    Json(state.engine.facts().query(&query.pattern))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Fact>, ApiError> {
    state
        .engine
        .facts()
        .get_full(&key)
        .map(Json)
        .ok_or_else(|| not_found(&format!("fact '{}'", key)))
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<Fact>, ApiError> {
    let fact = state.engine.set_fact(&key, value)?;
    Ok(Json(fact))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.delete_fact(&key) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&format!("fact '{}'", key)))
    }
}
