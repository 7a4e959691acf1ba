//! Rule management endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use reflex_core::{EngineError, Rule, RuleFilter};
use reflex_loader::parse_rule_value;

use crate::error::{not_found, ApiError};
use crate::state::AppState;

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<RuleFilter>,
) -> Json<Vec<Rule>> {
    let rules = state
        .engine
        .list_rules(&filter)
        .iter()
        .map(|r| (**r).clone())
        .collect();
    Json(rules)
}

#[derive(Deserialize)]
pub struct CreateQuery {
    #[serde(default)]
    pub replace: bool,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CreateQuery>,
    Json(raw): Json<Value>,
) -> Result<(StatusCode, Json<Rule>), ApiError> {
    let input = parse_rule_value(raw)?;
    if !query.replace && state.engine.get_rule(&input.id).is_some() {
        return Err(ApiError(EngineError::Conflict(format!(
            "rule '{}' already exists",
            input.id
        ))));
    }
    let rule = state.engine.register_rule(input, false)?;
    Ok((StatusCode::CREATED, Json((*rule).clone())))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Rule>, ApiError> {
    state
        .engine
        .get_rule(&id)
        .map(|r| Json((*r).clone()))
        .ok_or_else(|| not_found(&format!("rule '{}'", id)))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.engine.unregister_rule(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&format!("rule '{}'", id)))
    }
}

pub async fn enable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.enable_rule(&id)?;
    Ok(StatusCode::OK)
}

pub async fn disable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.disable_rule(&id)?;
    Ok(StatusCode::OK)
}
