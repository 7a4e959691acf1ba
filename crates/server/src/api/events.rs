//! Event ingress endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EmitRequest {
    pub topic: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitResponse {
    pub event_id: String,
    pub correlation_id: String,
}

pub async fn emit(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmitRequest>,
) -> Result<Json<EmitResponse>, ApiError> {
    let event_id = state.engine.emit(req.topic, req.data, req.correlation_id)?;
    let correlation_id = state
        .engine
        .events()
        .get(&event_id)
        .and_then(|e| e.correlation_id)
        .unwrap_or_default();
    Ok(Json(EmitResponse { event_id, correlation_id }))
}
