//! Debug endpoints: trace queries, engine stats, and the SSE trace stream.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use reflex_core::{TraceEntry, TraceEntryType, TraceFilter};
use reflex_engine::{Engine, EngineStats, TraceSubscriptionId};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraceQuery {
    pub correlation_id: Option<String>,
    pub rule_id: Option<String>,
    /// Comma-separated entry types, e.g. `rule_executed,action_failed`.
    pub types: Option<String>,
    pub limit: Option<usize>,
}

impl TraceQuery {
    fn into_filter(self) -> Result<TraceFilter, ApiError> {
        let types = match self.types {
            None => None,
            Some(raw) => {
                let mut parsed = Vec::new();
                for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
                    let entry_type: TraceEntryType =
                        serde_json::from_value(json!(part.trim())).map_err(|_| {
                            ApiError(reflex_core::EngineError::Validation(format!(
                                "unknown trace type '{}'",
                                part.trim()
                            )))
                        })?;
                    parsed.push(entry_type);
                }
                Some(parsed)
            }
        };
        Ok(TraceFilter {
            correlation_id: self.correlation_id,
            rule_id: self.rule_id,
            types,
            limit: self.limit,
        })
    }
}

pub async fn traces(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TraceQuery>,
) -> Result<Json<Vec<TraceEntry>>, ApiError> {
    let filter = query.into_filter()?;
    Ok(Json(state.engine.trace().query(&filter)))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<EngineStats> {
    Json(state.engine.stats())
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub correlation_id: Option<String>,
    pub id: Option<String>,
}

/// Inspect stored events by id or correlation.
pub async fn events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<reflex_core::Event>>, ApiError> {
    if let Some(id) = query.id {
        return match state.engine.events().get(&id) {
            Some(event) => Ok(Json(vec![event])),
            None => Err(crate::error::not_found(&format!("event '{}'", id))),
        };
    }
    match query.correlation_id {
        Some(cid) => Ok(Json(state.engine.events().by_correlation(&cid))),
        None => Err(ApiError(reflex_core::EngineError::Validation(
            "pass either id or correlationId".to_string(),
        ))),
    }
}

/// Live trace stream: `event: trace` frames carrying JSON trace entries.
pub async fn stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = state.engine.trace().subscribe(Arc::new(move |entry| {
        let _ = tx.send(entry.clone());
    }));

    let stream = TraceStream {
        rx,
        engine: Arc::clone(&state.engine),
        subscription,
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

struct TraceStream {
    rx: mpsc::UnboundedReceiver<TraceEntry>,
    engine: Arc<Engine>,
    subscription: TraceSubscriptionId,
}

impl Stream for TraceStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(entry)) => {
                let event = SseEvent::default()
                    .event("trace")
                    .data(serde_json::to_string(&entry).unwrap_or_default());
                Poll::Ready(Some(Ok(event)))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TraceStream {
    fn drop(&mut self) {
        self.engine.trace().unsubscribe(self.subscription);
    }
}
