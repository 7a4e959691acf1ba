//! HTTP API surface for the reflex engine.
//!
//! Routes: `/events`, `/facts`, `/rules`, `/timers`, `/debug/*` (traces,
//! stats, SSE trace stream), `/metrics` (Prometheus text 0.0.4), `/health`.

pub mod api;
pub mod error;
pub mod state;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use reflex_core::ServerConfig;
use reflex_engine::Engine;

use state::AppState;

/// Build the API router over a shared engine.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let state = AppState::new(engine);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/events", post(api::events::emit))
        .route("/facts", get(api::facts::list))
        .route(
            "/facts/{key}",
            get(api::facts::get).put(api::facts::put).delete(api::facts::delete),
        )
        .route("/rules", get(api::rules::list).post(api::rules::create))
        .route("/rules/{id}", get(api::rules::get).delete(api::rules::delete))
        .route("/rules/{id}/enable", post(api::rules::enable))
        .route("/rules/{id}/disable", post(api::rules::disable))
        .route("/timers", get(api::timers::list))
        .route("/timers/{name}", put(api::timers::put).delete(api::timers::delete))
        .route("/debug/events", get(api::debug::events))
        .route("/debug/traces", get(api::debug::traces))
        .route("/debug/traces/stream", get(api::debug::stream))
        .route("/debug/stats", get(api::debug::stats))
        .route("/metrics", get(api::metrics::metrics))
        .route("/health", get(api::health::health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API until the shutdown signal resolves.
pub async fn serve(
    engine: Arc<Engine>,
    config: &ServerConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = build_router(engine);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
