use std::sync::Arc;

use reflex_engine::Engine;

/// Shared state for all API handlers.
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}
