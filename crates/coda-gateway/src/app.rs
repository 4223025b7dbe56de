use std::sync::Arc;

use axum::{routing::get, Router};

use coda_agent::Orchestrator;
use coda_core::config::CodaConfig;

use crate::ws::fanout::FanoutState;

/// Central shared state — passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CodaConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub fanout: Arc<FanoutState>,
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
