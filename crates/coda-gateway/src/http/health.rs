use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET /health — liveness plus a few observer-facing counters.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "clients": state.fanout.client_count(),
        "events_dispatched": state.fanout.next_seq_value(),
        "processing": state.orchestrator.is_processing(),
    }))
}
