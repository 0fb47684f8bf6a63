//! Liveness and readiness probes.

use axum::extract::State;
use axum::response::Json;
use serde_json::Value;

use crate::state::AppState;

/// `GET /health` — cheap liveness probe.
pub async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /status` — component readiness.
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let llm_ready = state.provider.ping().await;
    let backend_ready = state.backend.ping().await;

    let status = if llm_ready && backend_ready {
        "ok"
    } else {
        "degraded"
    };

    Json(serde_json::json!({
        "status": status,
        "version": env!("CARGO_PKG_VERSION"),
        "components": {
            "llm": {
                "ready": llm_ready,
                "provider": state.provider.provider_id(),
                "model": state.config.llm.model,
            },
            "backend": { "ready": backend_ready },
            "sessions": {
                "tracked": state.sessions.len(),
                "active_senders": state.sender_locks.sender_count(),
            },
            "classification_cache": { "entries": state.graph.cache_len() },
        },
    }))
}
