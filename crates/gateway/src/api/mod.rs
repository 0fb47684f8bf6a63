pub mod chat;
pub mod health;
pub mod parse;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router. The surface is the pre-existing frontend
/// contract: chat (sync + SSE), the classifier debug endpoint, and the
/// two probes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/parse", post(parse::parse))
        .route("/health", get(health::health))
        .route("/status", get(health::status))
}
