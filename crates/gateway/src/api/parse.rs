//! Classifier debug endpoint.
//!
//! Runs only the router cascade (no dialogue manager, no tools, no
//! session mutation) so the intent model can be probed in isolation.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::{Map, Value};

use vg_dialogue::intents;

use crate::state::AppState;

pub async fn parse(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let Some(text) = body.get("text").and_then(|v| v.as_str()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "'text' must be a string" })),
        )
            .into_response();
    };

    let metadata = body
        .get("metadata")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let router = state.graph.router();
    let entities: Map<String, Value> = router.preparse(text);
    let classification = router.classify(text, &metadata).await;

    let needs_clarification = intents::intent_spec(classification.top_intent())
        .map(|spec| intents::first_missing_group(spec, &classification.extracted_slots).is_some())
        .unwrap_or(false)
        || classification.top_confidence() < state.config.dialogue.high_threshold;

    Json(serde_json::json!({
        "text": text,
        "intent": {
            "name": classification.top_intent(),
            "confidence": classification.top_confidence(),
        },
        "entities": entities,
        "slots": classification.extracted_slots,
        "needs_clarification": needs_clarification,
    }))
    .into_response()
}
