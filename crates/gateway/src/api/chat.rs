//! Chat endpoints — the primary interface for running turns.
//!
//! - `POST /chat`        — synchronous: returns the full response element
//! - `POST /chat/stream` — SSE: progress events, then `final`
//!
//! Both shapes run the same pipeline: acquire the sender lock, run the
//! turn, format the frontend element. The response is always a JSON array
//! with a single element, matching the pre-existing frontend contract.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use futures_util::stream::Stream;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use vg_dialogue::events::{EventSink, GraphEvent, GraphEventKind};
use vg_dialogue::graph::ERR_TIMEOUT;
use vg_domain::convo::ConversationState;

use crate::runtime::turn::run_turn;
use crate::state::AppState;

const INTERNAL_APOLOGY: &str =
    "Mi dispiace, si è verificato un errore interno. Riprova tra qualche istante.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct ParsedRequest {
    sender: String,
    message: String,
    metadata: Map<String, Value>,
}

/// Manual validation so every malformed body maps to a plain 400 with a
/// description, as the frontend expects.
fn parse_request(body: &Value) -> Result<ParsedRequest, String> {
    let obj = body.as_object().ok_or("body must be a JSON object")?;

    let sender = obj
        .get("sender")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or("'sender' must be a non-empty string")?;

    let message = obj
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or("'message' must be a string")?;

    let metadata = match obj.get("metadata") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(m)) => m.clone(),
        Some(_) => return Err("'metadata' must be an object".into()),
    };

    Ok(ParsedRequest {
        sender: sender.to_string(),
        message: message.to_string(),
        metadata,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frontend element
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single element of the response array.
fn build_element(turn: &ConversationState) -> Value {
    let mut custom = serde_json::json!({
        "intent": turn.intent,
        "slots": turn.slots,
        "execution_path": turn.execution_path,
        "node_timings": turn.node_timings,
        "total_execution_ms": turn.total_ms(),
        "suggestions": turn.suggestions,
        "has_more_details": turn.has_more_details,
    });
    if let Some(error) = &turn.error {
        custom["error"] = Value::String(error.clone());
    }

    serde_json::json!({
        "text": turn.final_response,
        "recipient_id": turn.sender,
        "custom": custom,
    })
}

fn internal_element(sender: &str) -> Value {
    serde_json::json!({
        "text": INTERNAL_APOLOGY,
        "recipient_id": sender,
        "custom": { "error": "internal" },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat (synchronous)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e })),
            )
                .into_response();
        }
    };

    // Linearize turns per sender.
    let _permit = state.sender_locks.acquire(&req.sender).await;

    let sender = req.sender.clone();
    let handle = tokio::spawn(run_turn(
        state.clone(),
        req.sender,
        req.message,
        req.metadata,
        None,
    ));

    let element = match handle.await {
        Ok(turn) => {
            if turn.error.as_deref() == Some(ERR_TIMEOUT) {
                tracing::warn!(sender = %sender, "turn timed out");
            }
            build_element(&turn)
        }
        Err(e) => {
            tracing::error!(sender = %sender, error = %e, "turn task failed");
            internal_element(&sender)
        }
    };

    Json(Value::Array(vec![element])).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let req = match parse_request(&body) {
        Ok(req) => req,
        Err(e) => {
            let stream = futures_util::stream::once(async move {
                Ok::<_, std::convert::Infallible>(
                    Event::default()
                        .event("error")
                        .data(serde_json::json!({ "error": e }).to_string()),
                )
            });
            return Sse::new(stream)
                .keep_alive(KeepAlive::default())
                .into_response();
        }
    };

    let permit = state.sender_locks.acquire(&req.sender).await;

    let (tx, rx) = mpsc::channel::<GraphEvent>(64);
    let sink = EventSink::new(tx);

    let sender = req.sender.clone();
    let handle = tokio::spawn(run_turn(
        state.clone(),
        req.sender,
        req.message,
        req.metadata,
        Some(sink),
    ));

    let stream = make_sse_stream(rx, handle, sender, permit);
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Fan progress events out as they arrive, then emit the terminal frame.
/// Dropping the stream drops the receiver, which the graph notices and
/// cancels the turn cooperatively.
fn make_sse_stream(
    mut rx: mpsc::Receiver<GraphEvent>,
    handle: tokio::task::JoinHandle<ConversationState>,
    sender: String,
    _permit: tokio::sync::OwnedSemaphorePermit,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let name = match &event.kind {
                GraphEventKind::Status { .. } => "status",
                GraphEventKind::Reasoning { .. } => "reasoning",
                GraphEventKind::NodeTiming { .. } => "node_timing",
            };
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(Event::default().event(name).data(data));
        }

        // The sink is gone: the turn finished (or died).
        match handle.await {
            Ok(turn) => {
                let data = build_element(&turn).to_string();
                yield Ok(Event::default().event("final").data(data));
            }
            Err(e) => {
                tracing::error!(sender = %sender, error = %e, "turn task failed");
                let data = internal_element(&sender).to_string();
                yield Ok(Event::default().event("error").data(data));
            }
        }
        // _permit drops here, releasing the sender lock.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_missing_sender() {
        let body = serde_json::json!({ "message": "ciao" });
        assert!(parse_request(&body).is_err());
    }

    #[test]
    fn parse_rejects_non_object_metadata() {
        let body = serde_json::json!({ "sender": "u1", "message": "ciao", "metadata": [1] });
        assert!(parse_request(&body).is_err());
    }

    #[test]
    fn parse_accepts_empty_message() {
        // An empty message is a valid request; the router degrades it to
        // fallback without calling the LLM.
        let body = serde_json::json!({ "sender": "u1", "message": "" });
        let req = parse_request(&body).unwrap();
        assert_eq!(req.message, "");
    }

    #[test]
    fn element_carries_the_frontend_contract() {
        use serde_json::Map;
        use vg_domain::session::SessionEntry;

        let mut turn =
            ConversationState::new("u7", "ciao", Map::new(), SessionEntry::default());
        turn.intent = "greet".into();
        turn.final_response = "Ciao!".into();
        turn.execution_path = vec!["classify", "dialogue_manager", "smalltalk", "response"];
        turn.node_timings.insert("classify".into(), 3);

        let element = build_element(&turn);
        assert_eq!(element["recipient_id"], "u7");
        assert_eq!(element["text"], "Ciao!");
        assert_eq!(element["custom"]["intent"], "greet");
        assert_eq!(element["custom"]["has_more_details"], false);
        assert_eq!(element["custom"]["total_execution_ms"], 3);
        assert!(element["custom"].get("error").is_none());
    }

    #[test]
    fn element_surfaces_turn_error() {
        use serde_json::Map;
        use vg_domain::session::SessionEntry;

        let mut turn =
            ConversationState::new("u7", "ciao", Map::new(), SessionEntry::default());
        turn.error = Some("timeout".into());
        let element = build_element(&turn);
        assert_eq!(element["custom"]["error"], "timeout");
    }
}
