//! One full turn: enrich metadata, load the session snapshot, run the
//! graph, reconcile the session write.
//!
//! The session is written only when the turn completed (tool errors
//! included); a timed-out or cancelled turn leaves the stored entry
//! exactly as it was.

use serde_json::{Map, Value};

use vg_dialogue::events::EventSink;
use vg_dialogue::graph::{ERR_CANCELLED, ERR_TIMEOUT};
use vg_dialogue::heuristics as hints;
use vg_domain::convo::{ConversationState, DmAction};
use vg_domain::dialogue::PendingClarification;
use vg_domain::session::SessionEntry;

use crate::state::AppState;

/// Run one turn for a sender. The caller must already hold the sender
/// lock.
pub async fn run_turn(
    state: AppState,
    sender: String,
    message: String,
    metadata: Map<String, Value>,
    sink: Option<EventSink>,
) -> ConversationState {
    // ── Load the session snapshot ─────────────────────────────────
    let snapshot = state.sessions.snapshot_or_default(&sender);

    // ── Enrich metadata ───────────────────────────────────────────
    let metadata = enrich_metadata(&state, metadata, &snapshot).await;

    // ── Run the graph under its deadline ──────────────────────────
    let turn = state
        .graph
        .run(&sender, &message, metadata, snapshot, sink)
        .await;

    // ── Reconcile the session write ───────────────────────────────
    match turn.error.as_deref() {
        Some(ERR_TIMEOUT) | Some(ERR_CANCELLED) => {
            tracing::debug!(sender = %sender, error = ?turn.error, "turn aborted, session untouched");
        }
        _ => {
            let entry = compose_entry(&turn);
            state.sessions.put(&sender, entry);
        }
    }

    turn
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metadata enrichment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve the caller's organizational unit and inject the `_session_*` /
/// `_fallback_*` hints the classifier consumes.
async fn enrich_metadata(
    state: &AppState,
    mut metadata: Map<String, Value>,
    session: &SessionEntry,
) -> Map<String, Value> {
    // ── Organizational unit ───────────────────────────────────────
    let has_asl = metadata
        .get("asl")
        .and_then(|v| v.as_str())
        .map(|s| !s.is_empty())
        .unwrap_or(false);
    if !has_asl {
        let user_id = meta_str(&metadata, "user_id");
        let fiscal_code = meta_str(&metadata, "codice_fiscale");
        let username = meta_str(&metadata, "username");
        match state
            .backend
            .unit_for_user(user_id.as_deref(), fiscal_code.as_deref(), username.as_deref())
            .await
        {
            Ok(Some(unit)) => {
                metadata.insert("asl".into(), Value::String(unit.asl));
                metadata.insert("asl_id".into(), Value::String(unit.asl_id));
                metadata.insert("uoc".into(), Value::String(unit.uoc));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "organizational-unit lookup failed"),
        }
    }

    // ── Session hints ─────────────────────────────────────────────
    if let Some(last_intent) = &session.last_intent {
        metadata.insert(
            hints::HINT_LAST_INTENT.into(),
            Value::String(last_intent.clone()),
        );
    }
    match &session.dialogue_state.pending_clarification {
        Some(PendingClarification::Slot { intent, slot }) => {
            metadata.insert(hints::HINT_PENDING_SLOT.into(), Value::String(slot.clone()));
            metadata.insert(
                hints::HINT_PENDING_INTENT.into(),
                Value::String(intent.clone()),
            );
        }
        Some(PendingClarification::Disambiguation { intents }) => {
            metadata.insert(
                hints::HINT_PENDING_DISAMBIGUATION.into(),
                Value::String(serde_json::to_string(intents).unwrap_or_default()),
            );
        }
        None => {}
    }
    if !session.detail_context.is_empty() {
        metadata.insert(hints::HINT_HAS_DETAIL_CONTEXT.into(), Value::Bool(true));
    }

    // ── Fallback hints ────────────────────────────────────────────
    if session.fallback_phase > 0 {
        metadata.insert(
            hints::HINT_FALLBACK_PHASE.into(),
            Value::from(session.fallback_phase),
        );
        metadata.insert(
            hints::HINT_FALLBACK_COUNT.into(),
            Value::from(session.fallback_count),
        );
        if !session.fallback_suggestions.is_empty() {
            let options: Vec<Value> = session
                .fallback_suggestions
                .iter()
                .map(|s| serde_json::json!({ "intent": s.intent, "label": s.label }))
                .collect();
            metadata.insert(
                hints::HINT_FALLBACK_SUGGESTIONS.into(),
                Value::String(
                    serde_json::to_string(&options).unwrap_or_default(),
                ),
            );
        }
    }

    metadata
}

fn meta_str(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session reconciliation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compose the outgoing session entry from a completed turn.
fn compose_entry(turn: &ConversationState) -> SessionEntry {
    // Fallback and two-phase control turns keep the previous topic alive:
    // a later "e quelli di Parma?" still refers to the last real query.
    let keeps_previous_topic = matches!(
        turn.intent.as_str(),
        "fallback" | "confirm_show_details" | "decline_show_details"
    );

    let mut entry = SessionEntry {
        dialogue_state: turn.dialogue_state.clone(),
        last_intent: if keeps_previous_topic {
            turn.session.last_intent.clone()
        } else {
            Some(turn.intent.clone())
        },
        last_slots: if keeps_previous_topic {
            turn.session.last_slots.clone()
        } else {
            turn.slots.clone()
        },
        last_response_context: response_context(turn),
        detail_context: turn.detail_context.clone(),
        fallback_suggestions: turn.session.fallback_suggestions.clone(),
        fallback_phase: turn.session.fallback_phase,
        fallback_count: turn.session.fallback_count,
        fallback_selected_category: turn.session.fallback_selected_category.clone(),
        ..Default::default()
    };

    // An ask_user turn keeps the previous slots too: the reply continues
    // the same query.
    if turn.dm_action == DmAction::AskUser {
        entry.last_intent = turn.session.last_intent.clone();
    }

    entry
}

/// Compact anaphora hint describing what the last answer was about.
fn response_context(turn: &ConversationState) -> Map<String, Value> {
    let mut ctx = Map::new();
    if turn.intent == "fallback" || turn.dm_action != DmAction::Execute {
        return ctx;
    }
    ctx.insert("intent".into(), Value::String(turn.intent.clone()));
    if let Some(count) = turn.tool_output.as_ref().and_then(|t| t.items_count) {
        ctx.insert("items_count".into(), Value::from(count));
    }
    let summary: String = turn.final_response.chars().take(200).collect();
    if !summary.is_empty() {
        ctx.insert("summary".into(), Value::String(summary));
    }
    ctx
}
