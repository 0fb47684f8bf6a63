//! Per-turn conversation state.
//!
//! One [`ConversationState`] is created on entry to the graph, mutated by
//! each node in sequence, and returned to the endpoint when the turn ends.
//! The graph owns it exclusively for the duration of the turn.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dialogue::{Candidate, DialogueState, MessageKind};
use crate::session::SessionEntry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured output of one tool handler.
///
/// `kind` discriminates how the shaper and the response generator treat
/// `data`; unknown kinds route through the generic data + text path.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolResult {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    /// Pre-formatted Italian markdown for direct pass-through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_response: Option<String>,
    /// Number of result items, when the payload is list-shaped. Drives
    /// two-phase shaping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items_count: Option<usize>,
    /// Set when the handler failed; the turn still completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn formatted(kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            formatted_response: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn failed(kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dialogue-manager outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DmAction {
    Execute,
    AskUser,
    #[default]
    Fallback,
}

/// A machine-replayable follow-up offered to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub query: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    /// The raw user message. Immutable after entry.
    pub message: String,
    /// Opaque sender id, echoed back as `recipient_id`.
    pub sender: String,
    /// Request metadata, enriched with `_session_*` / `_fallback_*` hints
    /// before classification.
    pub metadata: Map<String, Value>,

    // ── Classification output ─────────────────────────────────────
    pub intent: String,
    pub slots: Map<String, Value>,
    pub classification_confidence: f64,
    pub message_kind: MessageKind,
    pub candidates: Vec<Candidate>,

    /// The session snapshot loaded for this turn. Nodes read cross-turn
    /// context from here (and the fallback engine updates its bookkeeping
    /// in place); the endpoint composes the outgoing entry from this plus
    /// the turn's own output.
    pub session: SessionEntry,

    // ── Dialogue-manager output ───────────────────────────────────
    pub dialogue_state: DialogueState,
    pub dm_action: DmAction,
    pub dm_target_tool: Option<String>,
    pub dm_question: Option<String>,

    // ── Tool + response output ────────────────────────────────────
    pub tool_output: Option<ToolResult>,
    pub final_response: String,
    pub suggestions: Vec<Suggestion>,
    pub has_more_details: bool,
    /// Full payload parked by the two-phase shaper, keyed by intent and
    /// slots hash. Non-empty iff `has_more_details`.
    pub detail_context: Map<String, Value>,

    // ── Bookkeeping ───────────────────────────────────────────────
    pub execution_path: Vec<&'static str>,
    pub node_timings: BTreeMap<String, u64>,
    pub error: Option<String>,
}

impl ConversationState {
    pub fn new(
        sender: impl Into<String>,
        message: impl Into<String>,
        metadata: Map<String, Value>,
        session: SessionEntry,
    ) -> Self {
        let dialogue_state = session.dialogue_state.clone();
        Self {
            message: message.into(),
            sender: sender.into(),
            metadata,
            intent: "fallback".into(),
            slots: Map::new(),
            classification_confidence: 0.0,
            message_kind: MessageKind::default(),
            candidates: Vec::new(),
            session,
            dialogue_state,
            dm_action: DmAction::default(),
            dm_target_tool: None,
            dm_question: None,
            tool_output: None,
            final_response: String::new(),
            suggestions: Vec::new(),
            has_more_details: false,
            detail_context: Map::new(),
            execution_path: Vec::new(),
            node_timings: BTreeMap::new(),
            error: None,
        }
    }

    /// Total wall time across recorded nodes.
    pub fn total_ms(&self) -> u64 {
        self.node_timings.values().sum()
    }

    /// A string metadata value, if present and non-empty.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}
