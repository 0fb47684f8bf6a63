//! Cross-turn dialogue types.
//!
//! [`DialogueState`] is the slice of conversational memory the session store
//! persists between turns for a sender. Everything in here must serde
//! round-trip losslessly — a corrupted entry is evicted and the sender starts
//! from a fresh state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How the router reads the shape of the incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Vague,
    #[default]
    Specific,
    /// Keeps talking about the previous result ("e quelli di Bergamo?").
    Continuation,
    /// Narrows the previous query with extra constraints.
    Refinement,
    /// Picks one option from a clarification or fallback menu.
    Selection,
}

/// One candidate intent produced by classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub slots: Map<String, Value>,
}

impl Candidate {
    pub fn new(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence: confidence.clamp(0.0, 1.0),
            slots: Map::new(),
        }
    }
}

/// The full output of the intent router for one message.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Classification {
    /// Ordered best-first. The top candidate's confidence is authoritative;
    /// the rest are kept for dialogue-manager disambiguation.
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub extracted_slots: Map<String, Value>,
    #[serde(default)]
    pub message_kind: MessageKind,
    #[serde(default)]
    pub needs_clarification: bool,
}

impl Classification {
    pub fn top(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn top_intent(&self) -> &str {
        self.top().map(|c| c.intent.as_str()).unwrap_or("fallback")
    }

    pub fn top_confidence(&self) -> f64 {
        self.top().map(|c| c.confidence).unwrap_or(0.0)
    }
}

/// What the previous turn left pending when it ended in `ask_user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingClarification {
    /// A required slot was missing; we asked for it.
    Slot { intent: String, slot: String },
    /// Two candidates were too close; we asked which one was meant.
    Disambiguation { intents: Vec<String> },
}

/// The dialogue memory persisted across turns for one sender.
///
/// Invariant: `pending_clarification` is `Some` iff the previous turn ended
/// in an `ask_user` action.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DialogueState {
    #[serde(default)]
    pub confirmed_intent: Option<String>,
    #[serde(default)]
    pub confirmed_slots: Map<String, Value>,
    #[serde(default)]
    pub pending_clarification: Option<PendingClarification>,
    #[serde(default)]
    pub last_candidates: Vec<Candidate>,
    #[serde(default)]
    pub turn_index: u64,
}

impl DialogueState {
    /// Reset the accumulator on a topic change, keeping only the turn
    /// counter.
    pub fn reset_for_new_topic(&mut self) {
        self.confirmed_intent = None;
        self.confirmed_slots.clear();
        self.last_candidates.clear();
    }
}
