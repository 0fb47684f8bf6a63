//! Per-sender session entry.
//!
//! The store in `vg-sessions` owns the map; this type is what it maps to.
//! The graph reads a copy on entry and the endpoint writes a new copy on
//! successful completion — a timed-out turn leaves the stored entry
//! untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dialogue::DialogueState;

/// One suggestion surfaced during fallback recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackSuggestion {
    pub intent: String,
    /// Human-readable Italian label shown to the user.
    pub label: String,
    pub category: String,
}

/// Everything remembered for a sender between turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub dialogue_state: DialogueState,
    #[serde(default)]
    pub last_intent: Option<String>,
    #[serde(default)]
    pub last_slots: Map<String, Value>,
    /// Compact summary of the last answer, used as an anaphora hint.
    #[serde(default)]
    pub last_response_context: Map<String, Value>,
    /// Full payload parked by the two-phase shaper, awaiting confirm/decline.
    #[serde(default)]
    pub detail_context: Map<String, Value>,

    // ── Fallback recovery bookkeeping ─────────────────────────────
    #[serde(default)]
    pub fallback_suggestions: Vec<FallbackSuggestion>,
    /// 0 = not in fallback; 1..=3 = current recovery phase.
    #[serde(default)]
    pub fallback_phase: u8,
    /// Consecutive turns that ended in fallback.
    #[serde(default)]
    pub fallback_count: u32,
    #[serde(default)]
    pub fallback_selected_category: Option<String>,

    pub updated_at: DateTime<Utc>,
}

impl Default for SessionEntry {
    fn default() -> Self {
        Self {
            dialogue_state: DialogueState::default(),
            last_intent: None,
            last_slots: Map::new(),
            last_response_context: Map::new(),
            detail_context: Map::new(),
            fallback_suggestions: Vec::new(),
            fallback_phase: 0,
            fallback_count: 0,
            fallback_selected_category: None,
            updated_at: Utc::now(),
        }
    }
}

impl SessionEntry {
    /// Drop all fallback recovery state (after a successful dispatch or a
    /// loop-prevention reset).
    pub fn clear_fallback(&mut self) {
        self.fallback_suggestions.clear();
        self.fallback_phase = 0;
        self.fallback_count = 0;
        self.fallback_selected_category = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip() {
        let mut entry = SessionEntry::default();
        entry.last_intent = Some("ask_piano_description".into());
        entry.fallback_phase = 2;
        entry.fallback_suggestions.push(FallbackSuggestion {
            intent: "ask_delayed_plans".into(),
            label: "Piani in ritardo".into(),
            category: "piani".into(),
        });

        let json = serde_json::to_string(&entry).unwrap();
        let back: SessionEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_intent.as_deref(), Some("ask_piano_description"));
        assert_eq!(back.fallback_phase, 2);
        assert_eq!(back.fallback_suggestions, entry.fallback_suggestions);
    }

    #[test]
    fn clear_fallback_resets_all_fields() {
        let mut entry = SessionEntry {
            fallback_phase: 3,
            fallback_count: 2,
            fallback_selected_category: Some("rischio".into()),
            ..Default::default()
        };
        entry.fallback_suggestions.push(FallbackSuggestion {
            intent: "greet".into(),
            label: "Saluta".into(),
            category: "conversazione".into(),
        });
        entry.clear_fallback();
        assert_eq!(entry.fallback_phase, 0);
        assert_eq!(entry.fallback_count, 0);
        assert!(entry.fallback_suggestions.is_empty());
        assert!(entry.fallback_selected_category.is_none());
    }
}
