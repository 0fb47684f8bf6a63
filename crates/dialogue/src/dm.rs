//! Dialogue manager — a pure rule engine.
//!
//! Given the classification, the accumulated dialogue state, and a
//! read-only session view, decide between executing a tool, asking a
//! clarifying question, and entering fallback recovery. No I/O and no LLM
//! calls happen here; every branch is a deterministic function of its
//! inputs, which is what keeps the rules testable one by one.

use serde_json::{Map, Value};

use vg_domain::config::DialogueConfig;
use vg_domain::convo::DmAction;
use vg_domain::dialogue::{
    Classification, DialogueState, MessageKind, PendingClarification,
};
use vg_domain::session::SessionEntry;

use crate::intents;

/// The outcome of one dialogue-manager evaluation.
#[derive(Debug, Clone)]
pub struct Decision {
    pub action: DmAction,
    /// Tool to dispatch when `action == Execute`.
    pub target_tool: Option<String>,
    /// Question to return when `action == AskUser`.
    pub question: Option<String>,
    /// Dialogue state to persist for the next turn.
    pub next_dialogue_state: DialogueState,
    /// Effective intent for this turn (carry-forward may differ from the
    /// classifier's top candidate).
    pub intent: String,
    /// Effective slot set after accumulation and carry-forward.
    pub slots: Map<String, Value>,
    /// The sender moved to a new topic; the endpoint clears the anaphora
    /// and detail context on write.
    pub topic_changed: bool,
}

/// Evaluate the decision rules, first match wins.
pub fn decide(
    message: &str,
    classification: &Classification,
    dialogue_state: &DialogueState,
    session: &SessionEntry,
    config: &DialogueConfig,
) -> Decision {
    let top_intent = classification.top_intent().to_string();
    let confidence = classification.top_confidence();

    // ── Topic-change pre-step ─────────────────────────────────────
    // Control intents (confirm/decline, small talk, fallback) and
    // follow-up message kinds never count as a topic switch: they continue
    // the interaction the previous turn started.
    let topic_changed = is_topic_switch(&top_intent, classification.message_kind, session);

    let mut next = dialogue_state.clone();
    next.pending_clarification = None;
    next.turn_index = dialogue_state.turn_index + 1;
    if topic_changed {
        next.reset_for_new_topic();
    }

    // Accumulate slots: confirmed slots (unless the topic moved), then
    // this turn's extraction on top.
    let mut slots: Map<String, Value> = if topic_changed {
        Map::new()
    } else {
        next.confirmed_slots.clone()
    };
    for (k, v) in &classification.extracted_slots {
        slots.insert(k.clone(), v.clone());
    }

    // ── Rule 1: pending two-phase confirm / decline ───────────────
    if !session.detail_context.is_empty()
        && matches!(top_intent.as_str(), "confirm_show_details" | "decline_show_details")
    {
        return execute(&top_intent, slots, next, topic_changed);
    }

    // ── Rules 2 + 3: confident classification ─────────────────────
    if confidence >= config.high_threshold {
        if let Some(spec) = intents::intent_spec(&top_intent) {
            return match intents::first_missing_group(spec, &slots) {
                None => execute(&top_intent, slots, next, topic_changed),
                Some(group) => {
                    next.pending_clarification = Some(PendingClarification::Slot {
                        intent: top_intent.clone(),
                        slot: group.any_of[0].to_string(),
                    });
                    ask(group.prompt.to_string(), top_intent, slots, next, topic_changed)
                }
            };
        }
    }

    // ── Rule 4: ambiguity band ────────────────────────────────────
    if confidence >= config.min_threshold && confidence < config.high_threshold {
        if let Some(second) = classification.candidates.get(1) {
            if confidence - second.confidence <= config.ambiguity_gap {
                let (first_spec, second_spec) = (
                    intents::intent_spec(&top_intent),
                    intents::intent_spec(&second.intent),
                );
                if let (Some(a), Some(b)) = (first_spec, second_spec) {
                    next.pending_clarification = Some(PendingClarification::Disambiguation {
                        intents: vec![a.name.to_string(), b.name.to_string()],
                    });
                    let question = format!(
                        "Non sono sicuro di aver capito. Intendi: 1) {} oppure 2) {}?",
                        a.description, b.description
                    );
                    return ask(question, top_intent, slots, next, topic_changed);
                }
            }
        }
    }

    // ── Rule 5: refinement / continuation carry-forward ───────────
    if matches!(
        classification.message_kind,
        MessageKind::Refinement | MessageKind::Continuation
    ) {
        if let Some(last_intent) = session.last_intent.clone() {
            if let Some(spec) = intents::intent_spec(&last_intent) {
                if spec.name != "fallback" {
                    let mut merged = session.last_slots.clone();
                    for (k, v) in &classification.extracted_slots {
                        merged.insert(k.clone(), v.clone());
                    }
                    return execute(&last_intent, merged, next, false);
                }
            }
        }
    }

    // ── Rule 6: selection from the fallback menu ──────────────────
    if session.fallback_phase >= 2 {
        if let Some(chosen) = resolve_menu_selection(message, session) {
            if let Some(spec) = intents::intent_spec(&chosen) {
                return match intents::first_missing_group(spec, &slots) {
                    None => execute(&chosen, slots, next, topic_changed),
                    Some(group) => {
                        next.pending_clarification = Some(PendingClarification::Slot {
                            intent: chosen.clone(),
                            slot: group.any_of[0].to_string(),
                        });
                        ask(group.prompt.to_string(), chosen, slots, next, topic_changed)
                    }
                };
            }
        }
    }

    // ── Rule 7: self-sufficient intents ───────────────────────────
    if let Some(spec) = intents::intent_spec(&top_intent) {
        if spec.self_sufficient && spec.name != "fallback" {
            return execute(&top_intent, slots, next, topic_changed);
        }
    }

    // ── Rule 8: fallback ──────────────────────────────────────────
    Decision {
        action: DmAction::Fallback,
        target_tool: None,
        question: None,
        next_dialogue_state: next,
        intent: "fallback".into(),
        slots,
        topic_changed,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome constructors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn execute(
    intent: &str,
    slots: Map<String, Value>,
    mut next: DialogueState,
    topic_changed: bool,
) -> Decision {
    next.confirmed_intent = Some(intent.to_string());
    next.confirmed_slots = slots.clone();
    Decision {
        action: DmAction::Execute,
        target_tool: intents::tool_for_intent(intent).map(String::from),
        question: None,
        next_dialogue_state: next,
        intent: intent.to_string(),
        slots,
        topic_changed,
    }
}

fn ask(
    question: String,
    intent: String,
    slots: Map<String, Value>,
    mut next: DialogueState,
    topic_changed: bool,
) -> Decision {
    next.confirmed_slots = slots.clone();
    Decision {
        action: DmAction::AskUser,
        target_tool: None,
        question: Some(question),
        next_dialogue_state: next,
        intent,
        slots,
        topic_changed,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn is_topic_switch(top_intent: &str, kind: MessageKind, session: &SessionEntry) -> bool {
    const CONTROL_INTENTS: &[&str] = &[
        "confirm_show_details",
        "decline_show_details",
        "greet",
        "goodbye",
        "ask_help",
        "fallback",
    ];

    let Some(last) = session.last_intent.as_deref() else {
        return false;
    };
    if CONTROL_INTENTS.contains(&top_intent) {
        return false;
    }
    if matches!(
        kind,
        MessageKind::Selection | MessageKind::Continuation | MessageKind::Refinement
    ) {
        return false;
    }
    last != top_intent
}

/// Match a fallback-menu reply: a 1-based number, an exact intent name, or
/// token overlap with a suggestion label.
fn resolve_menu_selection(message: &str, session: &SessionEntry) -> Option<String> {
    let trimmed = message.trim().to_lowercase();

    if let Ok(n) = trimmed.parse::<usize>() {
        return session
            .fallback_suggestions
            .get(n.checked_sub(1)?)
            .map(|s| s.intent.clone());
    }

    let tokens: Vec<&str> = trimmed
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .collect();

    let mut best: Option<(String, usize)> = None;
    for suggestion in &session.fallback_suggestions {
        if trimmed == suggestion.intent {
            return Some(suggestion.intent.clone());
        }
        let label = suggestion.label.to_lowercase();
        let score = tokens.iter().filter(|t| label.contains(**t)).count();
        if score > 0 && best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((suggestion.intent.clone(), score));
        }
    }
    best.map(|(intent, _)| intent)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::dialogue::Candidate;
    use vg_domain::session::FallbackSuggestion;

    fn classification(intent: &str, confidence: f64) -> Classification {
        Classification {
            candidates: vec![Candidate::new(intent, confidence)],
            ..Default::default()
        }
    }

    fn with_slot(mut c: Classification, key: &str, value: &str) -> Classification {
        c.extracted_slots
            .insert(key.into(), Value::String(value.into()));
        c
    }

    fn cfg() -> DialogueConfig {
        DialogueConfig::default()
    }

    #[test]
    fn high_confidence_with_slots_executes() {
        let c = with_slot(
            classification("ask_piano_description", 0.8),
            "plan_code",
            "A1",
        );
        let d = decide("piano A1?", &c, &DialogueState::default(), &SessionEntry::default(), &cfg());
        assert_eq!(d.action, DmAction::Execute);
        assert_eq!(d.target_tool.as_deref(), Some("piano_description"));
        assert!(d.next_dialogue_state.pending_clarification.is_none());
    }

    #[test]
    fn high_confidence_missing_slot_asks() {
        let c = classification("ask_piano_description", 0.8);
        let d = decide("il piano?", &c, &DialogueState::default(), &SessionEntry::default(), &cfg());
        assert_eq!(d.action, DmAction::AskUser);
        assert!(d.question.unwrap().contains("piano"));
        assert!(matches!(
            d.next_dialogue_state.pending_clarification,
            Some(PendingClarification::Slot { ref slot, .. }) if slot == "plan_code"
        ));
    }

    #[test]
    fn ambiguity_band_asks_disambiguation() {
        let mut c = classification("ask_risk_based_priority", 0.58);
        c.candidates
            .push(Candidate::new("ask_top_risk_activities", 0.52));
        let d = decide(
            "stabilimenti a rischio",
            &c,
            &DialogueState::default(),
            &SessionEntry::default(),
            &cfg(),
        );
        assert_eq!(d.action, DmAction::AskUser);
        let question = d.question.unwrap();
        assert!(question.contains("punteggio di rischio più alto"));
        assert!(question.contains("attività più a rischio"));
        assert!(matches!(
            d.next_dialogue_state.pending_clarification,
            Some(PendingClarification::Disambiguation { ref intents }) if intents.len() == 2
        ));
    }

    #[test]
    fn separated_candidates_do_not_trigger_ambiguity() {
        let mut c = classification("ask_piani_list", 0.60);
        c.candidates.push(Candidate::new("ask_delayed_plans", 0.30));
        let d = decide("piani", &c, &DialogueState::default(), &SessionEntry::default(), &cfg());
        // 0.60 is under high_threshold and the gap is 0.30: no ambiguity,
        // no self-sufficiency — falls through to fallback.
        assert_eq!(d.action, DmAction::Fallback);
    }

    #[test]
    fn two_phase_confirm_wins_over_everything() {
        let mut session = SessionEntry::default();
        session
            .detail_context
            .insert("payload".into(), Value::String("full".into()));
        let c = classification("confirm_show_details", 0.95);
        let d = decide("sì", &c, &DialogueState::default(), &session, &cfg());
        assert_eq!(d.action, DmAction::Execute);
        assert_eq!(d.target_tool.as_deref(), Some("show_details"));
    }

    #[test]
    fn refinement_carries_last_intent_and_slots() {
        let mut session = SessionEntry::default();
        session.last_intent = Some("ask_piano_stabilimenti".into());
        session
            .last_slots
            .insert("plan_code".into(), Value::String("A1".into()));

        let mut c = classification("fallback", 0.2);
        c.message_kind = MessageKind::Refinement;
        c.extracted_slots
            .insert("categoria".into(), Value::String("caseificio".into()));

        let d = decide("solo i caseifici", &c, &DialogueState::default(), &session, &cfg());
        assert_eq!(d.action, DmAction::Execute);
        assert_eq!(d.intent, "ask_piano_stabilimenti");
        assert_eq!(d.slots["plan_code"], "A1");
        assert_eq!(d.slots["categoria"], "caseificio");
    }

    #[test]
    fn menu_selection_by_number() {
        let mut session = SessionEntry::default();
        session.fallback_phase = 2;
        session.fallback_suggestions = vec![
            FallbackSuggestion {
                intent: "ask_delayed_plans".into(),
                label: "Piani in ritardo".into(),
                category: "piani".into(),
            },
            FallbackSuggestion {
                intent: "ask_piani_list".into(),
                label: "Elenco dei piani".into(),
                category: "piani".into(),
            },
        ];
        let mut c = Classification::default();
        c.message_kind = MessageKind::Selection;

        let d = decide("2", &c, &DialogueState::default(), &session, &cfg());
        assert_eq!(d.action, DmAction::Execute);
        assert_eq!(d.intent, "ask_piani_list");
    }

    #[test]
    fn menu_selection_by_label_tokens() {
        let mut session = SessionEntry::default();
        session.fallback_phase = 2;
        session.fallback_suggestions = vec![FallbackSuggestion {
            intent: "ask_delayed_plans".into(),
            label: "Piani in ritardo".into(),
            category: "piani".into(),
        }];
        let mut c = Classification::default();
        c.message_kind = MessageKind::Selection;

        let d = decide("quelli in ritardo", &c, &DialogueState::default(), &session, &cfg());
        assert_eq!(d.intent, "ask_delayed_plans");
    }

    #[test]
    fn self_sufficient_intent_executes_at_any_confidence() {
        let c = classification("greet", 0.5);
        let d = decide("ciao", &c, &DialogueState::default(), &SessionEntry::default(), &cfg());
        assert_eq!(d.action, DmAction::Execute);
        assert_eq!(d.target_tool.as_deref(), Some("smalltalk"));
    }

    #[test]
    fn low_confidence_falls_back() {
        let c = classification("ask_piani_list", 0.2);
        let d = decide("boh", &c, &DialogueState::default(), &SessionEntry::default(), &cfg());
        assert_eq!(d.action, DmAction::Fallback);
        assert_eq!(d.intent, "fallback");
    }

    #[test]
    fn topic_change_resets_slot_accumulator() {
        let mut session = SessionEntry::default();
        session.last_intent = Some("ask_piano_description".into());

        let mut state = DialogueState::default();
        state
            .confirmed_slots
            .insert("plan_code".into(), Value::String("A1".into()));

        let c = classification("ask_never_inspected", 0.9);
        let d = decide("operatori mai ispezionati", &c, &state, &session, &cfg());
        assert!(d.topic_changed);
        assert_eq!(d.action, DmAction::Execute);
        assert!(!d.slots.contains_key("plan_code"));
        assert!(d.next_dialogue_state.confirmed_intent.as_deref() == Some("ask_never_inspected"));
    }

    #[test]
    fn control_intents_are_not_topic_switches() {
        let mut session = SessionEntry::default();
        session.last_intent = Some("ask_piano_stabilimenti".into());
        session
            .detail_context
            .insert("payload".into(), Value::String("x".into()));

        let c = classification("confirm_show_details", 0.95);
        let d = decide("sì", &c, &DialogueState::default(), &session, &cfg());
        assert!(!d.topic_changed);
    }

    #[test]
    fn same_intent_is_not_a_topic_switch() {
        let mut session = SessionEntry::default();
        session.last_intent = Some("ask_piano_description".into());
        let c = with_slot(
            classification("ask_piano_description", 0.8),
            "plan_code",
            "B2",
        );
        let d = decide("e il piano B2?", &c, &DialogueState::default(), &session, &cfg());
        assert!(!d.topic_changed);
    }

    #[test]
    fn pending_clarification_cleared_on_execute() {
        let state = DialogueState {
            pending_clarification: Some(PendingClarification::Slot {
                intent: "ask_piano_description".into(),
                slot: "plan_code".into(),
            }),
            ..Default::default()
        };
        let c = with_slot(
            classification("ask_piano_description", 0.92),
            "plan_code",
            "A1",
        );
        let d = decide("A1", &c, &state, &SessionEntry::default(), &cfg());
        assert_eq!(d.action, DmAction::Execute);
        assert!(d.next_dialogue_state.pending_clarification.is_none());
    }

    #[test]
    fn turn_index_increments() {
        let state = DialogueState {
            turn_index: 4,
            ..Default::default()
        };
        let c = classification("greet", 0.95);
        let d = decide("ciao", &c, &state, &SessionEntry::default(), &cfg());
        assert_eq!(d.next_dialogue_state.turn_index, 5);
    }
}
