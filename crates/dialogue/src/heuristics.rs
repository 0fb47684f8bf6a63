//! Essential classification heuristics — layer 1 of the router cascade.
//!
//! Always evaluated, even when the LLM is unreachable. Each rule
//! short-circuits the cascade with a confident candidate (0.90–0.95) for
//! the handful of message shapes that regexes disambiguate better than a
//! model: small-talk, confirm/decline of a pending two-phase offer,
//! replies to pending clarifications, the never-inspected vs sanctioned
//! split, the delayed-plan pair, and geographic proximity.

use regex::Regex;
use serde_json::{Map, Value};

use vg_domain::dialogue::{Candidate, Classification, MessageKind};
use vg_domain::error::{Error, Result};

use crate::intents;

/// Session hint keys injected by the endpoint before classification.
pub const HINT_PENDING_SLOT: &str = "_session_pending_slot";
pub const HINT_PENDING_INTENT: &str = "_session_pending_intent";
pub const HINT_PENDING_DISAMBIGUATION: &str = "_session_pending_disambiguation";
pub const HINT_HAS_DETAIL_CONTEXT: &str = "_session_has_detail_context";
pub const HINT_LAST_INTENT: &str = "_session_last_intent";
pub const HINT_FALLBACK_PHASE: &str = "_fallback_phase";
pub const HINT_FALLBACK_COUNT: &str = "_fallback_count";
pub const HINT_FALLBACK_SUGGESTIONS: &str = "_fallback_suggestions";

/// Greetings / goodbyes are only short-circuited under this length, so a
/// long question that happens to open with "buongiorno" still reaches the
/// model.
const SMALLTALK_MAX_LEN: usize = 32;

pub struct Heuristics {
    confirm: Regex,
    decline: Regex,
    greeting: Regex,
    goodbye: Regex,
    help: Regex,
    never_inspected: Regex,
    sanctioned: Regex,
    delayed: Regex,
    proximity: Regex,
    continuation: Regex,
    refinement: Regex,
}

impl Heuristics {
    pub fn new() -> Result<Self> {
        let rx = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Config(format!("heuristic regex: {e}")))
        };

        Ok(Self {
            confirm: rx(r"(?i)^\s*(s[iì]|ok|va bene|certo|volentieri|mostra(?:li|meli)?|dettagli|tutti)\b")?,
            decline: rx(r"(?i)^\s*(no|non ora|basta|lascia(?:\s+stare)?|non serve)\b")?,
            greeting: rx(r"(?i)^\s*(ciao|salve|buongiorno|buonasera|buond[iì]|hey|ehi)\b")?,
            goodbye: rx(r"(?i)^\s*(arrivederci|addio|a presto|buona giornata|grazie(?:\s+mille)?[\s,!\.]*$)")?,
            help: rx(r"(?i)\b(aiuto|help|cosa\s+(?:sai|puoi)\s+fare|come\s+funzioni)\b")?,
            never_inspected: rx(r"(?i)\bmai\s+(?:ispezionat|controllat|visitat)\w*\b")?,
            sanctioned: rx(r"(?i)\b(?:con\s+)?sanzion\w*\b")?,
            delayed: rx(r"(?i)\b(?:ritardo|indietro|arretrat\w*)\b")?,
            proximity: rx(r"(?i)\b(vicino\s+a|vicini|nei\s+pressi|in\s+zona|nel\s+raggio)\b")?,
            continuation: rx(r"(?i)^\s*(e\s+(?:quell[io]|l[aà]|per)|anche\s|invece\s)")?,
            refinement: rx(r"(?i)^\s*(solo\s|soltanto\s|filtr\w+\s|ma\s+solo)")?,
        })
    }

    /// Evaluate the short-circuit rules. `slots` comes from the pre-parser;
    /// `metadata` carries the `_session_*` / `_fallback_*` hints.
    pub fn evaluate(
        &self,
        text: &str,
        slots: &Map<String, Value>,
        metadata: &Map<String, Value>,
    ) -> Option<Classification> {
        let trimmed = text.trim();

        // ── Confirm / decline of a pending two-phase offer ────────
        if hint_flag(metadata, HINT_HAS_DETAIL_CONTEXT) {
            if self.confirm.is_match(trimmed) {
                return Some(single("confirm_show_details", 0.95, MessageKind::Selection, slots));
            }
            if self.decline.is_match(trimmed) {
                return Some(single("decline_show_details", 0.95, MessageKind::Selection, slots));
            }
        }

        // ── Reply to a pending disambiguation question ────────────
        if let Some(options) = hint_str(metadata, HINT_PENDING_DISAMBIGUATION) {
            if let Some(chosen) = resolve_disambiguation(trimmed, &options) {
                return Some(single(chosen, 0.92, MessageKind::Selection, slots));
            }
        }

        // ── Reply to a pending slot question ──────────────────────
        if let (Some(slot), Some(intent)) = (
            hint_str(metadata, HINT_PENDING_SLOT),
            hint_str(metadata, HINT_PENDING_INTENT),
        ) {
            // The pre-parser found the asked-for slot, or the whole message
            // is short enough to be the raw value.
            if intents::is_known_intent(&intent)
                && (slots.contains_key(slot.as_str()) || looks_like_slot_value(trimmed))
            {
                let mut merged = slots.clone();
                if !merged.contains_key(slot.as_str()) {
                    merged.insert(slot.clone(), Value::String(trimmed.to_string()));
                }
                return Some(single(&intent, 0.92, MessageKind::Continuation, &merged));
            }
        }

        // ── Pick from offered fallback suggestions ────────────────
        if hint_u64(metadata, HINT_FALLBACK_PHASE) >= 1 {
            if let Some(options) = hint_str(metadata, HINT_FALLBACK_SUGGESTIONS) {
                if let Some(chosen) = resolve_fallback_pick(trimmed, &options) {
                    return Some(single(&chosen, 0.92, MessageKind::Selection, slots));
                }
            }
        }

        // ── Numeric pick from the fallback menu ───────────────────
        if hint_u64(metadata, HINT_FALLBACK_PHASE) >= 1 && is_menu_pick(trimmed) {
            return Some(Classification {
                candidates: Vec::new(),
                extracted_slots: slots.clone(),
                message_kind: MessageKind::Selection,
                needs_clarification: false,
            });
        }

        // ── Small talk ────────────────────────────────────────────
        if trimmed.len() <= SMALLTALK_MAX_LEN {
            if self.greeting.is_match(trimmed) {
                return Some(single("greet", 0.95, MessageKind::Vague, slots));
            }
            if self.goodbye.is_match(trimmed) {
                return Some(single("goodbye", 0.95, MessageKind::Vague, slots));
            }
        }
        if self.help.is_match(trimmed) {
            return Some(single("ask_help", 0.93, MessageKind::Vague, slots));
        }

        // ── Disambiguated risk phrases ────────────────────────────
        if self.never_inspected.is_match(trimmed) {
            return Some(single("ask_never_inspected", 0.92, MessageKind::Specific, slots));
        }
        if self.sanctioned.is_match(trimmed) {
            return Some(single(
                "ask_sanctioned_establishments",
                0.92,
                MessageKind::Specific,
                slots,
            ));
        }

        // ── Delayed plans: the pair splits on the plan code ───────
        if self.delayed.is_match(trimmed) && trimmed.to_lowercase().contains("pian") {
            let (intent, confidence) = if slots.contains_key("plan_code") {
                ("ask_piano_delay", 0.92)
            } else {
                ("ask_delayed_plans", 0.90)
            };
            return Some(single(intent, confidence, MessageKind::Specific, slots));
        }

        // ── Geographic proximity ──────────────────────────────────
        if self.proximity.is_match(trimmed) {
            return Some(single(
                "ask_establishments_nearby",
                0.92,
                MessageKind::Specific,
                slots,
            ));
        }

        None
    }

    /// Non-authoritative message-kind estimate, used when the LLM output
    /// does not carry one.
    pub fn estimate_kind(&self, text: &str) -> MessageKind {
        let trimmed = text.trim();
        if self.continuation.is_match(trimmed) {
            MessageKind::Continuation
        } else if self.refinement.is_match(trimmed) {
            MessageKind::Refinement
        } else if trimmed.split_whitespace().count() <= 2 {
            MessageKind::Vague
        } else {
            MessageKind::Specific
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn single(
    intent: &str,
    confidence: f64,
    kind: MessageKind,
    slots: &Map<String, Value>,
) -> Classification {
    let mut candidate = Candidate::new(intent, confidence);
    candidate.slots = slots.clone();
    Classification {
        candidates: vec![candidate],
        extracted_slots: slots.clone(),
        message_kind: kind,
        needs_clarification: false,
    }
}

pub(crate) fn hint_str(metadata: &Map<String, Value>, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

pub(crate) fn hint_flag(metadata: &Map<String, Value>, key: &str) -> bool {
    matches!(metadata.get(key), Some(Value::Bool(true)))
        || hint_str(metadata, key).as_deref() == Some("true")
}

pub(crate) fn hint_u64(metadata: &Map<String, Value>, key: &str) -> u64 {
    metadata
        .get(key)
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0)
}

/// Match a disambiguation reply against the offered intents: exact name,
/// or token overlap with the intent description.
fn resolve_disambiguation(text: &str, options_json: &str) -> Option<&'static str> {
    let options: Vec<String> = serde_json::from_str(options_json).ok()?;
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .collect();

    let mut best: Option<(&'static str, usize)> = None;
    for name in &options {
        let Some(spec) = intents::intent_spec(name) else {
            continue;
        };
        if lowered == spec.name {
            return Some(spec.name);
        }
        let desc = spec.description.to_lowercase();
        let score = tokens.iter().filter(|t| desc.contains(**t)).count();
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((spec.name, score));
        }
    }
    best.map(|(name, _)| name)
}

/// Match a reply against the offered fallback suggestions: a 1-based
/// number, an exact intent name, or token overlap with a label. The hint
/// carries `[{"intent": "...", "label": "..."}]`.
fn resolve_fallback_pick(text: &str, options_json: &str) -> Option<String> {
    let options: Vec<Value> = serde_json::from_str(options_json).ok()?;
    let trimmed = text.trim().to_lowercase();

    let intent_of = |v: &Value| v.get("intent")?.as_str().map(String::from);

    if let Ok(n) = trimmed.parse::<usize>() {
        return options.get(n.checked_sub(1)?).and_then(intent_of);
    }

    let tokens: Vec<&str> = trimmed
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .collect();

    let mut best: Option<(String, usize)> = None;
    for option in &options {
        let Some(intent) = intent_of(option) else {
            continue;
        };
        if trimmed == intent {
            return Some(intent);
        }
        let label = option
            .get("label")
            .and_then(|l| l.as_str())
            .unwrap_or("")
            .to_lowercase();
        let score = tokens.iter().filter(|t| label.contains(**t)).count();
        if score > 0 && best.as_ref().map_or(true, |(_, s)| score > *s) {
            best = Some((intent, score));
        }
    }
    best.map(|(intent, _)| intent)
}

/// "2", "la seconda", or a single short word are treated as menu picks.
fn is_menu_pick(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    t.parse::<u32>().is_ok()
        || t.starts_with("la ")
        || t.starts_with("il ")
        || t.split_whitespace().count() <= 2
}

/// A short reply with no verb is probably the raw value we asked for.
fn looks_like_slot_value(text: &str) -> bool {
    text.split_whitespace().count() <= 5 && text.len() <= 60
}
