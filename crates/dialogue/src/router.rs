//! Intent router — the four-layer classification cascade.
//!
//! Layer 1: essential heuristics (always on, even with no LLM reachable).
//! Layer 2: deterministic slot pre-parse, merged into whatever wins.
//! Layer 3: classification cache.
//! Layer 4: LLM in JSON mode with retrieved few-shot examples.
//!
//! `classify` never fails: every failure mode degrades to the `fallback`
//! intent at confidence 0.0.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use vg_domain::chat::Message;
use vg_domain::config::Config;
use vg_domain::dialogue::{Candidate, Classification, MessageKind};
use vg_domain::error::Result;
use vg_providers::{ChatRequest, LlmProvider};

use crate::cache::ClassificationCache;
use crate::heuristics::{self, Heuristics};
use crate::intents;
use crate::retriever::ExampleRetriever;
use crate::slots::SlotParser;

/// Hard deadline for the classification call.
const CLASSIFY_TIMEOUT: Duration = Duration::from_secs(12);

/// Hard deadline for the dedicated location-extraction call.
const LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Token cap for classification output.
const CLASSIFY_MAX_TOKENS: u32 = 200;

/// Messages longer than this are truncated for LLM input only; the
/// original stays in the conversation state.
const MAX_LLM_INPUT_CHARS: usize = 4000;

/// Few-shot examples spliced into the classification prompt.
const FEW_SHOT_K: usize = 6;

pub struct IntentRouter {
    provider: Arc<dyn LlmProvider>,
    retriever: Arc<dyn ExampleRetriever>,
    cache: ClassificationCache,
    slot_parser: SlotParser,
    heuristics: Heuristics,
    config: Arc<Config>,
}

impl IntentRouter {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        retriever: Arc<dyn ExampleRetriever>,
        config: Arc<Config>,
    ) -> Result<Self> {
        Ok(Self {
            provider,
            retriever,
            cache: ClassificationCache::new(&config.cache.classification),
            slot_parser: SlotParser::new()?,
            heuristics: Heuristics::new()?,
            config,
        })
    }

    /// Classify one message. `metadata` carries the `_session_*` and
    /// `_fallback_*` hints injected by the endpoint.
    pub async fn classify(
        &self,
        message: &str,
        metadata: &Map<String, Value>,
    ) -> Classification {
        let trimmed = message.trim();
        if trimmed.is_empty() {
            return fallback_classification(MessageKind::Vague);
        }

        // ── Layer 2 first: its output merges into every later layer ──
        let parsed_slots = self.slot_parser.parse(trimmed);

        // ── Pending-location branch: a dedicated extraction call ─────
        if let Some(slot) = heuristics::hint_str(metadata, heuristics::HINT_PENDING_SLOT) {
            if slot == "location" || slot == "address" {
                if let Some(intent) =
                    heuristics::hint_str(metadata, heuristics::HINT_PENDING_INTENT)
                {
                    return self
                        .fill_pending_location(trimmed, &intent, &parsed_slots)
                        .await;
                }
            }
        }

        // ── Layer 1: heuristics ──────────────────────────────────────
        if let Some(classification) = self.heuristics.evaluate(trimmed, &parsed_slots, metadata) {
            tracing::debug!(
                intent = %classification.top_intent(),
                confidence = classification.top_confidence(),
                "heuristic short-circuit"
            );
            return classification;
        }

        // ── Layer 3: cache ───────────────────────────────────────────
        let key = ClassificationCache::key(trimmed, &metadata_fingerprint(metadata));
        if let Some(hit) = self.cache.get(key) {
            tracing::debug!(intent = %hit.top_intent(), "classification cache hit");
            return hit;
        }

        // ── Layer 4: LLM ─────────────────────────────────────────────
        let classification = match self.classify_llm(trimmed, &parsed_slots).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "LLM classification failed, degrading to fallback");
                let mut c = fallback_classification(self.heuristics.estimate_kind(trimmed));
                c.extracted_slots = parsed_slots;
                return c;
            }
        };

        // Cache write is best-effort.
        self.cache.put(key, classification.clone());
        classification
    }

    /// Cache size, for `/status`.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Slot pre-parse only, for the `/parse` debug endpoint.
    pub fn preparse(&self, message: &str) -> Map<String, Value> {
        self.slot_parser.parse(message)
    }

    // ── Layer 4 internals ────────────────────────────────────────────

    async fn classify_llm(
        &self,
        message: &str,
        parsed_slots: &Map<String, Value>,
    ) -> Result<Classification> {
        let truncated = truncate_chars(message, MAX_LLM_INPUT_CHARS);
        let system = self.build_rubric(truncated);

        let req = ChatRequest {
            messages: vec![Message::system(system), Message::user(truncated)],
            temperature: Some(self.config.llm.temperature.classify),
            max_tokens: Some(CLASSIFY_MAX_TOKENS),
            json_mode: true,
            model: None,
            timeout: Some(CLASSIFY_TIMEOUT),
        };

        let resp = self.provider.chat(req).await?;
        let value = extract_json(&resp.content).ok_or_else(|| {
            vg_domain::error::Error::Other(format!(
                "unparseable classification output: {}",
                truncate_chars(&resp.content, 120)
            ))
        })?;

        Ok(parse_classification(
            &value,
            parsed_slots,
            self.heuristics.estimate_kind(message),
        ))
    }

    fn build_rubric(&self, message: &str) -> String {
        let mut rubric = String::from(
            "Sei il classificatore di intenti di un assistente per ispettori veterinari. \
             Classifica il messaggio dell'utente in uno degli intenti elencati e rispondi \
             SOLO con un oggetto JSON:\n\
             {\"intent\": \"...\", \"confidence\": 0.0, \"slots\": {}, \
             \"message_kind\": \"vague|specific|continuation|refinement|selection\", \
             \"alternatives\": [{\"intent\": \"...\", \"confidence\": 0.0}]}\n\n\
             Intenti disponibili:\n",
        );
        for spec in intents::REGISTRY {
            rubric.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
        rubric.push_str(&format!(
            "\nChiavi slot ammesse: {}\n",
            intents::SLOT_KEYS.join(", ")
        ));
        rubric.push_str(
            "\nRegole di disambiguazione:\n\
             - \"mai ispezionati/controllati\" è ask_never_inspected, non ask_risk_based_priority.\n\
             - \"con sanzioni\" è ask_sanctioned_establishments, non ask_establishment_history.\n\
             - piani in ritardo SENZA codice piano è ask_delayed_plans; CON codice è ask_piano_delay.\n\
             - classifiche di stabilimenti sono ask_risk_based_priority; classifiche di tipologie \
             di attività sono ask_top_risk_activities.\n",
        );

        let examples = self.retriever.top_k(message, FEW_SHOT_K);
        if !examples.is_empty() {
            rubric.push_str("\nEsempi:\n");
            for example in examples {
                rubric.push_str(&format!("\"{}\" -> {}\n", example.text, example.intent));
            }
        }
        rubric
    }

    /// Dedicated slot-fill for a pending "where are you?" question.
    async fn fill_pending_location(
        &self,
        message: &str,
        intent: &str,
        parsed_slots: &Map<String, Value>,
    ) -> Classification {
        let req = ChatRequest {
            messages: vec![
                Message::system(
                    "Estrai l'indirizzo o la località dal messaggio. Rispondi SOLO con \
                     JSON: {\"address\": \"...\"}. Se non c'è un indirizzo, usa \"\".",
                ),
                Message::user(truncate_chars(message, MAX_LLM_INPUT_CHARS)),
            ],
            temperature: Some(0.0),
            max_tokens: Some(80),
            json_mode: true,
            model: None,
            timeout: Some(LOCATION_TIMEOUT),
        };

        let address = match self.provider.chat(req).await {
            Ok(resp) => extract_json(&resp.content)
                .and_then(|v| v.get("address").and_then(|a| a.as_str()).map(String::from))
                .filter(|a| !a.is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "location extraction call failed, using regex cleanup");
                None
            }
        };
        // Regex cleanup fallback: the raw message minus pleasantries.
        let address = address.unwrap_or_else(|| cleanup_address(message));

        let mut slots = parsed_slots.clone();
        slots.insert("address".into(), Value::String(address.clone()));
        slots
            .entry("location".to_string())
            .or_insert(Value::String(address));

        let mut candidate = Candidate::new(intent, 0.9);
        candidate.slots = slots.clone();
        Classification {
            candidates: vec![candidate],
            extracted_slots: slots,
            message_kind: MessageKind::Continuation,
            needs_clarification: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM output parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Three-stage JSON extraction: direct parse, fenced code block,
/// balanced-brace substring.
pub(crate) fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    // Fenced code block, with or without a language tag.
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(v);
            }
        }
    }

    // Balanced-brace substring.
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in trimmed[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &trimmed[start..start + offset + 1];
                    return serde_json::from_str::<Value>(candidate).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Validate and normalize the LLM's classification JSON. Unknown intents
/// degrade to fallback; unknown slot keys are dropped; confidences are
/// clamped to [0, 1].
fn parse_classification(
    value: &Value,
    parsed_slots: &Map<String, Value>,
    estimated_kind: MessageKind,
) -> Classification {
    let intent = value
        .get("intent")
        .and_then(|v| v.as_str())
        .unwrap_or("fallback");
    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let (intent, confidence) = if intents::is_known_intent(intent) {
        (intent, confidence)
    } else {
        tracing::debug!(intent, "LLM produced an unknown intent, degrading to fallback");
        ("fallback", 0.0)
    };

    // LLM slots filtered by the whitelist; deterministic regex slots win
    // on conflicts.
    let mut slots: Map<String, Value> = value
        .get("slots")
        .and_then(|v| v.as_object())
        .map(|obj| {
            obj.iter()
                .filter(|(k, v)| intents::is_known_slot(k) && !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
        .unwrap_or_default();
    for (k, v) in parsed_slots {
        slots.insert(k.clone(), v.clone());
    }

    let message_kind = value
        .get("message_kind")
        .and_then(|v| v.as_str())
        .and_then(parse_kind)
        .unwrap_or(estimated_kind);

    let mut top = Candidate::new(intent, confidence);
    top.slots = slots.clone();
    let mut candidates = vec![top];

    if let Some(alternatives) = value.get("alternatives").and_then(|v| v.as_array()) {
        for alt in alternatives {
            let name = alt.get("intent").and_then(|v| v.as_str()).unwrap_or("");
            let conf = alt.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if intents::is_known_intent(name) && name != intent {
                candidates.push(Candidate::new(name, conf));
            }
        }
    }

    Classification {
        candidates,
        extracted_slots: slots,
        message_kind,
        needs_clarification: false,
    }
}

fn parse_kind(s: &str) -> Option<MessageKind> {
    match s {
        "vague" => Some(MessageKind::Vague),
        "specific" => Some(MessageKind::Specific),
        "continuation" => Some(MessageKind::Continuation),
        "refinement" => Some(MessageKind::Refinement),
        "selection" => Some(MessageKind::Selection),
        _ => None,
    }
}

fn fallback_classification(kind: MessageKind) -> Classification {
    Classification {
        candidates: vec![Candidate::new("fallback", 0.0)],
        extracted_slots: Map::new(),
        message_kind: kind,
        needs_clarification: false,
    }
}

/// The metadata keys that can change a classification, joined into a
/// stable cache-key component.
fn metadata_fingerprint(metadata: &Map<String, Value>) -> String {
    let mut parts = Vec::new();
    for key in [
        heuristics::HINT_PENDING_SLOT,
        heuristics::HINT_PENDING_INTENT,
        heuristics::HINT_PENDING_DISAMBIGUATION,
        heuristics::HINT_HAS_DETAIL_CONTEXT,
        heuristics::HINT_LAST_INTENT,
        heuristics::HINT_FALLBACK_PHASE,
    ] {
        if let Some(v) = metadata.get(key) {
            parts.push(format!("{key}={v}"));
        }
    }
    parts.join("|")
}

/// Truncate at a char boundary without splitting a code point.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Strip pleasantries from a raw location reply.
fn cleanup_address(message: &str) -> String {
    let mut cleaned = message.trim().to_string();
    for prefix in ["sono a", "sono in", "mi trovo a", "mi trovo in", "a ", "in "] {
        // The prefixes are ASCII, so matching case-insensitively by byte
        // length keeps the cut on a char boundary.
        let matches_prefix = cleaned
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false);
        if matches_prefix && cleaned.len() > prefix.len() {
            cleaned = cleaned[prefix.len()..].trim().to_string();
            break;
        }
    }
    cleaned.trim_end_matches(['.', '!', ',']).trim().to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
