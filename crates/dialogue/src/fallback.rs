//! Fallback recovery — a three-phase escalator.
//!
//! Phase 1 seeds suggestions from keyword overlap, phase 2 asks the LLM to
//! rerank the intent catalogue, phase 3 degrades to a fixed category menu.
//! The engine mutates the fallback bookkeeping on the session snapshot in
//! place; the endpoint persists it with the rest of the entry. A loop cap
//! keeps a confused exchange from escalating forever.

use std::sync::Arc;
use std::time::Duration;

use vg_domain::chat::Message;
use vg_domain::config::Config;
use vg_domain::error::Result;
use vg_domain::session::{FallbackSuggestion, SessionEntry};
use vg_providers::{ChatRequest, LlmProvider};

use crate::intents::{self, Category};
use crate::retriever::content_tokens;
use crate::router::extract_json;

/// Hard deadline for the phase-2 rerank call.
const RERANK_TIMEOUT: Duration = Duration::from_secs(5);

/// Phase 1 emits at most this many suggestions.
const MAX_SUGGESTIONS: usize = 5;

/// Stock reply once the loop cap is hit.
const STOCK_REPHRASE: &str =
    "Mi dispiace, continuo a non capire la richiesta. Prova a riformularla con altre \
     parole, ad esempio \"quali piani sono in ritardo?\" oppure \"stabilimenti mai \
     ispezionati\".";

pub struct FallbackEngine {
    provider: Arc<dyn LlmProvider>,
    config: Arc<Config>,
}

impl FallbackEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    /// Run one recovery step. Returns the Italian text to show; the phase
    /// bookkeeping is updated on `session`.
    pub async fn recover(&self, message: &str, session: &mut SessionEntry) -> String {
        session.fallback_count += 1;

        // ── Loop prevention ───────────────────────────────────────
        if session.fallback_count >= self.config.fallback.max_loop {
            tracing::debug!(count = session.fallback_count, "fallback loop cap reached");
            session.clear_fallback();
            return STOCK_REPHRASE.to_string();
        }

        match session.fallback_phase {
            // Fresh fallback: keyword seed, then rerank if nothing viable.
            0 => {
                if let Some(suggestions) = keyword_seed(message) {
                    session.fallback_phase = 1;
                    session.fallback_suggestions = suggestions;
                    return render_suggestions(&session.fallback_suggestions);
                }
                self.rerank_or_menu(message, session).await
            }
            // The user rejected the phase-1 seed: escalate to the LLM.
            1 => self.rerank_or_menu(message, session).await,
            // The user rejected the rerank too: categorical menu.
            2 => {
                session.fallback_phase = 3;
                session.fallback_suggestions.clear();
                render_category_menu()
            }
            // Phase 3: interpret the reply as a category pick.
            _ => match match_category(message) {
                Some(category) => {
                    session.fallback_selected_category = Some(category.key().to_string());
                    session.fallback_suggestions = intents::intents_in_category(category)
                        .into_iter()
                        .map(|spec| FallbackSuggestion {
                            intent: spec.name.to_string(),
                            label: spec.description.to_string(),
                            category: spec.category.key().to_string(),
                        })
                        .collect();
                    render_suggestions(&session.fallback_suggestions)
                }
                None => render_category_menu(),
            },
        }
    }

    async fn rerank_or_menu(&self, message: &str, session: &mut SessionEntry) -> String {
        match self.llm_rerank(message).await {
            Ok(suggestions) if !suggestions.is_empty() => {
                session.fallback_phase = 2;
                session.fallback_suggestions = suggestions;
                render_suggestions(&session.fallback_suggestions)
            }
            Ok(_) | Err(_) => {
                session.fallback_phase = 3;
                session.fallback_suggestions.clear();
                render_category_menu()
            }
        }
    }

    /// Phase 2: ask the LLM to pick the 3 most plausible intents.
    async fn llm_rerank(&self, message: &str) -> Result<Vec<FallbackSuggestion>> {
        let mut prompt = String::from(
            "L'utente ha scritto una richiesta che non è stata riconosciuta. Scegli i 3 \
             intenti più plausibili dall'elenco e rispondi SOLO con JSON: \
             {\"intents\": [\"nome1\", \"nome2\", \"nome3\"]}.\n\nIntenti:\n",
        );
        for spec in intents::REGISTRY {
            if spec.category != Category::Conversazione {
                prompt.push_str(&format!("- {}: {}\n", spec.name, spec.description));
            }
        }

        let req = ChatRequest {
            messages: vec![Message::system(prompt), Message::user(message.to_string())],
            temperature: Some(0.1),
            max_tokens: Some(120),
            json_mode: true,
            model: None,
            timeout: Some(RERANK_TIMEOUT),
        };

        let resp = self.provider.chat(req).await?;
        let value = extract_json(&resp.content)
            .ok_or_else(|| vg_domain::error::Error::Other("unparseable rerank output".into()))?;

        let suggestions = value
            .get("intents")
            .and_then(|v| v.as_array())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str())
                    .filter_map(intents::intent_spec)
                    .take(3)
                    .map(|spec| FallbackSuggestion {
                        intent: spec.name.to_string(),
                        label: spec.description.to_string(),
                        category: spec.category.key().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(suggestions)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase 1: keyword seed
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Score every data intent by keyword overlap with the message. Returns
/// `None` when nothing reaches the minimum score.
fn keyword_seed(message: &str) -> Option<Vec<FallbackSuggestion>> {
    let tokens = content_tokens(message);
    if tokens.is_empty() {
        return None;
    }

    let mut scored: Vec<(usize, &'static intents::IntentSpec)> = intents::REGISTRY
        .iter()
        .filter(|spec| !spec.keywords.is_empty() && spec.category != Category::Conversazione)
        .map(|spec| {
            let score = spec
                .keywords
                .iter()
                .filter(|kw| tokens.iter().any(|t| t == *kw))
                .count();
            (score, spec)
        })
        .filter(|(score, _)| *score >= 1)
        .collect();

    if scored.is_empty() {
        return None;
    }

    scored.sort_by(|a, b| b.0.cmp(&a.0));
    Some(
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, spec)| FallbackSuggestion {
                intent: spec.name.to_string(),
                label: spec.description.to_string(),
                category: spec.category.key().to_string(),
            })
            .collect(),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rendering
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn render_suggestions(suggestions: &[FallbackSuggestion]) -> String {
    let mut text = String::from("Non ho capito bene la richiesta. Forse intendevi:\n");
    for (idx, suggestion) in suggestions.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", idx + 1, suggestion.label));
    }
    text.push_str("\nScrivi il numero oppure riformula la domanda.");
    text
}

fn render_category_menu() -> String {
    let mut text = String::from("Posso aiutarti in queste aree:\n");
    for (idx, category) in Category::menu().iter().enumerate() {
        text.push_str(&format!("{}. {}\n", idx + 1, category.label_it()));
    }
    text.push_str("\nScrivi il numero della categoria che ti interessa.");
    text
}

/// Match a category pick: 1-based number or token overlap with the label.
fn match_category(message: &str) -> Option<Category> {
    let trimmed = message.trim().to_lowercase();
    let menu = Category::menu();

    if let Ok(n) = trimmed.parse::<usize>() {
        return menu.get(n.checked_sub(1)?).copied();
    }

    let tokens: Vec<&str> = trimmed
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 4)
        .collect();
    menu.iter()
        .find(|category| {
            let label = category.label_it().to_lowercase();
            tokens.iter().any(|t| label.contains(*t)) || trimmed.contains(category.key())
        })
        .copied()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
