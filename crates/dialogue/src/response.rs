//! Response generation.
//!
//! Three paths: direct pass-through of a tool's pre-formatted text, LLM
//! prose over structured tool output, and a deterministic formatter when
//! the LLM is unavailable. Follow-up suggestions are appended as a
//! structured field, never concatenated into the text body.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use vg_domain::chat::Message;
use vg_domain::config::Config;
use vg_domain::convo::{ConversationState, Suggestion};
use vg_providers::{ChatRequest, LlmProvider};

use crate::intents;

/// Intents whose tool text is always emitted verbatim.
const DIRECT_INTENTS: &[&str] = &[
    "greet",
    "goodbye",
    "ask_help",
    "fallback",
    "confirm_show_details",
    "decline_show_details",
];

const APOLOGY: &str =
    "Mi dispiace, si è verificato un problema nel recuperare i dati richiesti. \
     Riprova tra qualche minuto.";

pub struct ResponseGenerator {
    provider: Arc<dyn LlmProvider>,
    config: Arc<Config>,
}

impl ResponseGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: Arc<Config>) -> Self {
        Self { provider, config }
    }

    /// Fill `state.final_response` and `state.suggestions` from the tool
    /// output. Never fails; the worst case is the deterministic formatter.
    pub async fn generate(&self, state: &mut ConversationState) {
        let text = self.response_text(state).await;
        state.final_response = text;
        state.suggestions = suggestions_for(&state.intent, &state.slots);
    }

    async fn response_text(&self, state: &ConversationState) -> String {
        let Some(tool_output) = &state.tool_output else {
            // An execute turn with no tool output is an internal bug; keep
            // the user-facing contract anyway.
            tracing::error!(intent = %state.intent, "response node reached without tool output");
            return APOLOGY.to_string();
        };

        if tool_output.error.is_some() {
            return APOLOGY.to_string();
        }

        // ── Direct path ───────────────────────────────────────────
        if let Some(formatted) = &tool_output.formatted_response {
            if DIRECT_INTENTS.contains(&state.intent.as_str()) || !formatted.is_empty() {
                return formatted.clone();
            }
        }

        // ── LLM prose over structured data ────────────────────────
        let description = intents::intent_spec(&state.intent)
            .map(|spec| spec.description)
            .unwrap_or("richiesta generica");
        let compact_data =
            serde_json::to_string(&tool_output.data).unwrap_or_else(|_| "{}".into());

        let system = format!(
            "Sei l'assistente di un ispettore veterinario. Rispondi in italiano, in modo \
             conciso e professionale, usando markdown leggero. Contesto della richiesta: {description}. \
             Basati ESCLUSIVAMENTE sui dati forniti, senza inventare nulla.",
        );
        let user = format!(
            "Domanda: {}\n\nDati:\n{}",
            state.message, compact_data
        );

        let req = ChatRequest {
            messages: vec![Message::system(system), Message::user(user)],
            temperature: Some(self.config.llm.temperature.generate),
            max_tokens: Some(self.config.llm.max_response_tokens),
            json_mode: false,
            model: None,
            timeout: Some(Duration::from_secs(self.config.llm.timeout_s)),
        };

        match self.provider.chat(req).await {
            Ok(resp) if !resp.content.trim().is_empty() => resp.content,
            Ok(_) => format_deterministic(&tool_output.data),
            Err(e) => {
                tracing::warn!(error = %e, intent = %state.intent, "response LLM failed, using deterministic formatter");
                format_deterministic(&tool_output.data)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deterministic fallback formatter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn format_deterministic(data: &Value) -> String {
    if let Some(items) = data.get("items").and_then(|v| v.as_array()) {
        if items.is_empty() {
            return "Nessun risultato trovato per la richiesta.".to_string();
        }
        let mut text = format!("Ho trovato {} risultati:\n", items.len());
        for item in items {
            text.push_str(&format!("- {}\n", item_line(item)));
        }
        return text;
    }

    match serde_json::to_string_pretty(data) {
        Ok(json) if json != "null" => format!("Ecco i dati trovati:\n```\n{json}\n```"),
        _ => "Nessun risultato trovato per la richiesta.".to_string(),
    }
}

fn item_line(item: &Value) -> String {
    for key in ["label", "ragione_sociale", "name", "nome", "codice", "plan_code"] {
        if let Some(s) = item.get(key).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Follow-up suggestions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-intent follow-ups with machine-replayable queries.
pub fn suggestions_for(intent: &str, slots: &serde_json::Map<String, Value>) -> Vec<Suggestion> {
    let plan_code = slots
        .get("plan_code")
        .and_then(|v| v.as_str())
        .unwrap_or("A1");

    let s = |text: &str, query: String| Suggestion {
        text: text.to_string(),
        query,
    };

    match intent {
        "ask_piano_description" => vec![
            s(
                "Stabilimenti del piano",
                format!("quali stabilimenti devo campionare per il piano {plan_code}?"),
            ),
            s(
                "Stato di avanzamento",
                format!("a che punto è il piano {plan_code}?"),
            ),
        ],
        "ask_piano_stabilimenti" => vec![
            s(
                "Descrizione del piano",
                format!("di cosa tratta il piano {plan_code}?"),
            ),
            s("Piani in ritardo", "quali piani sono in ritardo?".into()),
        ],
        "ask_piani_list" => vec![
            s("Piani in ritardo", "quali piani sono in ritardo?".into()),
            s(
                "Descrizione di un piano",
                "di cosa tratta il piano A1?".into(),
            ),
        ],
        "ask_delayed_plans" | "ask_piano_delay" => vec![s(
            "Stabilimenti da campionare",
            format!("quali stabilimenti devo campionare per il piano {plan_code}?"),
        )],
        "ask_priority_establishment" => vec![
            s(
                "Stabilimenti a maggior rischio",
                "stabilimenti con il rischio più alto".into(),
            ),
            s("Mai ispezionati", "operatori mai ispezionati".into()),
        ],
        "ask_risk_based_priority" => vec![
            s(
                "Attività più a rischio",
                "quali tipologie di attività sono più a rischio?".into(),
            ),
            s("Mai ispezionati", "operatori mai ispezionati".into()),
        ],
        "ask_top_risk_activities" => vec![s(
            "Stabilimenti a maggior rischio",
            "stabilimenti con il rischio più alto".into(),
        )],
        "ask_never_inspected" => vec![s(
            "Priorità di ispezione",
            "quali stabilimenti dovrei ispezionare per primi?".into(),
        )],
        "ask_establishment_history" => vec![s(
            "Stabilimenti con sanzioni",
            "stabilimenti che hanno ricevuto sanzioni".into(),
        )],
        "ask_sanctioned_establishments" => vec![s(
            "Storico di uno stabilimento",
            "storico delle non conformità della ditta \"...\"".into(),
        )],
        "ask_establishments_nearby" => vec![s(
            "Priorità di ispezione",
            "quali stabilimenti dovrei ispezionare per primi?".into(),
        )],
        "ask_staff_directory" => vec![s(
            "Descrizione del piano",
            format!("di cosa tratta il piano {plan_code}?"),
        )],
        "ask_procedure_info" => vec![s(
            "Referente di materia",
            "chi è il referente in materia di benessere animale?".into(),
        )],
        "greet" | "ask_help" => vec![
            s("Piani in ritardo", "quali piani sono in ritardo?".into()),
            s(
                "Priorità di ispezione",
                "quali stabilimenti dovrei ispezionare per primi?".into(),
            ),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use vg_domain::convo::ToolResult;
    use vg_domain::error::{Error, Result};
    use vg_domain::session::SessionEntry;
    use vg_domain::stream::{BoxStream, StreamEvent};
    use vg_providers::ChatResponse;

    struct CannedProvider {
        reply: std::result::Result<String, String>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse> {
            match &self.reply {
                Ok(content) => Ok(ChatResponse {
                    content: content.clone(),
                    usage: None,
                    model: "canned".into(),
                }),
                Err(message) => Err(Error::Timeout(message.clone())),
            }
        }

        async fn chat_stream(
            &self,
            _req: ChatRequest,
        ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            Err(Error::Other("not used".into()))
        }

        async fn ping(&self) -> bool {
            true
        }

        fn provider_id(&self) -> &str {
            "canned"
        }
    }

    fn generator(reply: std::result::Result<String, String>) -> ResponseGenerator {
        ResponseGenerator::new(
            Arc::new(CannedProvider { reply }),
            Arc::new(Config::default()),
        )
    }

    fn state_with(intent: &str, tool_output: ToolResult) -> ConversationState {
        let mut state =
            ConversationState::new("u1", "domanda", Map::new(), SessionEntry::default());
        state.intent = intent.into();
        state.tool_output = Some(tool_output);
        state
    }

    #[tokio::test]
    async fn formatted_response_passes_through_without_llm() {
        let gen = generator(Err("llm must not be called".into()));
        let mut state = state_with(
            "ask_piano_description",
            ToolResult::formatted("piano_description", "Il piano A1 riguarda il latte crudo."),
        );
        gen.generate(&mut state).await;
        assert_eq!(state.final_response, "Il piano A1 riguarda il latte crudo.");
        assert!(!state.suggestions.is_empty());
    }

    #[tokio::test]
    async fn structured_data_goes_through_llm() {
        let gen = generator(Ok("Risposta generata dal modello.".into()));
        let mut state = state_with(
            "ask_top_risk_activities",
            ToolResult {
                kind: "attivita_rischio".into(),
                data: serde_json::json!({"items": [{"label": "Macellazione"}]}),
                formatted_response: None,
                items_count: Some(1),
                error: None,
            },
        );
        gen.generate(&mut state).await;
        assert_eq!(state.final_response, "Risposta generata dal modello.");
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_deterministic_formatter() {
        let gen = generator(Err("timeout".into()));
        let mut state = state_with(
            "ask_top_risk_activities",
            ToolResult {
                kind: "attivita_rischio".into(),
                data: serde_json::json!({"items": [{"label": "Macellazione"}, {"label": "Caseificio"}]}),
                formatted_response: None,
                items_count: Some(2),
                error: None,
            },
        );
        gen.generate(&mut state).await;
        assert!(state.final_response.contains("Macellazione"));
        assert!(state.final_response.contains("2 risultati"));
    }

    #[tokio::test]
    async fn tool_error_produces_apology_but_turn_completes() {
        let gen = generator(Ok("should not be used".into()));
        let mut state = state_with(
            "ask_piani_list",
            ToolResult::failed("piani_list", "database unreachable"),
        );
        gen.generate(&mut state).await;
        assert_eq!(state.final_response, APOLOGY);
    }

    #[test]
    fn suggestions_are_replayable_and_bounded() {
        let mut slots = Map::new();
        slots.insert("plan_code".into(), Value::String("B7".into()));
        let suggestions = suggestions_for("ask_piano_description", &slots);
        assert!(!suggestions.is_empty() && suggestions.len() <= 3);
        assert!(suggestions[0].query.contains("B7"));
    }

    #[test]
    fn deterministic_formatter_handles_empty_items() {
        let text = format_deterministic(&serde_json::json!({"items": []}));
        assert!(text.contains("Nessun risultato"));
    }
}
