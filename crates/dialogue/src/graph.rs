//! Conversation graph — the per-turn state machine.
//!
//! ```text
//! entry → classify → dialogue_manager ├── ask_user → END
//!                                     ├── fallback_tool → response → END
//!                                     └── <tool_node> → response → END
//! ```
//!
//! Nodes run sequentially on one task, each timed and appended to the
//! execution path. The hard per-turn deadline is the single cancellation
//! signal: on expiry the turn short-circuits to the stock timeout text and
//! the caller discards the session write. A closed event sink (SSE client
//! gone) aborts the turn cooperatively between nodes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use vg_domain::config::Config;
use vg_domain::convo::{ConversationState, DmAction, ToolResult};
use vg_domain::error::Result;
use vg_domain::session::SessionEntry;
use vg_providers::LlmProvider;

use crate::dm;
use crate::events::EventSink;
use crate::fallback::FallbackEngine;
use crate::intents;
use crate::response::ResponseGenerator;
use crate::retriever::ExampleRetriever;
use crate::router::IntentRouter;
use crate::shaper;
use crate::tools::{ToolContext, ToolRegistry};

pub const NODE_CLASSIFY: &str = "classify";
pub const NODE_DIALOGUE_MANAGER: &str = "dialogue_manager";
pub const NODE_ASK_USER: &str = "ask_user";
pub const NODE_FALLBACK: &str = "fallback_tool";
pub const NODE_RESPONSE: &str = "response";

/// Stock Italian text returned when the per-turn deadline fires.
pub const TIMEOUT_TEXT: &str =
    "La richiesta sta impiegando più tempo del previsto ed è stata interrotta. \
     Riprova tra qualche istante, magari con una domanda più specifica.";

pub const ERR_TIMEOUT: &str = "timeout";
pub const ERR_CANCELLED: &str = "cancelled";

pub struct ConversationGraph {
    router: IntentRouter,
    fallback: FallbackEngine,
    response: ResponseGenerator,
    tools: Arc<ToolRegistry>,
    config: Arc<Config>,
}

impl ConversationGraph {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        retriever: Arc<dyn ExampleRetriever>,
        tools: Arc<ToolRegistry>,
        config: Arc<Config>,
    ) -> Result<Self> {
        Ok(Self {
            router: IntentRouter::new(provider.clone(), retriever, config.clone())?,
            fallback: FallbackEngine::new(provider.clone(), config.clone()),
            response: ResponseGenerator::new(provider, config.clone()),
            tools,
            config,
        })
    }

    /// Classifier cache size, surfaced by `/status`.
    pub fn cache_len(&self) -> usize {
        self.router.cache_len()
    }

    /// Classifier access for the `/parse` debug endpoint.
    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    /// Run one full turn under the configured hard deadline.
    pub async fn run(
        &self,
        sender: &str,
        message: &str,
        metadata: Map<String, Value>,
        session: SessionEntry,
        sink: Option<EventSink>,
    ) -> ConversationState {
        let deadline = Duration::from_secs(self.config.session.graph_timeout_s);
        let state = ConversationState::new(sender, message, metadata, session);

        match tokio::time::timeout(deadline, self.run_inner(state, sink)).await {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!(sender, "turn deadline exceeded");
                let mut timed_out = ConversationState::new(
                    sender,
                    message,
                    Map::new(),
                    SessionEntry::default(),
                );
                timed_out.final_response = TIMEOUT_TEXT.to_string();
                timed_out.error = Some(ERR_TIMEOUT.to_string());
                timed_out
            }
        }
    }

    async fn run_inner(
        &self,
        mut state: ConversationState,
        sink: Option<EventSink>,
    ) -> ConversationState {
        // ── classify ──────────────────────────────────────────────
        if cancelled(&sink, &mut state) {
            return state;
        }
        let started = Instant::now();
        if let Some(s) = &sink {
            s.status(NODE_CLASSIFY, "Sto analizzando la richiesta…");
        }
        let classification = self.router.classify(&state.message, &state.metadata).await;
        state.intent = classification.top_intent().to_string();
        state.classification_confidence = classification.top_confidence();
        state.message_kind = classification.message_kind;
        state.slots = classification.extracted_slots.clone();
        state.candidates = classification.candidates.clone();
        record(&mut state, NODE_CLASSIFY, started, &sink);

        // ── dialogue_manager ──────────────────────────────────────
        if cancelled(&sink, &mut state) {
            return state;
        }
        let started = Instant::now();
        let decision = dm::decide(
            &state.message,
            &classification,
            &state.dialogue_state,
            &state.session,
            &self.config.dialogue,
        );
        state.dialogue_state = decision.next_dialogue_state.clone();
        state.intent = decision.intent.clone();
        state.slots = decision.slots.clone();
        state.dm_action = decision.action;
        state.dm_target_tool = decision.target_tool.clone();
        state.dm_question = decision.question.clone();
        if decision.topic_changed {
            state.session.detail_context.clear();
            state.session.last_response_context.clear();
        }
        if let Some(s) = &sink {
            match state.dm_action {
                DmAction::AskUser => {
                    s.reasoning("Mi manca un dettaglio, chiedo un chiarimento.")
                }
                DmAction::Fallback => {
                    s.reasoning("Richiesta non riconosciuta, avvio il recupero guidato.")
                }
                DmAction::Execute => {}
            }
        }
        record(&mut state, NODE_DIALOGUE_MANAGER, started, &sink);

        match state.dm_action {
            // ── ask_user → END ────────────────────────────────────
            DmAction::AskUser => {
                // A clarifying question breaks any fallback chain.
                state.session.clear_fallback();
                let started = Instant::now();
                state.final_response = state
                    .dm_question
                    .clone()
                    .unwrap_or_else(|| "Puoi darmi qualche dettaglio in più?".to_string());
                record(&mut state, NODE_ASK_USER, started, &sink);
                state
            }

            // ── fallback_tool → response → END ────────────────────
            DmAction::Fallback => {
                if cancelled(&sink, &mut state) {
                    return state;
                }
                let started = Instant::now();
                if let Some(s) = &sink {
                    s.status(NODE_FALLBACK, "Cerco di interpretare la richiesta…");
                }
                let message = state.message.clone();
                let text = self.fallback.recover(&message, &mut state.session).await;
                state.tool_output = Some(ToolResult::formatted("fallback", text));
                record(&mut state, NODE_FALLBACK, started, &sink);

                self.response_node(state, sink).await
            }

            // ── <tool_node> → response → END ──────────────────────
            DmAction::Execute => {
                if cancelled(&sink, &mut state) {
                    return state;
                }
                // A turn that dispatches a real tool ends any fallback
                // exchange.
                state.session.clear_fallback();

                let tool_node = intents::tool_for_intent(&state.intent).unwrap_or("tool");
                let started = Instant::now();
                if let Some(s) = &sink {
                    s.status(tool_node, "Sto interrogando i dati…");
                }

                let ctx = ToolContext {
                    intent: &state.intent,
                    slots: state.slots.clone(),
                    metadata: &state.metadata,
                    session: &state.session,
                };
                let tool_name = state
                    .dm_target_tool
                    .clone()
                    .unwrap_or_else(|| tool_node.to_string());
                let result = self.tools.dispatch(&tool_name, ctx).await;

                // Two-phase shaping; confirm/decline consume the parked
                // payload instead of producing one.
                let is_two_phase_control = matches!(
                    state.intent.as_str(),
                    "confirm_show_details" | "decline_show_details"
                );
                if is_two_phase_control {
                    state.session.detail_context.clear();
                    state.tool_output = Some(result);
                } else {
                    let (shaped, detail) =
                        shaper::shape(result, &state.intent, &state.slots, &self.config.two_phase);
                    state.tool_output = Some(shaped);
                    if let Some(detail) = detail {
                        state.detail_context = detail;
                        state.has_more_details = true;
                    }
                }
                if let Some(error) = state.tool_output.as_ref().and_then(|t| t.error.clone()) {
                    state.error = Some(error);
                }
                record(&mut state, tool_node, started, &sink);

                self.response_node(state, sink).await
            }
        }
    }

    async fn response_node(
        &self,
        mut state: ConversationState,
        sink: Option<EventSink>,
    ) -> ConversationState {
        if cancelled(&sink, &mut state) {
            return state;
        }
        let started = Instant::now();
        if let Some(s) = &sink {
            s.status(NODE_RESPONSE, "Sto preparando la risposta…");
        }
        self.response.generate(&mut state).await;
        record(&mut state, NODE_RESPONSE, started, &sink);
        state
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Node bookkeeping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn record(
    state: &mut ConversationState,
    node: &'static str,
    started: Instant,
    sink: &Option<EventSink>,
) {
    let ms = started.elapsed().as_millis() as u64;
    state.execution_path.push(node);
    state.node_timings.insert(node.to_string(), ms);
    if let Some(s) = sink {
        s.node_timing(node, ms);
    }
}

/// Cooperative cancellation on SSE disconnect.
fn cancelled(sink: &Option<EventSink>, state: &mut ConversationState) -> bool {
    let closed = sink.as_ref().map(|s| s.is_closed()).unwrap_or(false);
    if closed && state.error.is_none() {
        tracing::debug!(sender = %state.sender, "client disconnected, abandoning turn");
        state.error = Some(ERR_CANCELLED.to_string());
    }
    closed
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
