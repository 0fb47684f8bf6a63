use std::time::Duration;

use vg_domain::chat::Message;
use vg_domain::error::Result;
use vg_domain::stream::{BoxStream, StreamEvent, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// When `true`, request the model to respond with valid JSON only.
    pub json_mode: bool,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
    /// Per-call deadline. In-flight HTTP is aborted when it expires.
    pub timeout: Option<Duration>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// Token usage information, when the backend reports it.
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// The orchestrator consumes exactly this surface: a blocking completion for
/// classification and generation, a token stream for SSE delivery, and a
/// liveness probe for `/status`. Adding a backend means implementing this
/// trait and registering it in [`crate::registry::build_provider`].
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// Send a chat completion request and return a stream of token events.
    async fn chat_stream(&self, req: ChatRequest)
        -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Cheap reachability probe for readiness reporting.
    async fn ping(&self) -> bool;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
