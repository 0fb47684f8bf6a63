//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-style gateways, vLLM, Together, and any other
//! endpoint that follows the chat completions contract. Remote by
//! definition: the registry refuses to build it unless the GDPR gate is
//! explicitly opened in config.

use std::time::Duration;

use serde_json::Value;

use crate::sse::{body_event_stream, Framing};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::{from_reqwest, resolve_api_key};
use vg_domain::config::LlmConfig;
use vg_domain::error::{Error, Result};
use vg_domain::stream::{BoxStream, StreamEvent, Usage};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from the LLM config. Resolves the API key from the
    /// configured env var eagerly so a missing key fails at startup, not on
    /// the first user turn.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(cfg.api_key_env.as_deref())?;

        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CALL_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "openai_compat".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": vg_domain::chat::role_str(m.role),
                    "content": m.content,
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": req.model.clone().unwrap_or_else(|| self.default_model.clone()),
            "messages": messages,
            "stream": stream,
        });

        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }

    async fn post_chat(&self, req: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req, stream);

        tracing::debug!(provider = %self.id, url = %url, stream, "openai_compat chat request");

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(timeout) = req.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: self.id.clone(),
                message: format!("HTTP {} - {}", status.as_u16(), text),
            });
        }
        Ok(resp)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

fn parse_chat_response(body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: "openai_compat".into(),
            message: "no choices in response".into(),
        })?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(ChatResponse {
        content,
        usage: body.get("usage").and_then(parse_usage),
        model,
    })
}

/// One SSE `data:` payload of a completions stream → a stream event.
fn parse_sse_data(data: &str) -> Option<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return Some(Ok(StreamEvent::Done {
            usage: None,
            finish_reason: Some("stop".into()),
        }));
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            return Some(Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            }));
        }
        return None;
    };

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        return Some(Ok(StreamEvent::Done {
            usage: v.get("usage").and_then(parse_usage),
            finish_reason: Some(fr.to_string()),
        }));
    }

    let text = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    if text.is_empty() {
        return None;
    }
    Some(Ok(StreamEvent::Token {
        text: text.to_string(),
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let resp = self.post_chat(&req, false).await?;
        let body: Value = resp.json().await.map_err(from_reqwest)?;
        parse_chat_response(&body)
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.post_chat(&req, true).await?;
        Ok(body_event_stream(resp, Framing::Sse, parse_sse_data))
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        let mut builder = self.client.get(&url).timeout(Duration::from_secs(3));
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
