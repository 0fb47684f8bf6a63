//! Local Ollama adapter.
//!
//! Speaks the native `/api/chat` contract: JSON request with an OpenAI-style
//! messages array, NDJSON streaming, `format: "json"` for constrained
//! output. This is the default backend — inspection data never leaves the
//! machine.

use std::time::Duration;

use serde_json::Value;

use crate::sse::{body_event_stream, Framing};
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;
use vg_domain::config::LlmConfig;
use vg_domain::error::{Error, Result};
use vg_domain::stream::{BoxStream, StreamEvent, Usage};

/// Connect timeout + ceiling for calls that carry no explicit deadline.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OllamaProvider {
    id: String,
    base_url: String,
    default_model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_CALL_TIMEOUT)
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "ollama".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
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

        let mut options = serde_json::Map::new();
        if let Some(temp) = req.temperature {
            options.insert("temperature".into(), serde_json::json!(temp));
        }
        if let Some(max) = req.max_tokens {
            options.insert("num_predict".into(), serde_json::json!(max));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }
        if req.json_mode {
            body["format"] = Value::String("json".into());
        }
        body
    }

    async fn post_chat(&self, req: &ChatRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_body(req, stream);

        tracing::debug!(provider = %self.id, url = %url, stream, "ollama chat request");

        let mut builder = self.client.post(&url).json(&body);
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
    let prompt = v.get("prompt_eval_count")?.as_u64()? as u32;
    let completion = v.get("eval_count")?.as_u64()? as u32;
    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: prompt + completion,
    })
}

fn parse_chat_response(body: &Value, fallback_model: &str) -> ChatResponse {
    let content = body
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(fallback_model)
        .to_string();

    ChatResponse {
        content,
        usage: parse_usage(body),
        model,
    }
}

/// One NDJSON line of an Ollama stream → a stream event.
fn parse_stream_line(line: &str) -> Option<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Some(Err(Error::Json(e))),
    };

    if v.get("done").and_then(|d| d.as_bool()).unwrap_or(false) {
        return Some(Ok(StreamEvent::Done {
            usage: parse_usage(&v),
            finish_reason: v
                .get("done_reason")
                .and_then(|r| r.as_str())
                .map(String::from),
        }));
    }

    let text = v
        .get("message")
        .and_then(|m| m.get("content"))
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
impl LlmProvider for OllamaProvider {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse> {
        let resp = self.post_chat(&req, false).await?;
        let body: Value = resp.json().await.map_err(from_reqwest)?;
        Ok(parse_chat_response(&body, &self.default_model))
    }

    async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.post_chat(&req, true).await?;
        Ok(body_event_stream(resp, Framing::Ndjson, parse_stream_line))
    }

    async fn ping(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url);
        self.client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}
