//! Internal procedure / document retrieval handler.

use std::sync::Arc;

use serde_json::Value;

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

use crate::backend::DataBackend;

use super::slot_str;

/// Documents retrieved per question.
const RETRIEVE_K: usize = 3;

pub struct ProcedureRagTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for ProcedureRagTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let topic = slot_str(&ctx.slots, "topic").unwrap_or_default();
        let docs = self.backend.search_documents(topic, RETRIEVE_K).await?;

        if docs.is_empty() {
            return Ok(ToolResult::formatted(
                "procedure_rag",
                "Non ho trovato procedure o documenti sull'argomento indicato.",
            ));
        }

        let items: Vec<Value> = docs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "label": d.title,
                    "estratto": d.snippet,
                    "fonte": d.source,
                })
            })
            .collect();

        // The response generator writes the answer from the snippets.
        Ok(ToolResult {
            kind: "procedure_rag".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: None,
            items_count: Some(docs.len()),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use vg_domain::session::SessionEntry;

    use crate::memory::InMemoryBackend;

    #[tokio::test]
    async fn documents_retrieved_for_topic() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let mut slots = Map::new();
        slots.insert("topic".into(), Value::String("allerta".into()));

        let tool = ProcedureRagTool {
            backend: Arc::new(InMemoryBackend::new()),
        };
        let result = tool
            .handle(ToolContext {
                intent: "ask_procedure_info",
                slots,
                metadata: &metadata,
                session: &session,
            })
            .await
            .unwrap();
        assert!(result.formatted_response.is_none());
        let items = result.data["items"].as_array().unwrap();
        assert!(items
            .iter()
            .any(|d| d["label"].as_str().unwrap().contains("allerta")));
    }
}
