//! Staff directory handler.

use std::sync::Arc;

use serde_json::Value;

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

use crate::backend::DataBackend;

use super::slot_str;

pub struct RubricaPersonaleTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for RubricaPersonaleTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let plan_code = slot_str(&ctx.slots, "plan_code");
        let topic = slot_str(&ctx.slots, "topic");
        let contacts = self.backend.staff_lookup(plan_code, topic).await?;

        if contacts.is_empty() {
            return Ok(ToolResult::formatted(
                "rubrica_personale",
                "Non ho trovato un referente per il piano o la materia indicata.",
            ));
        }

        let mut text = String::from("Referenti trovati:\n");
        for c in &contacts {
            text.push_str(&format!(
                "- **{}** — {}\n  {} · {}\n",
                c.name, c.role, c.email, c.phone
            ));
        }

        let items: Vec<Value> = contacts
            .iter()
            .map(|c| {
                serde_json::json!({
                    "label": format!("{} — {}", c.name, c.role),
                    "email": c.email,
                    "telefono": c.phone,
                })
            })
            .collect();
        Ok(ToolResult {
            kind: "rubrica_personale".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(contacts.len()),
            error: None,
        })
    }
}
