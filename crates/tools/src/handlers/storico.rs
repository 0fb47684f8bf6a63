//! Historical non-conformity and sanction handlers.

use std::sync::Arc;

use serde_json::Value;

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

use crate::backend::{DataBackend, EstablishmentQuery};

use super::{slot_str, slot_usize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// storico_stabilimento
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StoricoStabilimentoTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for StoricoStabilimentoTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let query = EstablishmentQuery {
            num_registration: slot_str(&ctx.slots, "num_registration").map(String::from),
            partita_iva: slot_str(&ctx.slots, "partita_iva").map(String::from),
            ragione_sociale: slot_str(&ctx.slots, "ragione_sociale").map(String::from),
        };
        let history = self.backend.establishment_history(&query).await?;

        if history.is_empty() {
            return Ok(ToolResult::formatted(
                "storico_stabilimento",
                "Non risultano non conformità per lo stabilimento indicato, oppure lo \
                 stabilimento non è presente in anagrafe.",
            ));
        }

        let items: Vec<Value> = history
            .iter()
            .map(|nc| {
                serde_json::json!({
                    "label": format!("{} — {} ({})", nc.date, nc.code, nc.severity),
                    "data": nc.date,
                    "codice": nc.code,
                    "descrizione": nc.description,
                    "gravita": nc.severity,
                    "sanzione_eur": nc.sanction_eur,
                })
            })
            .collect();

        // Prose is generated by the LLM over the structured history.
        Ok(ToolResult {
            kind: "storico_stabilimento".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: None,
            items_count: Some(history.len()),
            error: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// stabilimenti_sanzionati
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StabilimentiSanzionatiTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for StabilimentiSanzionatiTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let limit = slot_usize(&ctx.slots, "limit", 10);
        let sanctioned = self
            .backend
            .sanctioned_establishments(slot_str(&ctx.slots, "categoria"), limit)
            .await?;

        if sanctioned.is_empty() {
            return Ok(ToolResult::formatted(
                "stabilimenti_sanzionati",
                "Nessuno stabilimento con sanzioni per i criteri indicati.",
            ));
        }

        let mut text = format!("Stabilimenti con sanzioni ({}):\n", sanctioned.len());
        for s in &sanctioned {
            text.push_str(&format!(
                "- {} ({}) — {} € il {} per {}\n",
                s.establishment.ragione_sociale,
                s.establishment.comune,
                s.amount_eur,
                s.date,
                s.reason
            ));
        }

        let items: Vec<Value> = sanctioned
            .iter()
            .map(|s| {
                serde_json::json!({
                    "label": format!("{} — {} €", s.establishment.ragione_sociale, s.amount_eur),
                    "num_registration": s.establishment.num_registration,
                    "data": s.date,
                    "importo_eur": s.amount_eur,
                    "motivo": s.reason,
                })
            })
            .collect();
        Ok(ToolResult {
            kind: "stabilimenti_sanzionati".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(sanctioned.len()),
            error: None,
        })
    }
}
