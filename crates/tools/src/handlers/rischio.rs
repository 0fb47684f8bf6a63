//! Risk and priority handlers.

use std::sync::Arc;

use serde_json::Value;

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

use crate::backend::DataBackend;

use super::{slot_str, slot_usize};

/// The caller's unit, preferring the explicit slot over enriched metadata.
fn effective_asl<'a>(ctx: &'a ToolContext<'_>) -> Option<&'a str> {
    slot_str(&ctx.slots, "asl").or_else(|| {
        ctx.metadata
            .get("asl")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// priorita_stabilimenti / priorita_rischio
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared by the inspection-priority and risk-ranking intents: both read
/// the scored ranking, they differ in limit and framing.
pub struct PrioritaTool {
    pub backend: Arc<dyn DataBackend>,
    pub kind: &'static str,
    pub default_limit: usize,
}

#[async_trait::async_trait]
impl ToolHandler for PrioritaTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let limit = slot_usize(&ctx.slots, "limit", self.default_limit);
        let scored = self
            .backend
            .priority_establishments(effective_asl(&ctx), limit)
            .await?;

        if scored.is_empty() {
            return Ok(ToolResult::formatted(
                self.kind,
                "Nessuno stabilimento trovato per i criteri indicati.",
            ));
        }

        let mut text = format!("Stabilimenti in ordine di priorità ({}):\n", scored.len());
        for (idx, s) in scored.iter().enumerate() {
            text.push_str(&format!(
                "{}. {} ({}) — rischio {:.2}\n",
                idx + 1,
                s.establishment.ragione_sociale,
                s.establishment.comune,
                s.score
            ));
        }

        let items: Vec<Value> = scored
            .iter()
            .map(|s| {
                serde_json::json!({
                    "label": format!(
                        "{} ({}) — rischio {:.2}",
                        s.establishment.ragione_sociale, s.establishment.comune, s.score
                    ),
                    "num_registration": s.establishment.num_registration,
                    "score": s.score,
                    "motivi": s.reasons,
                })
            })
            .collect();
        Ok(ToolResult {
            kind: self.kind.into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(scored.len()),
            error: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// attivita_rischio
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AttivitaRischioTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for AttivitaRischioTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let limit = slot_usize(&ctx.slots, "limit", 5);
        let risks = self.backend.top_risk_activities(limit).await?;

        let items: Vec<Value> = risks
            .iter()
            .map(|r| {
                serde_json::json!({
                    "label": format!("{} — rischio {:.2} ({} stabilimenti)",
                                     r.categoria, r.score, r.establishments),
                    "categoria": r.categoria,
                    "score": r.score,
                    "stabilimenti": r.establishments,
                })
            })
            .collect();

        // No formatted text: the response generator writes the prose.
        Ok(ToolResult {
            kind: "attivita_rischio".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: None,
            items_count: Some(risks.len()),
            error: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// mai_ispezionati
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MaiIspezionatiTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for MaiIspezionatiTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let limit = slot_usize(&ctx.slots, "limit", 10);
        let never = self
            .backend
            .never_inspected(effective_asl(&ctx), slot_str(&ctx.slots, "categoria"), limit)
            .await?;

        if never.is_empty() {
            return Ok(ToolResult::formatted(
                "mai_ispezionati",
                "Nessun operatore risulta mai ispezionato per i criteri indicati.",
            ));
        }

        let mut text = format!("Operatori mai ispezionati ({}):\n", never.len());
        for e in &never {
            text.push_str(&format!(
                "- {} — {} ({}, {})\n",
                e.num_registration, e.ragione_sociale, e.comune, e.categoria
            ));
        }

        let items: Vec<Value> = never
            .iter()
            .map(|e| {
                serde_json::json!({
                    "label": format!("{} ({})", e.ragione_sociale, e.comune),
                    "num_registration": e.num_registration,
                    "categoria": e.categoria,
                })
            })
            .collect();
        Ok(ToolResult {
            kind: "mai_ispezionati".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(never.len()),
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

    fn backend() -> Arc<dyn DataBackend> {
        Arc::new(InMemoryBackend::new())
    }

    #[tokio::test]
    async fn priorita_respects_limit_slot() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let mut slots = Map::new();
        slots.insert("limit".into(), Value::from(2));

        let tool = PrioritaTool {
            backend: backend(),
            kind: "priorita_stabilimenti",
            default_limit: 5,
        };
        let result = tool
            .handle(ToolContext {
                intent: "ask_priority_establishment",
                slots,
                metadata: &metadata,
                session: &session,
            })
            .await
            .unwrap();
        assert_eq!(result.items_count, Some(2));
    }

    #[tokio::test]
    async fn attivita_returns_structured_data_only() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = AttivitaRischioTool { backend: backend() };
        let result = tool
            .handle(ToolContext {
                intent: "ask_top_risk_activities",
                slots: Map::new(),
                metadata: &metadata,
                session: &session,
            })
            .await
            .unwrap();
        assert!(result.formatted_response.is_none());
        assert!(result.items_count.unwrap() > 0);
    }

    #[tokio::test]
    async fn mai_ispezionati_lists_operators() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = MaiIspezionatiTool { backend: backend() };
        let result = tool
            .handle(ToolContext {
                intent: "ask_never_inspected",
                slots: Map::new(),
                metadata: &metadata,
                session: &session,
            })
            .await
            .unwrap();
        assert!(result.formatted_response.unwrap().contains("mai ispezionati"));
    }
}
