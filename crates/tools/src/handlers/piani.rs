//! Monitoring-plan handlers.

use std::sync::Arc;

use serde_json::Value;

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

use crate::backend::{DataBackend, Establishment, PlanDelay};

use super::slot_str;

fn establishment_item(e: &Establishment) -> Value {
    serde_json::json!({
        "label": format!("{} ({})", e.ragione_sociale, e.comune),
        "num_registration": e.num_registration,
        "ragione_sociale": e.ragione_sociale,
        "comune": e.comune,
        "categoria": e.categoria,
    })
}

fn delay_item(d: &PlanDelay) -> Value {
    serde_json::json!({
        "label": format!("{} — {} ({:.0}% completato)", d.code, d.title, d.completion_pct()),
        "codice": d.code,
        "attesi": d.expected_samples,
        "eseguiti": d.taken_samples,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// piano_description
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PianoDescriptionTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for PianoDescriptionTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let code = slot_str(&ctx.slots, "plan_code").unwrap_or_default();
        let Some(plan) = self.backend.plan_by_code(code).await? else {
            return Ok(ToolResult::formatted(
                "piano_description",
                format!("Non ho trovato nessun piano con codice **{code}**."),
            ));
        };

        let text = format!(
            "**{} — {}** ({})\n\n{}",
            plan.code, plan.title, plan.year, plan.description
        );
        Ok(ToolResult {
            kind: "piano_description".into(),
            data: serde_json::to_value(&plan).unwrap_or(Value::Null),
            formatted_response: Some(text),
            items_count: None,
            error: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// piano_stabilimenti
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PianoStabilimentiTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for PianoStabilimentiTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let code = slot_str(&ctx.slots, "plan_code").unwrap_or_default();
        let mut establishments = self.backend.plan_establishments(code).await?;

        if let Some(categoria) = slot_str(&ctx.slots, "categoria") {
            establishments.retain(|e| e.categoria.eq_ignore_ascii_case(categoria));
        }

        if establishments.is_empty() {
            return Ok(ToolResult::formatted(
                "piano_stabilimenti",
                format!("Nessuno stabilimento da campionare risulta per il piano **{code}**."),
            ));
        }

        let mut text = format!(
            "Stabilimenti da campionare per il piano **{}** ({}):\n",
            code.to_uppercase(),
            establishments.len()
        );
        for e in &establishments {
            text.push_str(&format!(
                "- {} — {} ({})\n",
                e.num_registration, e.ragione_sociale, e.comune
            ));
        }

        let items: Vec<Value> = establishments.iter().map(establishment_item).collect();
        Ok(ToolResult {
            kind: "piano_stabilimenti".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(establishments.len()),
            error: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// piani_list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PianiListTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for PianiListTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let topic = slot_str(&ctx.slots, "topic");
        let plans = self.backend.plans(topic).await?;

        if plans.is_empty() {
            return Ok(ToolResult::formatted(
                "piani_list",
                "Nessun piano di monitoraggio trovato per i criteri indicati.",
            ));
        }

        let mut text = format!("Piani di monitoraggio attivi ({}):\n", plans.len());
        for p in &plans {
            text.push_str(&format!("- **{}** — {}\n", p.code, p.title));
        }

        let items: Vec<Value> = plans
            .iter()
            .map(|p| {
                serde_json::json!({
                    "label": format!("{} — {}", p.code, p.title),
                    "codice": p.code,
                    "tema": p.topic,
                })
            })
            .collect();
        Ok(ToolResult {
            kind: "piani_list".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(plans.len()),
            error: None,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// piani_ritardo / piano_ritardo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PianiRitardoTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for PianiRitardoTool {
    async fn handle(&self, _ctx: ToolContext<'_>) -> Result<ToolResult> {
        let delayed = self.backend.delayed_plans().await?;

        if delayed.is_empty() {
            return Ok(ToolResult::formatted(
                "piani_ritardo",
                "Ottime notizie: nessun piano risulta in ritardo sul campionamento.",
            ));
        }

        let mut text = format!("Piani in ritardo sul campionamento ({}):\n", delayed.len());
        for d in &delayed {
            text.push_str(&format!(
                "- **{}** — {}: {}/{} campioni ({:.0}%)\n",
                d.code, d.title, d.taken_samples, d.expected_samples, d.completion_pct()
            ));
        }

        let items: Vec<Value> = delayed.iter().map(delay_item).collect();
        Ok(ToolResult {
            kind: "piani_ritardo".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(delayed.len()),
            error: None,
        })
    }
}

pub struct PianoRitardoTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for PianoRitardoTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let code = slot_str(&ctx.slots, "plan_code").unwrap_or_default();
        let Some(delay) = self.backend.plan_delay(code).await? else {
            return Ok(ToolResult::formatted(
                "piano_ritardo",
                format!("Non ho dati di avanzamento per il piano **{code}**."),
            ));
        };

        let status = if delay.is_late() {
            "in ritardo"
        } else {
            "in linea con la programmazione"
        };
        let text = format!(
            "Il piano **{} — {}** è {}: {}/{} campioni eseguiti ({:.0}%).",
            delay.code,
            delay.title,
            status,
            delay.taken_samples,
            delay.expected_samples,
            delay.completion_pct()
        );
        Ok(ToolResult {
            kind: "piano_ritardo".into(),
            data: serde_json::to_value(&delay).unwrap_or(Value::Null),
            formatted_response: Some(text),
            items_count: None,
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

    fn ctx_with_slot<'a>(
        metadata: &'a Map<String, Value>,
        session: &'a SessionEntry,
        key: &str,
        value: &str,
    ) -> ToolContext<'a> {
        let mut slots = Map::new();
        slots.insert(key.into(), Value::String(value.into()));
        ToolContext {
            intent: "test",
            slots,
            metadata,
            session,
        }
    }

    #[tokio::test]
    async fn description_renders_plan() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = PianoDescriptionTool { backend: backend() };
        let result = tool
            .handle(ctx_with_slot(&metadata, &session, "plan_code", "A1"))
            .await
            .unwrap();
        let text = result.formatted_response.unwrap();
        assert!(text.contains("A1"));
        assert!(text.contains("latte"));
    }

    #[tokio::test]
    async fn description_unknown_plan() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = PianoDescriptionTool { backend: backend() };
        let result = tool
            .handle(ctx_with_slot(&metadata, &session, "plan_code", "Z9"))
            .await
            .unwrap();
        assert!(result.formatted_response.unwrap().contains("Non ho trovato"));
    }

    #[tokio::test]
    async fn stabilimenti_carry_items_count() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = PianoStabilimentiTool { backend: backend() };
        let result = tool
            .handle(ctx_with_slot(&metadata, &session, "plan_code", "A1"))
            .await
            .unwrap();
        let count = result.items_count.unwrap();
        assert!(count > 0);
        assert_eq!(
            result.data["items"].as_array().unwrap().len(),
            count
        );
    }

    #[tokio::test]
    async fn ritardo_reports_late_plans_only() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = PianiRitardoTool { backend: backend() };
        let result = tool
            .handle(ToolContext {
                intent: "ask_delayed_plans",
                slots: Map::new(),
                metadata: &metadata,
                session: &session,
            })
            .await
            .unwrap();
        let text = result.formatted_response.unwrap();
        assert!(text.contains("A1"));
        assert!(!text.contains("B2"));
    }

    #[tokio::test]
    async fn single_plan_status_in_line() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = PianoRitardoTool { backend: backend() };
        let result = tool
            .handle(ctx_with_slot(&metadata, &session, "plan_code", "b2"))
            .await
            .unwrap();
        assert!(result
            .formatted_response
            .unwrap()
            .contains("in linea"));
    }
}
