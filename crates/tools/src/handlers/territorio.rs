//! Geographic proximity handler.

use std::sync::Arc;

use serde_json::Value;

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

use crate::backend::DataBackend;

use super::{slot_f64, slot_str, slot_usize};

pub struct StabilimentiViciniTool {
    pub backend: Arc<dyn DataBackend>,
}

#[async_trait::async_trait]
impl ToolHandler for StabilimentiViciniTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let place = slot_str(&ctx.slots, "address")
            .or_else(|| slot_str(&ctx.slots, "location"))
            .unwrap_or_default();

        let Some((lat, lon)) = self.backend.geocode(place).await? else {
            return Ok(ToolResult::formatted(
                "stabilimenti_vicini",
                format!(
                    "Non sono riuscito a localizzare \"{place}\". Prova con un comune o \
                     un indirizzo più preciso."
                ),
            ));
        };

        let radius_km = slot_f64(&ctx.slots, "radius_km", 10.0);
        let limit = slot_usize(&ctx.slots, "limit", 10);
        let nearby = self
            .backend
            .establishments_near(lat, lon, radius_km, limit)
            .await?;

        if nearby.is_empty() {
            return Ok(ToolResult::formatted(
                "stabilimenti_vicini",
                format!("Nessuno stabilimento entro {radius_km:.0} km da {place}."),
            ));
        }

        let mut text = format!(
            "Stabilimenti entro {:.0} km da {} ({}):\n",
            radius_km,
            place,
            nearby.len()
        );
        for (e, distance) in &nearby {
            text.push_str(&format!(
                "- {} ({}) — {:.1} km\n",
                e.ragione_sociale, e.comune, distance
            ));
        }

        let items: Vec<Value> = nearby
            .iter()
            .map(|(e, distance)| {
                serde_json::json!({
                    "label": format!("{} — {:.1} km", e.ragione_sociale, distance),
                    "num_registration": e.num_registration,
                    "comune": e.comune,
                    "distanza_km": distance,
                })
            })
            .collect();
        Ok(ToolResult {
            kind: "stabilimenti_vicini".into(),
            data: serde_json::json!({ "items": items }),
            formatted_response: Some(text),
            items_count: Some(nearby.len()),
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

    fn ctx_with<'a>(
        metadata: &'a Map<String, Value>,
        session: &'a SessionEntry,
        pairs: &[(&str, Value)],
    ) -> ToolContext<'a> {
        ToolContext {
            intent: "ask_establishments_nearby",
            slots: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            metadata,
            session,
        }
    }

    #[tokio::test]
    async fn nearby_lists_with_distance() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = StabilimentiViciniTool {
            backend: Arc::new(InMemoryBackend::new()),
        };
        let result = tool
            .handle(ctx_with(
                &metadata,
                &session,
                &[("location", Value::String("Parma".into()))],
            ))
            .await
            .unwrap();
        assert!(result.formatted_response.unwrap().contains("km"));
        assert!(result.items_count.unwrap() > 0);
    }

    #[tokio::test]
    async fn unknown_place_asks_for_precision() {
        let metadata = Map::new();
        let session = SessionEntry::default();
        let tool = StabilimentiViciniTool {
            backend: Arc::new(InMemoryBackend::new()),
        };
        let result = tool
            .handle(ctx_with(
                &metadata,
                &session,
                &[("location", Value::String("Atlantide".into()))],
            ))
            .await
            .unwrap();
        assert!(result
            .formatted_response
            .unwrap()
            .contains("localizzare"));
    }
}
