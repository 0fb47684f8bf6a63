//! Two-phase confirm / decline handlers.
//!
//! `show_details` re-emits the payload the shaper parked in the session's
//! detail context; `dismiss_details` acknowledges and lets it drop. The
//! graph clears the context after either one runs.

use vg_dialogue::{ToolContext, ToolHandler};
use vg_domain::convo::ToolResult;
use vg_domain::error::Result;

const NOTHING_PENDING: &str = "Non ho dettagli in sospeso da mostrare. Fammi pure un'altra domanda.";
const DISMISSED: &str = "Va bene, lasciamo perdere i dettagli. Fammi sapere se ti serve altro.";

pub struct ShowDetailsTool;

#[async_trait::async_trait]
impl ToolHandler for ShowDetailsTool {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult> {
        let Some(parked) = ctx.session.detail_context.get("result") else {
            return Ok(ToolResult::formatted("show_details", NOTHING_PENDING));
        };

        match serde_json::from_value::<ToolResult>(parked.clone()) {
            Ok(full) => Ok(ToolResult {
                kind: "show_details".into(),
                data: full.data,
                formatted_response: full.formatted_response,
                items_count: full.items_count,
                error: None,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "parked detail payload is unreadable");
                Ok(ToolResult::formatted("show_details", NOTHING_PENDING))
            }
        }
    }
}

pub struct DismissDetailsTool;

#[async_trait::async_trait]
impl ToolHandler for DismissDetailsTool {
    async fn handle(&self, _ctx: ToolContext<'_>) -> Result<ToolResult> {
        Ok(ToolResult::formatted("dismiss_details", DISMISSED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};
    use vg_domain::session::SessionEntry;

    fn ctx<'a>(session: &'a SessionEntry, metadata: &'a Map<String, Value>) -> ToolContext<'a> {
        ToolContext {
            intent: "confirm_show_details",
            slots: Map::new(),
            metadata,
            session,
        }
    }

    #[tokio::test]
    async fn show_details_emits_parked_payload() {
        let full = ToolResult {
            kind: "piano_stabilimenti".into(),
            data: serde_json::json!({"items": [{"label": "A"}, {"label": "B"}]}),
            formatted_response: Some("elenco completo di 27 stabilimenti".into()),
            items_count: Some(27),
            error: None,
        };
        let mut session = SessionEntry::default();
        session
            .detail_context
            .insert("result".into(), serde_json::to_value(&full).unwrap());
        let metadata = Map::new();

        let result = ShowDetailsTool.handle(ctx(&session, &metadata)).await.unwrap();
        assert_eq!(
            result.formatted_response.as_deref(),
            Some("elenco completo di 27 stabilimenti")
        );
        assert_eq!(result.items_count, Some(27));
    }

    #[tokio::test]
    async fn show_details_without_context_explains() {
        let session = SessionEntry::default();
        let metadata = Map::new();
        let result = ShowDetailsTool.handle(ctx(&session, &metadata)).await.unwrap();
        assert!(result.formatted_response.unwrap().contains("in sospeso"));
    }

    #[tokio::test]
    async fn dismiss_acknowledges() {
        let session = SessionEntry::default();
        let metadata = Map::new();
        let result = DismissDetailsTool.handle(ctx(&session, &metadata)).await.unwrap();
        assert!(result.formatted_response.unwrap().contains("Va bene"));
    }
}
