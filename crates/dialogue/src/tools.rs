//! Tool dispatch contract.
//!
//! The orchestrator treats each tool as a named async function over the
//! current slots and metadata. Handlers are registered once at startup and
//! the registry is read-only afterwards. Handler failures never escape:
//! they are folded into `ToolResult.error` so the response generator can
//! apologize while the turn still completes.

use std::collections::HashMap;

use serde_json::{Map, Value};

use vg_domain::convo::ToolResult;
use vg_domain::error::Result;
use vg_domain::session::SessionEntry;

/// Everything a handler may look at for one dispatch. Handlers receive a
/// copy of the slots and must not retain references past the call.
pub struct ToolContext<'a> {
    pub intent: &'a str,
    pub slots: Map<String, Value>,
    pub metadata: &'a Map<String, Value>,
    /// Read-only session view (the two-phase handlers read the parked
    /// payload from here).
    pub session: &'a SessionEntry,
}

#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, ctx: ToolContext<'_>) -> Result<ToolResult>;
}

/// Static name → handler table, immutable after startup.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Box<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Box<dyn ToolHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            tracing::warn!(tool = %name, "tool handler registered twice, keeping the newer one");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Invoke a tool. Unknown names and handler errors both come back as
    /// a `ToolResult` carrying `error` — the graph never sees an Err.
    pub async fn dispatch(&self, name: &str, ctx: ToolContext<'_>) -> ToolResult {
        let Some(handler) = self.handlers.get(name) else {
            tracing::error!(tool = %name, "no handler registered");
            return ToolResult::failed(name, format!("tool '{name}' not registered"));
        };

        match handler.handle(ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool handler failed");
                ToolResult::failed(name, e.to_string())
            }
        }
    }
}
