//! Progress events emitted while a turn runs.
//!
//! Streaming clients receive these as SSE frames; the synchronous endpoint
//! ignores them. Sends never block the graph: a slow consumer just loses
//! progress frames, and a closed sink doubles as the disconnect signal for
//! cooperative cancellation.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEventKind {
    /// Node entry / progress.
    Status { node: &'static str, message: String },
    /// Intermediate explanation text for the user.
    Reasoning { text: String },
    /// One node finished.
    NodeTiming { node: &'static str, ms: u64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphEvent {
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub kind: GraphEventKind,
}

/// Optional, non-blocking event funnel handed to the graph.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<GraphEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<GraphEvent>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, kind: GraphEventKind) {
        let event = GraphEvent {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            kind,
        };
        // try_send: progress frames are droppable, the turn is not.
        if let Err(mpsc::error::TrySendError::Closed(_)) = self.tx.try_send(event) {
            tracing::trace!("event sink closed, consumer went away");
        }
    }

    pub fn status(&self, node: &'static str, message: impl Into<String>) {
        self.emit(GraphEventKind::Status {
            node,
            message: message.into(),
        });
    }

    pub fn reasoning(&self, text: impl Into<String>) {
        self.emit(GraphEventKind::Reasoning { text: text.into() });
    }

    pub fn node_timing(&self, node: &'static str, ms: u64) {
        self.emit(GraphEventKind::NodeTiming { node, ms });
    }

    /// The consumer dropped its receiver (SSE client disconnected).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
