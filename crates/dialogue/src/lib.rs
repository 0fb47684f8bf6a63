pub mod cache;
pub mod dm;
pub mod events;
pub mod fallback;
pub mod graph;
pub mod heuristics;
pub mod intents;
pub mod response;
pub mod retriever;
pub mod router;
pub mod shaper;
pub mod slots;
pub mod tools;

// Re-exports for convenience.
pub use events::{EventSink, GraphEvent};
pub use graph::ConversationGraph;
pub use retriever::{ExampleRetriever, FewShotExample, StaticRetriever};
pub use tools::{ToolContext, ToolHandler, ToolRegistry};
