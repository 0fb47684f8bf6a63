use std::sync::Arc;

use vg_dialogue::ConversationGraph;
use vg_domain::config::Config;
use vg_providers::LlmProvider;
use vg_sessions::SessionStore;
use vg_tools::DataBackend;

use crate::runtime::sender_lock::SenderLockMap;

/// Shared application state passed to all API handlers.
///
/// Everything here is initialized once at startup and immutable afterwards
/// apart from the session store and the per-sender locks, which manage
/// their own synchronization.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub provider: Arc<dyn LlmProvider>,
    pub backend: Arc<dyn DataBackend>,
    pub graph: Arc<ConversationGraph>,
    pub sessions: Arc<SessionStore>,
    pub sender_locks: Arc<SenderLockMap>,
}
