//! Process-local session store.
//!
//! Maps an opaque sender id to its [`SessionEntry`]. Nothing is persisted:
//! conversational memory lives exactly as long as the sliding TTL allows.
//! Readers copy entries out and writers replace them whole, so the lock is
//! held only for the map operation itself.
//!
//! Age semantics: an entry older than TTL is treated as absent (the sender
//! starts fresh) but may survive in the map until a sweep; entries older
//! than 2×TTL are removed by the sweep, which runs every N writes and on
//! the gateway's background tick.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use vg_domain::config::SessionConfig;
use vg_domain::session::SessionEntry;

pub struct SessionStore {
    ttl: Duration,
    evict_every_writes: u64,
    writes: AtomicU64,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            ttl: Duration::seconds(config.ttl_s as i64),
            evict_every_writes: config.evict_every_writes.max(1),
            writes: AtomicU64::new(0),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The live entry for a sender, or `None` when absent or stale.
    pub fn get(&self, sender: &str) -> Option<SessionEntry> {
        let sessions = self.sessions.read();
        let entry = sessions.get(sender)?;
        if Utc::now() - entry.updated_at >= self.ttl {
            return None;
        }
        Some(entry.clone())
    }

    /// The live entry, or a fresh default for a new/expired sender.
    pub fn snapshot_or_default(&self, sender: &str) -> SessionEntry {
        self.get(sender).unwrap_or_default()
    }

    /// Replace the sender's entry. Stamps `updated_at` so the sliding TTL
    /// restarts; a periodic sweep runs every `evict_every_writes` writes.
    pub fn put(&self, sender: &str, mut entry: SessionEntry) {
        entry.updated_at = Utc::now();
        {
            let mut sessions = self.sessions.write();
            sessions.insert(sender.to_string(), entry);
        }

        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if writes % self.evict_every_writes == 0 {
            self.purge_expired(Utc::now());
        }
    }

    /// Remove entries older than 2×TTL. Returns how many were dropped.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.ttl * 2;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, entry| entry.updated_at > cutoff);
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = sessions.len(), "session sweep");
        }
        dropped
    }

    /// Tracked entries, stale ones included (for `/status`).
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    #[cfg(test)]
    fn backdate(&self, sender: &str, age: Duration) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(sender) {
            entry.updated_at = Utc::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::config::SessionConfig;

    fn store() -> SessionStore {
        SessionStore::new(&SessionConfig {
            ttl_s: 300,
            graph_timeout_s: 50,
            evict_every_writes: 100,
        })
    }

    fn entry_with_intent(intent: &str) -> SessionEntry {
        SessionEntry {
            last_intent: Some(intent.into()),
            ..Default::default()
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = store();
        store.put("u1", entry_with_intent("greet"));
        let entry = store.get("u1").unwrap();
        assert_eq!(entry.last_intent.as_deref(), Some("greet"));
    }

    #[test]
    fn unknown_sender_is_absent() {
        assert!(store().get("nobody").is_none());
    }

    #[test]
    fn put_replaces_whole_entry() {
        let store = store();
        let mut first = entry_with_intent("greet");
        first.fallback_count = 2;
        store.put("u1", first);
        store.put("u1", entry_with_intent("ask_piani_list"));

        let entry = store.get("u1").unwrap();
        assert_eq!(entry.last_intent.as_deref(), Some("ask_piani_list"));
        assert_eq!(entry.fallback_count, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn updated_at_is_monotonic() {
        let store = store();
        store.put("u1", SessionEntry::default());
        let first = store.get("u1").unwrap().updated_at;
        store.put("u1", SessionEntry::default());
        let second = store.get("u1").unwrap().updated_at;
        assert!(second >= first);
    }

    #[test]
    fn entry_past_ttl_reads_as_absent_but_survives_in_map() {
        let store = store();
        store.put("u1", entry_with_intent("greet"));
        store.backdate("u1", Duration::seconds(400));

        assert!(store.get("u1").is_none());
        // Lazy GC: still present until a sweep.
        assert_eq!(store.len(), 1);
        let fresh = store.snapshot_or_default("u1");
        assert!(fresh.last_intent.is_none());
    }

    #[test]
    fn sweep_drops_entries_past_double_ttl() {
        let store = store();
        store.put("stale", SessionEntry::default());
        store.put("old_but_kept", SessionEntry::default());
        store.put("fresh", SessionEntry::default());
        store.backdate("stale", Duration::seconds(700));
        store.backdate("old_but_kept", Duration::seconds(400));

        let dropped = store.purge_expired(Utc::now());
        assert_eq!(dropped, 1);
        assert_eq!(store.len(), 2);
        assert!(store.get("fresh").is_some());
        // Between TTL and 2×TTL: unreadable but not yet collected.
        assert!(store.get("old_but_kept").is_none());
    }

    #[test]
    fn write_counter_triggers_sweep() {
        let store = SessionStore::new(&SessionConfig {
            ttl_s: 300,
            graph_timeout_s: 50,
            evict_every_writes: 3,
        });
        store.put("stale", SessionEntry::default());
        store.backdate("stale", Duration::seconds(700));

        // Two more writes reach the sweep threshold.
        store.put("a", SessionEntry::default());
        store.put("b", SessionEntry::default());
        assert_eq!(store.len(), 2);
        assert!(store.get("stale").is_none());
    }
}
