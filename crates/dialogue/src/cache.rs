//! Classification cache.
//!
//! Keyed by a hash of the normalized message plus the metadata fingerprint
//! that can change the classification (pending-slot hints, detail-context
//! presence). TTL-bounded and capacity-bounded: reads take the shared
//! lock and bump a per-entry recency counter; eviction runs on writes,
//! expired entries first, then least-recently-used.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use vg_domain::config::ClassificationCacheConfig;
use vg_domain::dialogue::Classification;

struct CachedClassification {
    classification: Classification,
    expires_at: Instant,
    last_used: AtomicU64,
}

pub struct ClassificationCache {
    ttl: Duration,
    capacity: usize,
    clock: AtomicU64,
    entries: RwLock<HashMap<u64, CachedClassification>>,
}

impl ClassificationCache {
    pub fn new(config: &ClassificationCacheConfig) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_s),
            capacity: config.capacity.max(1),
            clock: AtomicU64::new(0),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Stable cache key for a (message, metadata-fingerprint) pair.
    pub fn key(message: &str, fingerprint: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        normalize(message).hash(&mut hasher);
        fingerprint.hash(&mut hasher);
        hasher.finish()
    }

    /// Cached classification, if present and unexpired.
    pub fn get(&self, key: u64) -> Option<Classification> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let entries = self.entries.read();
        entries.get(&key).and_then(|entry| {
            if Instant::now() < entry.expires_at {
                entry.last_used.store(tick, Ordering::Relaxed);
                Some(entry.classification.clone())
            } else {
                None
            }
        })
    }

    /// Store a classification. Best-effort: eviction may drop the coldest
    /// entry to stay under capacity.
    pub fn put(&self, key: u64, classification: Classification) {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            let now = Instant::now();
            entries.retain(|_, e| e.expires_at > now);

            // Still full: drop the least-recently-used entry.
            while entries.len() >= self.capacity {
                let coldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used.load(Ordering::Relaxed))
                    .map(|(k, _)| *k);
                match coldest {
                    Some(k) => {
                        entries.remove(&k);
                    }
                    None => break,
                }
            }
        }

        entries.insert(
            key,
            CachedClassification {
                classification,
                expires_at: Instant::now() + self.ttl,
                last_used: AtomicU64::new(tick),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Lowercase and collapse whitespace so trivial retyping still hits.
fn normalize(message: &str) -> String {
    message
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::dialogue::Candidate;

    fn classification(intent: &str) -> Classification {
        Classification {
            candidates: vec![Candidate::new(intent, 0.8)],
            ..Default::default()
        }
    }

    fn cache(capacity: usize) -> ClassificationCache {
        ClassificationCache::new(&ClassificationCacheConfig {
            ttl_s: 3600,
            capacity,
        })
    }

    #[test]
    fn stores_and_retrieves_verbatim() {
        let c = cache(8);
        let key = ClassificationCache::key("di cosa tratta il piano A1?", "");
        c.put(key, classification("ask_piano_description"));

        let hit = c.get(key).unwrap();
        assert_eq!(hit.top_intent(), "ask_piano_description");
    }

    #[test]
    fn key_ignores_case_and_spacing() {
        let a = ClassificationCache::key("Piani  in ritardo", "f1");
        let b = ClassificationCache::key("piani in ritardo", "f1");
        assert_eq!(a, b);
    }

    #[test]
    fn key_depends_on_fingerprint() {
        let a = ClassificationCache::key("sì", "detail=true");
        let b = ClassificationCache::key("sì", "");
        assert_ne!(a, b);
    }

    #[test]
    fn expired_entry_misses() {
        let c = ClassificationCache::new(&ClassificationCacheConfig {
            ttl_s: 0,
            capacity: 8,
        });
        let key = ClassificationCache::key("ciao", "");
        c.put(key, classification("greet"));
        assert!(c.get(key).is_none());
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let c = cache(2);
        let k1 = ClassificationCache::key("uno", "");
        let k2 = ClassificationCache::key("due", "");
        let k3 = ClassificationCache::key("tre", "");

        c.put(k1, classification("greet"));
        c.put(k2, classification("goodbye"));
        // Touch k1 so k2 becomes the coldest.
        let _ = c.get(k1);
        c.put(k3, classification("ask_help"));

        assert!(c.get(k1).is_some());
        assert!(c.get(k2).is_none());
        assert!(c.get(k3).is_some());
        assert_eq!(c.len(), 2);
    }
}
