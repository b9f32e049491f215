//! TTL search cache for the gateway.
//!
//! Repeated queries within a fix cycle skip the embedding and index work.
//! Purely in-memory; each gateway process gets its own. Any write
//! invalidates everything, so staleness is bounded by the TTL only for
//! read-heavy periods.

use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(120);
const DEFAULT_CAPACITY: usize = 200;

struct Entry {
    value: Value,
    stored_at: Instant,
}

pub struct SearchCache {
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_CAPACITY)
    }
}

impl SearchCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Stable key from the normalised query plus sorted params.
    pub fn make_key(query: &str, params: &[(&str, &str)]) -> String {
        let mut parts = vec![query.trim().to_lowercase()];
        let mut sorted: Vec<_> = params.to_vec();
        sorted.sort_by_key(|(k, _)| *k);
        for (key, value) in sorted {
            parts.push(format!("{key}={value}"));
        }
        let digest = Sha256::digest(parts.join("|").as_bytes());
        hex::encode(&digest[..8])
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, value: Value) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            // Evict the oldest quartile.
            let mut by_age: Vec<_> = entries
                .iter()
                .map(|(k, e)| (k.clone(), e.stored_at))
                .collect();
            by_age.sort_by_key(|(_, stored_at)| *stored_at);
            let evict = (by_age.len() / 4).max(1);
            for (key, _) in by_age.into_iter().take(evict) {
                entries.remove(&key);
            }
        }
        entries.insert(
            key,
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop everything (called after every write method).
    pub fn invalidate(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_normalise_query_case_and_whitespace() {
        let a = SearchCache::make_key("  Connection Timeout ", &[("n", "5")]);
        let b = SearchCache::make_key("connection timeout", &[("n", "5")]);
        assert_eq!(a, b);
    }

    #[test]
    fn keys_are_param_order_independent() {
        let a = SearchCache::make_key("q", &[("n", "5"), ("mode", "semantic")]);
        let b = SearchCache::make_key("q", &[("mode", "semantic"), ("n", "5")]);
        assert_eq!(a, b);
        let c = SearchCache::make_key("q", &[("n", "7"), ("mode", "semantic")]);
        assert_ne!(a, c);
    }

    #[test]
    fn hit_then_invalidate() {
        let cache = SearchCache::default();
        let key = SearchCache::make_key("q", &[]);
        cache.put(key.clone(), json!({"hits": []}));
        assert!(cache.get(&key).is_some());
        cache.invalidate();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn expired_entries_read_as_misses() {
        let cache = SearchCache::new(Duration::from_millis(0), 10);
        let key = SearchCache::make_key("q", &[]);
        cache.put(key.clone(), json!(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn capacity_evicts_oldest_quartile() {
        let cache = SearchCache::new(Duration::from_secs(60), 8);
        for i in 0..8 {
            cache.put(format!("k{i}"), json!(i));
            std::thread::sleep(Duration::from_millis(2));
        }
        cache.put("k8".to_string(), json!(8));
        assert!(cache.len() <= 8);
        assert!(cache.get("k8").is_some());
        assert!(cache.get("k0").is_none());
    }
}
