use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A TTL cache with deterministic string keys.
///
/// Serializable so it can ride inside the persisted session state and
/// survive restarts between pipeline steps. Expired entries are removed
/// on lookup; there is no negative caching (misses and failures are
/// never stored).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlCache<V> {
    ttl_secs: u64,
    entries: HashMap<String, Entry<V>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry<V> {
    stored_at: DateTime<Utc>,
    value: V,
}

impl<V> TtlCache<V> {
    /// Creates an empty cache whose entries live for `ttl_secs`.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            entries: HashMap::new(),
        }
    }

    /// Looks up a fresh entry, removing it if expired.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let fresh = match self.entries.get(key) {
            Some(entry) => {
                let age = Utc::now().signed_duration_since(entry.stored_at);
                age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.ttl_secs
            }
            None => return None,
        };

        if !fresh {
            self.entries.remove(key);
            return None;
        }

        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Stores a value under `key`, replacing any previous entry.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            Entry {
                stored_at: Utc::now(),
                value,
            },
        );
    }

    /// Drops all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds a deterministic cache key from an ordered list of parts.
///
/// The same parts in the same order always hash to the same key, and
/// the key is stable across processes.
pub fn cache_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
