use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::ModelError;

/// Round-robin rotation over a set of API keys.
///
/// Shared by cloning; all clones rotate through the same counter, so a
/// session-wide rotator spreads quota across every client that holds
/// it. There is no global state: each session constructs and injects
/// its own rotator.
#[derive(Clone)]
pub struct KeyRotator {
    keys: Arc<Vec<String>>,
    next: Arc<AtomicUsize>,
}

impl KeyRotator {
    /// Creates a rotator over the given keys.
    pub fn new(keys: Vec<String>) -> Result<Self, ModelError> {
        if keys.is_empty() {
            return Err(ModelError::MissingApiKey);
        }
        Ok(Self {
            keys: Arc::new(keys),
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Creates a rotator from FILINGLENS_API_KEYS (comma-separated) or
    /// GEMINI_API_KEY.
    pub fn from_env() -> Result<Self, ModelError> {
        if let Ok(keys) = std::env::var("FILINGLENS_API_KEYS") {
            let keys: Vec<String> = keys
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
            if !keys.is_empty() {
                return Self::new(keys);
            }
        }
        let key = std::env::var("GEMINI_API_KEY").map_err(|_| ModelError::MissingApiKey)?;
        Self::new(vec![key])
    }

    /// Returns the next key in rotation.
    pub fn next_key(&self) -> String {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        self.keys[idx].clone()
    }

    /// Number of keys in rotation.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl std::fmt::Debug for KeyRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRotator")
            .field("keys", &self.keys.len())
            .finish()
    }
}
