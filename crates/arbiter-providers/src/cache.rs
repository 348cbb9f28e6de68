//! Response cache consulted before target invocation.

use std::collections::HashMap;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::provider_trait::InvokeResponse;

/// Key → response store consulted before invocation.
///
/// Concurrent get/put on distinct keys must not block each other. Two
/// tasks filling the same missing key redundantly is acceptable; the last
/// write wins.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<InvokeResponse>;
    fn put(&self, key: &str, response: InvokeResponse);
}

/// In-memory response cache.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, InvokeResponse>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<InvokeResponse> {
        self.entries.read().get(key).cloned()
    }

    fn put(&self, key: &str, response: InvokeResponse) {
        self.entries.write().insert(key.to_string(), response);
    }
}

/// Cache key for one invocation: provider id, target name, case id, and
/// the fully rendered prompt. Fields are length-prefixed before hashing so
/// adjacent fields cannot run together.
pub fn response_cache_key(provider_id: &str, target: &str, eval_id: &str, prompt: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [provider_id, target, eval_id, prompt] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_stable() {
        let a = response_cache_key("cmd", "local", "case-1", "What is 2+2?");
        let b = response_cache_key("cmd", "local", "case-1", "What is 2+2?");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_fields_do_not_run_together() {
        let a = response_cache_key("ab", "c", "x", "y");
        let b = response_cache_key("a", "bc", "x", "y");
        assert_ne!(a, b);
    }

    #[test]
    fn test_last_write_wins() {
        let cache = MemoryCache::new();
        cache.put("k", InvokeResponse::text("first"));
        cache.put("k", InvokeResponse::text("second"));
        assert_eq!(cache.get("k").unwrap().text, "second");
        assert_eq!(cache.len(), 1);
    }
}
