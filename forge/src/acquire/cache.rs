//! Response caching.
//!
//! Generator responses are cached under a fingerprint of the request and the
//! attempt number, so re-running a request replays the same transcript
//! instead of burning tokens. `NoCache` disables the layer; `MemoryCache`
//! covers tests and short-lived processes.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::plan::PlanRequest;

/// Stable identity of one generator call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes everything that shapes the prompt: the request identity, the
    /// table inventory, and the attempt index (retries carry different
    /// correction hints, so they must not collide).
    pub fn of(req: &PlanRequest, attempt: usize, purpose: &str) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(purpose.as_bytes());
        hasher.update([0]);
        hasher.update(req.name.as_bytes());
        hasher.update([0]);
        hasher.update(req.element.as_bytes());
        hasher.update([0]);
        hasher.update(format!("{:?}", req.mode).as_bytes());
        for slot in req.registry.slots() {
            hasher.update(slot.as_str().as_bytes());
            for (name, _) in req.registry.tables(slot) {
                hasher.update([0]);
                hasher.update(name.as_bytes());
            }
        }
        for hint in &req.hints {
            hasher.update([0]);
            hasher.update(hint.as_bytes());
        }
        hasher.update(attempt.to_le_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Fingerprint(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn fetch(&self, key: &Fingerprint) -> Option<String>;
    async fn store(&self, key: &Fingerprint, value: &str);
}

/// Pass-through cache.
pub struct NoCache;

#[async_trait]
impl ResponseCache for NoCache {
    async fn fetch(&self, _key: &Fingerprint) -> Option<String> {
        None
    }

    async fn store(&self, _key: &Fingerprint, _value: &str) {}
}

/// In-process cache keyed by fingerprint.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn fetch(&self, key: &Fingerprint) -> Option<String> {
        self.entries.lock().await.get(key.as_str()).cloned()
    }

    async fn store(&self, key: &Fingerprint, value: &str) {
        self.entries
            .lock()
            .await
            .insert(key.as_str().to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Slot, TableRegistry, TableSample};

    fn request(name: &str) -> PlanRequest {
        let mut registry = TableRegistry::new();
        registry.insert(Slot::Skill, "Skill Damage", TableSample::Scalar(150.0));
        PlanRequest::new(name, "pyro", registry)
    }

    #[test]
    fn fingerprints_separate_attempts_and_requests() {
        let req = request("A");
        let a0 = Fingerprint::of(&req, 0, "plan");
        let a1 = Fingerprint::of(&req, 1, "plan");
        let b0 = Fingerprint::of(&request("B"), 0, "plan");
        assert_ne!(a0, a1);
        assert_ne!(a0, b0);
        assert_eq!(a0, Fingerprint::of(&req, 0, "plan"));
    }

    #[tokio::test]
    async fn memory_cache_round_trips() {
        let cache = MemoryCache::new();
        let key = Fingerprint::of(&request("A"), 0, "plan");
        assert_eq!(cache.fetch(&key).await, None);
        cache.store(&key, "payload").await;
        assert_eq!(cache.fetch(&key).await.as_deref(), Some("payload"));
    }
}
