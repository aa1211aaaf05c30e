//! Inbound-event dedup and per-owner serialization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// TTL-purged set of recently processed external-event keys.
///
/// Prevents reprocessing duplicate inbound triggers (gateway redeliveries,
/// webhook retries). Expired keys are purged opportunistically on insert.
pub struct SeenKeys {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl SeenKeys {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a key. Returns `false` when the key was already seen inside
    /// the TTL window — the caller should drop the event.
    pub async fn insert(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), now);
        true
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Per-owner mutual exclusion.
///
/// Serializes concurrent processing of requests from the same owner
/// without blocking other owners. Lock objects are created on demand and
/// kept for the process lifetime; the owner population is bounded.
#[derive(Default)]
pub struct OwnerGate {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one owner, waiting behind any in-flight
    /// request from the same owner.
    pub async fn acquire(&self, owner_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(owner_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        lock.lock_owned().await
    }
}
