//! Per-container mutual exclusion.
//!
//! Every read-modify-write of a container row, and the backend call in
//! between, runs while holding that container's lock. Entries are created on
//! first use and pruned once nobody holds or waits for them, so the map only
//! ever contains containers with an operation in flight.
//!
//! # Lock ordering
//!
//! Only one key is ever held at a time. The registry mutex (parking_lot) is
//! held just long to clone or prune an entry and never across an `.await`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    registry: Arc<Mutex<Registry>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let entry = self.entry(key);
        let guard = entry.lock_owned().await;
        KeyGuard {
            key: key.to_string(),
            registry: Arc::clone(&self.registry),
            guard: Some(guard),
        }
    }

    /// Take `key` only if nobody holds it right now.
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        let entry = self.entry(key);
        match entry.try_lock_owned() {
            Ok(guard) => Some(KeyGuard {
                key: key.to_string(),
                registry: Arc::clone(&self.registry),
                guard: Some(guard),
            }),
            Err(_) => {
                prune(&self.registry, key);
                None
            }
        }
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.registry
            .lock()
            .get(key)
            .map(|m| m.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.registry
                .lock()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }
}

/// Drop the entry for `key` if the registry holds the only reference.
fn prune(registry: &Mutex<Registry>, key: &str) {
    let mut map = registry.lock();
    if map.get(key).map(|m| Arc::strong_count(m) == 1).unwrap_or(false) {
        map.remove(key);
    }
}

/// Exclusive access to one container. Released on drop.
pub struct KeyGuard {
    key: String,
    registry: Arc<Mutex<Registry>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the guard's Arc no longer counts.
        self.guard.take();
        prune(&self.registry, &self.key);
    }
}
