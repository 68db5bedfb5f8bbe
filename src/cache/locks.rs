//! Per-key lock registry.
//!
//! Serializes get-or-create production for one effective key without
//! touching any other key. Each key gets a lazily created slot holding a
//! `tokio::sync::Mutex`, so blocking threads and async tasks contend on the
//! very same primitive.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use super::error::CacheError;

/// Outcome of the last production run for a key.
///
/// Only meaningful to callers that were already waiting when that run
/// finished.
#[derive(Debug, Default)]
pub(crate) struct Episode {
    failure: Option<CacheError>,
}

#[derive(Debug, Default)]
struct KeySlot {
    state: Arc<Mutex<Episode>>,
    /// Number of finished production runs.
    finished: AtomicU64,
}

/// Registry handing out one lock per effective key.
#[derive(Debug)]
pub struct KeyLockRegistry {
    slots: DashMap<String, Arc<KeySlot>>,
    evict_idle: bool,
}

impl KeyLockRegistry {
    /// Create a registry. With `evict_idle` set, a key's slot is dropped as
    /// soon as nobody holds or waits on it.
    pub fn new(evict_idle: bool) -> Self {
        Self {
            slots: DashMap::new(),
            evict_idle,
        }
    }

    fn slot(&self, key: &str) -> SlotRef<'_> {
        let slot = match self.slots.get(key) {
            Some(existing) => Arc::clone(existing.value()),
            None => {
                let entry = self.slots.entry(key.to_string()).or_insert_with(|| {
                    trace!("Creating key lock for {}", key);
                    Arc::new(KeySlot::default())
                });
                Arc::clone(entry.value())
            }
        };

        SlotRef {
            registry: self,
            key: key.to_string(),
            slot: Some(slot),
        }
    }

    /// Block the current thread until the lock for `key` is free.
    ///
    /// Must not be called from inside an async runtime. The wait parks the
    /// calling thread with `block_on`, so on a current-thread runtime (or a
    /// worker whose task holds the same key through
    /// [`acquire_async`](Self::acquire_async)) the holder never gets polled
    /// again and the wait deadlocks. Async code uses `acquire_async`;
    /// blocking callers inside a runtime go through `spawn_blocking`.
    pub fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let slot = self.slot(key);
        let observed = slot.finished();
        let guard = futures::executor::block_on(slot.state().lock_owned());

        KeyGuard {
            guard,
            slot,
            observed,
        }
    }

    /// Wait for the lock for `key` without blocking the executor.
    pub async fn acquire_async(&self, key: &str) -> KeyGuard<'_> {
        let slot = self.slot(key);
        let observed = slot.finished();
        let guard = slot.state().lock_owned().await;

        KeyGuard {
            guard,
            slot,
            observed,
        }
    }

    /// Number of keys that currently have a lock slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn release(&self, key: &str) {
        if !self.evict_idle {
            return;
        }
        // The map's own reference is the only one left once every guard and
        // waiter is gone. The shard lock held by remove_if keeps the count
        // stable against concurrent lookups.
        if self
            .slots
            .remove_if(key, |_, slot| Arc::strong_count(slot) == 1)
            .is_some()
        {
            trace!("Evicted idle key lock for {}", key);
        }
    }
}

impl Default for KeyLockRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

/// A counted reference to a key slot; returns the slot to the registry on drop.
struct SlotRef<'a> {
    registry: &'a KeyLockRegistry,
    key: String,
    slot: Option<Arc<KeySlot>>,
}

impl SlotRef<'_> {
    fn inner(&self) -> &KeySlot {
        self.slot.as_deref().expect("slot is present until drop")
    }

    fn state(&self) -> Arc<Mutex<Episode>> {
        Arc::clone(&self.inner().state)
    }

    fn finished(&self) -> u64 {
        self.inner().finished.load(Ordering::Acquire)
    }
}

impl Drop for SlotRef<'_> {
    fn drop(&mut self) {
        drop(self.slot.take());
        self.registry.release(&self.key);
    }
}

/// Exclusive hold on one key's lock, released on drop.
pub struct KeyGuard<'a> {
    // Fields drop in declaration order: the mutex guard must be released
    // before the slot reference is handed back to the registry.
    guard: OwnedMutexGuard<Episode>,
    slot: SlotRef<'a>,
    observed: u64,
}

impl KeyGuard<'_> {
    /// Failure of a production run that finished while this guard was
    /// being waited for, if any.
    pub(crate) fn shared_failure(&self) -> Option<CacheError> {
        if self.slot.finished() == self.observed {
            return None;
        }
        self.guard.failure.clone()
    }

    /// Record the outcome of a production run performed under this guard.
    pub(crate) fn finish(&mut self, failure: Option<CacheError>) {
        self.guard.failure = failure;
        self.slot.inner().finished.fetch_add(1, Ordering::Release);
        self.observed = self.slot.finished();
    }
}

impl std::fmt::Debug for KeyGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard")
            .field("key", &self.slot.key)
            .field("observed", &self.observed)
            .finish()
    }
}
