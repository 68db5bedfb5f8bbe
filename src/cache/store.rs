//! Scoped TTL cache store.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::entry::Entry;
use super::error::{CacheError, Result};
use super::key::{self, Partition};
use super::locks::{KeyGuard, KeyLockRegistry};
use super::scope::ScopeResolver;
use super::StoreConfig;

/// Internal shared state for the store.
struct StoreInner<V> {
    /// Entry map; guarded for short critical sections only.
    entries: Mutex<HashMap<String, Entry<V>>>,
    key_locks: KeyLockRegistry,
    scope: Arc<dyn ScopeResolver>,
}

/// Thread-safe in-memory cache with per-entry expiry.
///
/// Keys are namespaced by the scope prefix from a [`ScopeResolver`] and by
/// [`Partition`]. Expired entries are purged from the whole map on every
/// read or write, so an expired value is never observed.
///
/// [`get_or_create`](Self::get_or_create) and its async twin run the factory
/// at most once per key among concurrent callers, holding only that key's
/// lock while it runs. Cloning is cheap and shares the same store.
///
/// ## Example
///
/// ```rust
/// use chrono::{Duration, Utc};
/// use scopecache::cache::{CacheStore, Partition, StaticScope};
///
/// let store = CacheStore::new(StaticScope::new("/"));
/// store
///     .upsert("greeting", "hello", Utc::now() + Duration::seconds(5), Partition::Visible)
///     .unwrap();
/// assert_eq!(store.get("greeting", Partition::Visible).unwrap(), Some("hello"));
/// ```
pub struct CacheStore<V> {
    inner: Arc<StoreInner<V>>,
}

// Manual Clone implementation that doesn't require V: Clone
impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn purge_expired<V>(entries: &mut HashMap<String, Entry<V>>, now: DateTime<Utc>) {
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired_at(now));

    let purged = before - entries.len();
    if purged > 0 {
        trace!("Purged {} expired cache entries", purged);
    }
}

fn check_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    if expires_at < now {
        return Err(CacheError::InvalidExpiry { expires_at, now });
    }
    Ok(())
}

impl<V: Clone> CacheStore<V> {
    /// Create a store bound to `scope` with default config.
    pub fn new(scope: impl ScopeResolver + 'static) -> Self {
        Self::with_config(scope, StoreConfig::default())
    }

    /// Create a store bound to `scope` with custom config.
    pub fn with_config(scope: impl ScopeResolver + 'static, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: Mutex::new(HashMap::new()),
                key_locks: KeyLockRegistry::new(config.evict_idle_key_locks),
                scope: Arc::new(scope),
            }),
        }
    }

    fn effective_key(&self, key: &str, partition: Partition) -> Result<String> {
        let scope = self.inner.scope.scope_prefix();
        key::effective_key(key, &scope, partition)
    }

    /// Insert or overwrite `key`.
    ///
    /// Fails with [`CacheError::InvalidExpiry`] if `expires_at` is already
    /// past; the store is left untouched in that case.
    pub fn upsert(
        &self,
        key: &str,
        value: V,
        expires_at: DateTime<Utc>,
        partition: Partition,
    ) -> Result<()> {
        let full = self.effective_key(key, partition)?;
        let now = Utc::now();
        check_expiry(expires_at, now)?;

        let mut entries = self.inner.entries.lock();
        purge_expired(&mut entries, now);
        entries.insert(full, Entry::new(value, expires_at));
        Ok(())
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn remove(&self, key: &str, partition: Partition) -> Result<()> {
        let full = self.effective_key(key, partition)?;
        self.inner.entries.lock().remove(&full);
        Ok(())
    }

    /// Get the value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str, partition: Partition) -> Result<Option<V>> {
        let full = self.effective_key(key, partition)?;
        Ok(self.lookup(&full))
    }

    /// Get the value for `key` and, in the same critical section, push its
    /// expiry out to whatever `renew` returns for it.
    ///
    /// A renewal that is already in the past, or earlier than the current
    /// expiry, leaves the entry as it is. An absent key is never written.
    pub fn get_renewing<F>(&self, key: &str, partition: Partition, renew: F) -> Result<Option<V>>
    where
        F: FnOnce(&V) -> Option<DateTime<Utc>>,
    {
        let full = self.effective_key(key, partition)?;
        let now = Utc::now();

        let mut entries = self.inner.entries.lock();
        purge_expired(&mut entries, now);
        let Some(entry) = entries.get_mut(&full) else {
            return Ok(None);
        };

        if let Some(at) = renew(entry.value()).filter(|at| *at >= now) {
            trace!("Renewing {} until {}", full, at);
            entry.extend_to(at);
        }
        Ok(Some(entry.value().clone()))
    }

    fn lookup(&self, full: &str) -> Option<V> {
        let mut entries = self.inner.entries.lock();
        purge_expired(&mut entries, Utc::now());
        entries.get(full).map(|entry| entry.value().clone())
    }

    /// All unexpired entries whose key starts with `filter`, sorted by key.
    ///
    /// Returned keys have scope and partition marker stripped. `None` or an
    /// empty filter lists the whole partition.
    pub fn items(&self, filter: Option<&str>, partition: Partition) -> Result<Vec<(String, V)>> {
        let scope = self.inner.scope.scope_prefix();
        let prefix = key::effective_filter(filter, &scope, partition)?;

        let mut items: Vec<(String, V)> = {
            let mut entries = self.inner.entries.lock();
            purge_expired(&mut entries, Utc::now());
            entries
                .iter()
                .filter(|(full, _)| full.starts_with(&prefix))
                .filter_map(|(full, entry)| {
                    key::strip(full, &scope, partition)
                        .map(|stripped| (stripped.to_string(), entry.value().clone()))
                })
                .collect()
        };

        items.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(items)
    }

    /// Number of entries [`items`](Self::items) would return.
    pub fn count(&self, filter: Option<&str>, partition: Partition) -> Result<usize> {
        Ok(self.items(filter, partition)?.len())
    }

    /// Remove every entry whose key starts with `filter`.
    ///
    /// `None` or an empty filter clears the whole partition. Returns the
    /// number of live entries removed; matching entries that had already
    /// expired are dropped too but not counted.
    pub fn clear(&self, filter: Option<&str>, partition: Partition) -> Result<usize> {
        let scope = self.inner.scope.scope_prefix();
        let prefix = key::effective_filter(filter, &scope, partition)?;
        let now = Utc::now();

        let mut entries = self.inner.entries.lock();
        let mut removed = 0;
        entries.retain(|full, entry| {
            if !full.starts_with(&prefix) {
                return true;
            }
            if !entry.is_expired_at(now) {
                removed += 1;
            }
            false
        });

        debug!("Cleared {} cache entries matching {}", removed, prefix);
        Ok(removed)
    }

    /// Get `key`, producing it with `factory` on a miss.
    ///
    /// Among concurrent callers of the same key only one runs its factory;
    /// the rest wait and receive the stored value. Other keys are never
    /// blocked while a factory runs. If the factory fails, the failure goes
    /// to its caller and to every caller already waiting on the key, and
    /// the key stays unpopulated.
    pub fn get_or_create<F, E>(&self, key: &str, partition: Partition, factory: F) -> Result<V>
    where
        F: FnOnce() -> std::result::Result<(V, DateTime<Utc>), E>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let full = self.effective_key(key, partition)?;
        let mut guard = self.inner.key_locks.acquire(&full);

        if let Some(value) = self.check_guarded(&full, &guard)? {
            return Ok(value);
        }

        debug!("Cache miss for {}, running factory", full);
        let produced = factory().map_err(CacheError::factory);
        self.finish(&full, &mut guard, produced)
    }

    /// Async form of [`get_or_create`](Self::get_or_create).
    ///
    /// Waiting for the key suspends the task instead of blocking the thread.
    /// Async and blocking callers of the same key exclude each other.
    pub async fn get_or_create_async<F, Fut, E>(
        &self,
        key: &str,
        partition: Partition,
        factory: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(V, DateTime<Utc>), E>>,
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        let full = self.effective_key(key, partition)?;
        let mut guard = self.inner.key_locks.acquire_async(&full).await;

        if let Some(value) = self.check_guarded(&full, &guard)? {
            return Ok(value);
        }

        debug!("Cache miss for {}, running async factory", full);
        let produced = factory().await.map_err(CacheError::factory);
        self.finish(&full, &mut guard, produced)
    }

    /// Hit check under the key guard: a stored value wins, then any failure
    /// from a run that finished while we waited.
    fn check_guarded(&self, full: &str, guard: &KeyGuard<'_>) -> Result<Option<V>> {
        if let Some(value) = self.lookup(full) {
            return Ok(Some(value));
        }
        match guard.shared_failure() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn finish(
        &self,
        full: &str,
        guard: &mut KeyGuard<'_>,
        produced: Result<(V, DateTime<Utc>)>,
    ) -> Result<V> {
        let outcome = self.commit(full, produced);
        // Only the factory's own failure goes to waiters. A rejected expiry
        // leaves the key empty and the next waiter runs its own factory.
        let shared = match &outcome {
            Err(e @ CacheError::FactoryFailure(_)) => Some(e.clone()),
            _ => None,
        };
        guard.finish(shared);
        outcome
    }

    fn commit(&self, full: &str, produced: Result<(V, DateTime<Utc>)>) -> Result<V> {
        let (value, expires_at) = produced?;
        check_expiry(expires_at, Utc::now())?;

        self.inner
            .entries
            .lock()
            .insert(full.to_string(), Entry::new(value.clone(), expires_at));
        Ok(value)
    }

    /// Number of keys currently holding a get-or-create lock slot.
    pub fn key_lock_count(&self) -> usize {
        self.inner.key_locks.len()
    }
}

impl<V> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entry_count", &self.inner.entries.lock().len())
            .field("key_locks", &self.inner.key_locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::StaticScope;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    const V: Partition = Partition::Visible;
    const H: Partition = Partition::Hidden;

    fn store() -> CacheStore<String> {
        CacheStore::new(StaticScope::new("/"))
    }

    fn in_secs(secs: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::seconds(secs)
    }

    fn in_millis(ms: i64) -> DateTime<Utc> {
        Utc::now() + ChronoDuration::milliseconds(ms)
    }

    #[test]
    fn test_never_written_is_absent() {
        let store = store();
        assert_eq!(store.get("missing", V).unwrap(), None);
        assert_eq!(store.get("missing", H).unwrap(), None);
    }

    #[test]
    fn test_upsert_get() {
        let store = store();
        store.upsert("foo", "howdy world".into(), in_secs(5), V).unwrap();
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("howdy world"));
    }

    #[test]
    fn test_entry_expires() {
        let store = store();
        store.upsert("foo", "howdy world".into(), in_millis(100), V).unwrap();
        assert!(store.get("foo", V).unwrap().is_some());

        thread::sleep(Duration::from_millis(150));

        assert_eq!(store.get("foo", V).unwrap(), None);
        assert!(store.items(None, V).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = store();
        store.upsert("foo", "A".into(), in_secs(5), V).unwrap();
        store.upsert("foo", "B".into(), in_secs(5), V).unwrap();
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("B"));
        assert_eq!(store.count(None, V).unwrap(), 1);
    }

    #[test]
    fn test_past_expiry_rejected() {
        let store = store();
        let result = store.upsert("foo", "A".into(), in_secs(-1), V);

        assert!(matches!(result, Err(CacheError::InvalidExpiry { .. })));
        assert_eq!(store.get("foo", V).unwrap(), None);
    }

    #[test]
    fn test_past_expiry_keeps_previous_value() {
        let store = store();
        store.upsert("foo", "A".into(), in_secs(5), V).unwrap();
        assert!(store.upsert("foo", "B".into(), in_secs(-1), V).is_err());
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn test_remove() {
        let store = store();
        store.upsert("foo", "A".into(), in_secs(5), V).unwrap();
        store.remove("foo", V).unwrap();
        assert_eq!(store.get("foo", V).unwrap(), None);

        // Absent key is a no-op.
        store.remove("foo", V).unwrap();
    }

    #[test]
    fn test_invalid_keys() {
        let store = store();
        assert!(matches!(store.get("", V), Err(CacheError::InvalidKey { .. })));
        assert!(matches!(
            store.upsert(".x", "A".into(), in_secs(5), V),
            Err(CacheError::InvalidKey { .. })
        ));
        assert!(store.remove("+x", V).is_err());
        assert!(store.items(Some(".x"), V).is_err());
        assert!(store.clear(Some("+"), V).is_err());
        assert!(
            store
                .get_or_create("", V, || Ok::<_, CacheError>(("A".to_string(), in_secs(5))))
                .is_err()
        );
    }

    #[test]
    fn test_partitions_do_not_collide() {
        let store = store();
        store.upsert("foo", "visible".into(), in_secs(5), V).unwrap();
        store.upsert("foo", "hidden".into(), in_secs(5), H).unwrap();

        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("visible"));
        assert_eq!(store.get("foo", H).unwrap().as_deref(), Some("hidden"));

        let visible = store.items(None, V).unwrap();
        assert_eq!(visible, vec![("foo".to_string(), "visible".to_string())]);
    }

    #[test]
    fn test_items_sorted_and_filtered() {
        let store = store();
        for key in ["user.b", "user.a", "order.1", "user.c"] {
            store.upsert(key, key.to_uppercase(), in_secs(5), V).unwrap();
        }
        store.upsert("user.z", "gone".into(), in_millis(50), V).unwrap();
        store.upsert("user.hidden", "H".into(), in_secs(5), H).unwrap();
        thread::sleep(Duration::from_millis(80));

        let keys: Vec<String> = store
            .items(Some("user."), V)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["user.a", "user.b", "user.c"]);
        assert_eq!(store.count(None, V).unwrap(), 4);
        assert_eq!(store.count(Some("order."), V).unwrap(), 1);
        assert_eq!(store.count(None, H).unwrap(), 1);
    }

    #[test]
    fn test_clear_with_filter() {
        let store = store();
        for key in ["a1", "a2", "b1"] {
            store.upsert(key, key.into(), in_secs(5), V).unwrap();
        }

        assert_eq!(store.clear(Some("a"), V).unwrap(), 2);
        let keys: Vec<String> = store.items(None, V).unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b1"]);
    }

    #[test]
    fn test_clear_whole_partition_only() {
        let store = store();
        store.upsert("a", "A".into(), in_secs(5), V).unwrap();
        store.upsert("b", "B".into(), in_secs(5), V).unwrap();
        store.upsert("internal", "I".into(), in_secs(5), H).unwrap();

        store.clear(None, V).unwrap();

        assert_eq!(store.count(None, V).unwrap(), 0);
        assert_eq!(store.get("internal", H).unwrap().as_deref(), Some("I"));
    }

    #[test]
    fn test_clear_counts_only_live_entries() {
        let store = store();
        store.upsert("short", "S".into(), in_millis(50), V).unwrap();
        store.upsert("long", "L".into(), in_secs(5), V).unwrap();
        thread::sleep(Duration::from_millis(80));

        assert_eq!(store.clear(None, V).unwrap(), 1);
        assert_eq!(store.count(None, V).unwrap(), 0);
    }

    #[test]
    fn test_get_renewing_extends_expiry() {
        let store = store();
        store.upsert("foo", "A".into(), in_millis(100), V).unwrap();

        let value = store.get_renewing("foo", V, |_| Some(in_secs(5))).unwrap();
        assert_eq!(value.as_deref(), Some("A"));

        thread::sleep(Duration::from_millis(150));
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn test_get_renewing_never_shortens_or_resurrects() {
        let store = store();
        store.upsert("foo", "A".into(), in_secs(5), V).unwrap();

        store.get_renewing("foo", V, |_| Some(in_millis(20))).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("A"));

        store.remove("foo", V).unwrap();
        let renewed = store.get_renewing("foo", V, |_| Some(in_secs(5))).unwrap();
        assert_eq!(renewed, None);
        assert_eq!(store.count(None, V).unwrap(), 0);
    }

    #[test]
    fn test_scope_isolation() {
        let current = Arc::new(Mutex::new("/tenant-a/".to_string()));
        let resolver = {
            let current = Arc::clone(&current);
            move || current.lock().clone()
        };
        let store: CacheStore<String> = CacheStore::new(resolver);

        store.upsert("foo", "A".into(), in_secs(5), V).unwrap();

        *current.lock() = "/tenant-b/".to_string();
        assert_eq!(store.get("foo", V).unwrap(), None);
        assert!(store.items(None, V).unwrap().is_empty());
        store.clear(None, V).unwrap();

        *current.lock() = "/tenant-a/".to_string();
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("A"));
    }

    #[test]
    fn test_get_or_create_hit_skips_factory() {
        let store = store();
        store.upsert("foo", "cached".into(), in_secs(5), V).unwrap();

        let value = store
            .get_or_create("foo", V, || -> std::result::Result<_, CacheError> {
                panic!("factory must not run on a hit")
            })
            .unwrap();
        assert_eq!(value, "cached");
    }

    #[test]
    fn test_get_or_create_populates() {
        let store = store();
        let value = store
            .get_or_create("foo", V, || Ok::<_, CacheError>(("made".to_string(), in_secs(5))))
            .unwrap();

        assert_eq!(value, "made");
        assert_eq!(store.get("foo", V).unwrap().as_deref(), Some("made"));
        assert_eq!(store.key_lock_count(), 0);
    }

    #[test]
    fn test_concurrent_get_or_create_runs_once() {
        let store = store();
        let calls = AtomicUsize::new(0);
        let start = Instant::now();

        let results: Vec<String> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    s.spawn(|| {
                        store
                            .get_or_create("x", V, || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                thread::sleep(Duration::from_millis(200));
                                Ok::<_, CacheError>(("X".to_string(), in_secs(5)))
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|v| v == "X"));
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[test]
    fn test_unrelated_keys_produce_in_parallel() {
        let store = store();
        let start = Instant::now();

        thread::scope(|s| {
            for key in ["a", "b"] {
                let store = &store;
                s.spawn(move || {
                    store
                        .get_or_create(key, V, || {
                            thread::sleep(Duration::from_millis(200));
                            Ok::<_, CacheError>((key.to_string(), in_secs(5)))
                        })
                        .unwrap()
                });
            }
        });

        assert!(start.elapsed() < Duration::from_millis(350));
        assert_eq!(store.count(None, V).unwrap(), 2);
    }

    #[test]
    fn test_factory_failure_leaves_key_unpopulated() {
        let store = store();
        let result = store.get_or_create("x", V, || Err::<(String, DateTime<Utc>), _>("boom"));
        assert!(matches!(result, Err(CacheError::FactoryFailure(_))));
        assert_eq!(store.get("x", V).unwrap(), None);

        let calls = AtomicUsize::new(0);
        let value = store
            .get_or_create("x", V, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(("second".to_string(), in_secs(5)))
            })
            .unwrap();
        assert_eq!(value, "second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_failure_shared_with_waiters() {
        let store = store();
        let started = Barrier::new(2);
        let second_calls = AtomicUsize::new(0);

        let (first, second) = thread::scope(|s| {
            let first = s.spawn(|| {
                store.get_or_create("x", V, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(150));
                    Err::<(String, DateTime<Utc>), _>("boom")
                })
            });

            started.wait();
            let second = s.spawn(|| {
                store.get_or_create("x", V, || {
                    second_calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(("late".to_string(), in_secs(5)))
                })
            });

            (first.join().unwrap(), second.join().unwrap())
        });

        assert!(matches!(first, Err(CacheError::FactoryFailure(_))));
        assert!(matches!(second, Err(CacheError::FactoryFailure(_))));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get("x", V).unwrap(), None);
    }

    #[test]
    fn test_rejected_expiry_not_shared_with_waiters() {
        let store = store();
        let started = Barrier::new(2);

        let (first, second) = thread::scope(|s| {
            let first = s.spawn(|| {
                store.get_or_create("x", V, || {
                    started.wait();
                    thread::sleep(Duration::from_millis(100));
                    Ok::<_, CacheError>(("stale".to_string(), in_secs(-1)))
                })
            });

            started.wait();
            let second = s.spawn(|| {
                store.get_or_create("x", V, || {
                    Ok::<_, CacheError>(("fresh".to_string(), in_secs(5)))
                })
            });

            (first.join().unwrap(), second.join().unwrap())
        });

        assert!(matches!(first, Err(CacheError::InvalidExpiry { .. })));
        assert_eq!(second.unwrap(), "fresh");
        assert_eq!(store.get("x", V).unwrap().as_deref(), Some("fresh"));
    }

    #[test]
    fn test_factory_past_expiry_not_committed() {
        let store = store();
        let result =
            store.get_or_create("x", V, || Ok::<_, CacheError>(("X".to_string(), in_secs(-1))));

        assert!(matches!(result, Err(CacheError::InvalidExpiry { .. })));
        assert_eq!(store.get("x", V).unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_get_or_create_runs_once() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let tasks = (0..8).map(|_| {
            let store = store.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                store
                    .get_or_create_async("x", V, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, CacheError>(("X".to_string(), in_secs(5)))
                    })
                    .await
            })
        });

        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), "X");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_unrelated_keys_overlap() {
        let store = store();
        let start = Instant::now();

        let produce = |key: &'static str| {
            let store = store.clone();
            async move {
                store
                    .get_or_create_async(key, V, || async move {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, CacheError>((key.to_string(), in_secs(5)))
                    })
                    .await
            }
        };

        let (a, b) = tokio::join!(produce("a"), produce("b"));
        assert_eq!(a.unwrap(), "a");
        assert_eq!(b.unwrap(), "b");
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_and_async_callers_share_key_lock() {
        let store = store();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let blocking = {
            let store = store.clone();
            thread::spawn(move || {
                store.get_or_create("x", V, move || {
                    let _ = started_tx.send(());
                    thread::sleep(Duration::from_millis(150));
                    Ok::<_, CacheError>(("from-thread".to_string(), in_secs(5)))
                })
            })
        };

        started_rx.await.unwrap();
        let value = store
            .get_or_create_async("x", V, || async {
                Ok::<_, CacheError>(("from-task".to_string(), in_secs(5)))
            })
            .await
            .unwrap();

        assert_eq!(value, "from-thread");
        assert_eq!(blocking.join().unwrap().unwrap(), "from-thread");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_async_factory_failure_shared_with_waiters() {
        let store = store();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let second_calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .get_or_create_async("x", V, move || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_millis(150)).await;
                        Err::<(String, DateTime<Utc>), _>("boom")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        let second = {
            let store = store.clone();
            let calls = Arc::clone(&second_calls);
            tokio::spawn(async move {
                store
                    .get_or_create_async("x", V, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(("late".to_string(), in_secs(5)))
                    })
                    .await
            })
        };

        assert!(matches!(first.await.unwrap(), Err(CacheError::FactoryFailure(_))));
        assert!(matches!(second.await.unwrap(), Err(CacheError::FactoryFailure(_))));
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get("x", V).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cancelled_async_producer_releases_key() {
        let store = store();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            store.get_or_create_async("x", V, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, CacheError>(("never".to_string(), in_secs(5)))
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(store.get("x", V).unwrap(), None);

        let start = Instant::now();
        let value = store
            .get_or_create_async("x", V, || async {
                Ok::<_, CacheError>(("next".to_string(), in_secs(5)))
            })
            .await
            .unwrap();
        assert_eq!(value, "next");
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(store.key_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_async_factory_failure_then_retry() {
        let store = store();
        let failed = store
            .get_or_create_async("x", V, || async { Err::<(String, DateTime<Utc>), _>("boom") })
            .await;
        assert!(matches!(failed, Err(CacheError::FactoryFailure(_))));

        let value = store
            .get_or_create_async("x", V, || async {
                Ok::<_, CacheError>(("retry".to_string(), in_secs(5)))
            })
            .await
            .unwrap();
        assert_eq!(value, "retry");
    }
}
