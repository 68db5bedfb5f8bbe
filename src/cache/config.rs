//! Cache store configuration.

/// Configuration for a [`CacheStore`](super::CacheStore) instance.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Drop a key's lock slot once nobody holds or waits on it.
    /// Without this the lock registry grows with every distinct key ever
    /// passed to get-or-create.
    pub evict_idle_key_locks: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            evict_idle_key_locks: true,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether idle key locks are evicted (builder pattern).
    #[must_use]
    pub fn evict_idle_key_locks(mut self, evict: bool) -> Self {
        self.evict_idle_key_locks = evict;
        self
    }
}
