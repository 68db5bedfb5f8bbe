//! Stored cache entry.

use chrono::{DateTime, Utc};

/// A cached value together with its absolute expiry.
#[derive(Debug, Clone)]
pub struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    pub fn new(value: V, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Push the expiry out to `at`. Never shortens it.
    pub fn extend_to(&mut self, at: DateTime<Utc>) {
        if at > self.expires_at {
            self.expires_at = at;
        }
    }

    /// An entry is expired once `now` reaches its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
