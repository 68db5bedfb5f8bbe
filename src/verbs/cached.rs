//! Value type the verbs keep in the store.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::args::{ExpirationType, expires_in};

/// A verb value and its sliding window, kept together in one cache entry.
///
/// Reads renew the entry they return under the store lock, so a sliding
/// window can never outlive or revive the value it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,

    /// Seconds every read pushes expiry out by. `None` for absolute expiry.
    pub sliding: Option<i64>,
}

impl CachedValue {
    pub fn new(value: Value, expiration_type: ExpirationType, secs: i64) -> Self {
        let sliding = match expiration_type {
            ExpirationType::Sliding => Some(secs),
            ExpirationType::Absolute => None,
        };
        Self { value, sliding }
    }

    pub fn absolute(value: Value) -> Self {
        Self {
            value,
            sliding: None,
        }
    }

    /// Expiry a read of this value renews to, if it slides.
    pub fn renewal(&self) -> Option<DateTime<Utc>> {
        self.sliding.and_then(|secs| expires_in(secs).ok())
    }
}
