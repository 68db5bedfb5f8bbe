//! Cache error types.

use std::error::Error as StdError;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Boxed failure raised by a get-or-create factory.
pub type FactoryError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by the cache store.
///
/// `Clone` so a single factory failure can be handed to every caller
/// that was waiting on the same key.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Key or filter was empty, or used a reserved partition marker.
    #[error("invalid cache key: {reason}")]
    InvalidKey { reason: String },

    /// Expiry instant lies in the past at the point of commit.
    #[error("cache entry would expire at {expires_at}, which is before {now}")]
    InvalidExpiry {
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The producing computation of a get-or-create call failed.
    #[error("cache factory failed: {0}")]
    FactoryFailure(#[source] FactoryError),
}

impl CacheError {
    pub(crate) fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    pub(crate) fn factory<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::FactoryFailure(Arc::from(err.into()))
    }
}

/// Result alias used throughout the cache module.
pub type Result<T> = std::result::Result<T, CacheError>;
