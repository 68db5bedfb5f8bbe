//! Configuration module for the scopecache driver.
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::cache::StoreConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Scope prefix every key is namespaced under.
    pub scope: String,

    /// Expiration in seconds used by `cache.set` / `cache.try-get`
    /// when the caller gives none.
    pub default_expiration: i64,

    /// Page size used by `cache.list` when the caller gives no limit.
    pub list_limit: usize,

    /// Evict per-key lock slots once idle.
    pub evict_idle_locks: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scope: "/".to_string(),
            default_expiration: 5,
            list_limit: 10,
            evict_idle_locks: true,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing or unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let scope = env::var("SCOPECACHE_SCOPE").unwrap_or(defaults.scope);

        let default_expiration = parse_var("SCOPECACHE_DEFAULT_EXPIRATION")
            .filter(|secs: &i64| *secs > 0)
            .unwrap_or(defaults.default_expiration);

        let list_limit = parse_var("SCOPECACHE_LIST_LIMIT").unwrap_or(defaults.list_limit);

        let evict_idle_locks = parse_var("SCOPECACHE_EVICT_IDLE_LOCKS")
            .unwrap_or(defaults.evict_idle_locks);

        Self {
            scope,
            default_expiration,
            list_limit,
            evict_idle_locks,
        }
    }

    /// Store configuration derived from this config.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new().evict_idle_key_locks(self.evict_idle_locks)
    }
}
