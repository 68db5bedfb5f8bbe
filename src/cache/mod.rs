//! Cache module - scoped in-memory cache with per-entry expiry.
//!
//! ## Architecture
//!
//! The cache is built from small layers, leaves first:
//! - `key` - Namespacer turning caller keys into scoped storage keys
//! - `locks` - `KeyLockRegistry` handing out one lock per storage key
//! - `store` - `CacheStore` owning the entry map behind a single mutex
//!
//! `get_or_create` takes the key lock first and the map lock only for the
//! hit check and the final write, so a slow factory never blocks other keys.
//!
//! ## Usage
//!
//! ```rust
//! use chrono::{Duration, Utc};
//! use scopecache::cache::{CacheError, CacheStore, Partition, StaticScope};
//!
//! let store: CacheStore<String> = CacheStore::new(StaticScope::new("/app/"));
//!
//! let value = store
//!     .get_or_create("report", Partition::Visible, || {
//!         Ok::<_, CacheError>(("expensive".to_string(), Utc::now() + Duration::seconds(30)))
//!     })
//!     .unwrap();
//! assert_eq!(value, "expensive");
//! ```

mod config;
mod entry;
mod error;
pub mod key;
mod locks;
mod scope;
mod store;

pub use config::StoreConfig;
pub use entry::Entry;
pub use error::{CacheError, FactoryError, Result};
pub use key::Partition;
pub use locks::{KeyGuard, KeyLockRegistry};
pub use scope::{ScopeResolver, StaticScope};
pub use store::CacheStore;
