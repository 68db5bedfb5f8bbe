//! Scopecache - scoped in-memory cache with stampede-free get-or-create.
//!
//! ## Architecture
//!
//! - `cache` - The core: key namespacing, per-key locks and the TTL store
//! - `verbs` - Named cache verbs (`cache.set`, `cache.get`, ...) over JSON arguments
//! - `config` - Environment configuration for the driver binary

pub mod cache;
pub mod config;
pub mod verbs;

pub use cache::{CacheError, CacheStore, Partition, ScopeResolver, StaticScope, StoreConfig};
pub use config::Config;
pub use verbs::{
    AsyncCacheVerb, AsyncLambdaEvaluator, CacheVerb, CachedValue, LambdaEvaluator, VerbContext,
    VerbRegistry,
};
