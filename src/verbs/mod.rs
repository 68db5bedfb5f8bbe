//! Verb binding layer.
//!
//! Exposes the cache store as named verbs (`cache.set`, `cache.get`, ...)
//! taking a tree-shaped JSON argument. Verbs are registered explicitly:
//! 1. Create a new file in this directory implementing [`CacheVerb`]
//!    (or [`AsyncCacheVerb`] for verbs that wait without blocking)
//! 2. Add `mod your_verb;` below
//! 3. Register it in [`VerbRegistry::with_defaults`]

mod args;
mod cached;
mod clear;
mod get;
mod list;
mod set;
mod try_get;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::cache::CacheStore;
use crate::config::Config;

pub use args::ExpirationType;
pub use cached::CachedValue;
pub use clear::CacheClear;
pub use get::CacheGet;
pub use list::{CacheCount, CacheList};
pub use set::CacheSet;
pub use try_get::{CacheTryGet, CacheTryGetAsync, ReturnEvaluator};

/// Evaluates the `.lambda` child of `cache.try-get` to produce a value.
pub trait LambdaEvaluator: Send + Sync {
    fn evaluate(&self, lambda: &Value) -> Result<Value>;
}

/// Async counterpart of [`LambdaEvaluator`], used by `wait.cache.try-get`.
#[async_trait]
pub trait AsyncLambdaEvaluator: Send + Sync {
    async fn evaluate(&self, lambda: &Value) -> Result<Value>;
}

/// Shared state handed to every verb invocation.
#[derive(Clone)]
pub struct VerbContext {
    pub store: CacheStore<CachedValue>,

    /// Expiration in seconds when the caller gives none.
    pub default_expiration: i64,

    /// `cache.list` page size when the caller gives none.
    pub list_limit: usize,

    /// Needed by `cache.try-get` only.
    pub evaluator: Option<Arc<dyn LambdaEvaluator>>,

    /// Needed by `wait.cache.try-get` only.
    pub async_evaluator: Option<Arc<dyn AsyncLambdaEvaluator>>,
}

impl VerbContext {
    /// Build a context from application config.
    pub fn new(store: CacheStore<CachedValue>, config: &Config) -> Self {
        Self {
            store,
            default_expiration: config.default_expiration,
            list_limit: config.list_limit,
            evaluator: None,
            async_evaluator: None,
        }
    }

    #[must_use]
    pub fn with_evaluator(mut self, evaluator: impl LambdaEvaluator + 'static) -> Self {
        self.evaluator = Some(Arc::new(evaluator));
        self
    }

    #[must_use]
    pub fn with_async_evaluator(mut self, evaluator: impl AsyncLambdaEvaluator + 'static) -> Self {
        self.async_evaluator = Some(Arc::new(evaluator));
        self
    }
}

impl std::fmt::Debug for VerbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbContext")
            .field("store", &self.store)
            .field("default_expiration", &self.default_expiration)
            .field("list_limit", &self.list_limit)
            .field("has_evaluator", &self.evaluator.is_some())
            .field("has_async_evaluator", &self.async_evaluator.is_some())
            .finish()
    }
}

/// A named cache operation.
pub trait CacheVerb: Send + Sync {
    /// Name the verb is invoked by, e.g. `cache.get`.
    fn name(&self) -> &'static str;

    /// Run the verb against `args` and return its result.
    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value>;
}

/// A named cache operation that suspends instead of blocking while it waits.
#[async_trait]
pub trait AsyncCacheVerb: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value>;
}

/// Registration table mapping verb names to handlers.
#[derive(Default)]
pub struct VerbRegistry {
    verbs: HashMap<&'static str, Box<dyn CacheVerb>>,
    async_verbs: HashMap<&'static str, Box<dyn AsyncCacheVerb>>,
}

impl VerbRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in cache verb.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CacheSet);
        registry.register(CacheGet);
        registry.register(CacheList);
        registry.register(CacheCount);
        registry.register(CacheClear);
        registry.register(CacheTryGet);
        registry.register_async(CacheTryGetAsync);
        debug!("Verb registry initialized with {} verbs", registry.names().len());
        registry
    }

    /// Register a verb, replacing any verb with the same name.
    pub fn register(&mut self, verb: impl CacheVerb + 'static) {
        let name = verb.name();
        let replaced = self.async_verbs.remove(name).is_some();
        if self.verbs.insert(name, Box::new(verb)).is_some() || replaced {
            debug!("Replaced existing registration of [{}]", name);
        }
    }

    /// Register an async verb, replacing any verb with the same name.
    pub fn register_async(&mut self, verb: impl AsyncCacheVerb + 'static) {
        let name = verb.name();
        let replaced = self.verbs.remove(name).is_some();
        if self.async_verbs.insert(name, Box::new(verb)).is_some() || replaced {
            debug!("Replaced existing registration of [{}]", name);
        }
    }

    /// Invoke the blocking verb registered under `name`.
    pub fn invoke(&self, name: &str, ctx: &VerbContext, args: &Value) -> Result<Value> {
        if self.is_async(name) {
            return Err(anyhow!("[{}] is async and must be awaited", name));
        }
        let verb = self
            .verbs
            .get(name)
            .ok_or_else(|| anyhow!("no verb named [{}]", name))?;
        verb.invoke(ctx, args)
    }

    /// Invoke the verb registered under `name`, async or not.
    ///
    /// Blocking verbs run inline on the calling task.
    pub async fn invoke_async(&self, name: &str, ctx: &VerbContext, args: &Value) -> Result<Value> {
        match self.async_verbs.get(name) {
            Some(verb) => verb.invoke(ctx, args).await,
            None => self.invoke(name, ctx, args),
        }
    }

    /// Whether `name` is registered as an async verb.
    pub fn is_async(&self, name: &str) -> bool {
        self.async_verbs.contains_key(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.verbs.contains_key(name) || self.async_verbs.contains_key(name)
    }

    /// Registered verb names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .verbs
            .keys()
            .chain(self.async_verbs.keys())
            .copied()
            .collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for VerbRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbRegistry")
            .field("verbs", &self.names())
            .finish()
    }
}
