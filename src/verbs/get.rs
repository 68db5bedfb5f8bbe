//! `cache.get` verb.

use anyhow::Result;
use serde_json::Value;

use super::args;
use super::{CacheVerb, CachedValue, VerbContext};

/// Handler for `cache.get`. Returns the cached value, or null if absent.
///
/// Reading a sliding entry renews it in the same store critical section.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheGet;

impl CacheVerb for CacheGet {
    fn name(&self) -> &'static str {
        "cache.get"
    }

    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let key = args::key(args, self.name())?;
        let partition = args::partition(args)?;

        let cached = ctx.store.get_renewing(key, partition, CachedValue::renewal)?;
        Ok(cached.map(|cached| cached.value).unwrap_or(Value::Null))
    }
}
