//! `cache.set` verb.
//!
//! Stores the `value` child under `key`. A missing or null value removes
//! the key instead.

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::args;
use super::{CacheVerb, CachedValue, VerbContext};

/// Handler for `cache.set`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSet;

impl CacheVerb for CacheSet {
    fn name(&self) -> &'static str {
        "cache.set"
    }

    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let key = args::key(args, self.name())?;
        let partition = args::partition(args)?;

        let value = match args.get("value") {
            None | Some(Value::Null) => {
                ctx.store.remove(key, partition)?;
                debug!("Removed {} via null value", key);
                return Ok(Value::Null);
            }
            Some(value) => value.clone(),
        };

        let secs = args::expiration_secs(args, ctx.default_expiration)?;
        let expiration_type = args::expiration_type(args)?;
        let expires_at = args::expires_in(secs)?;

        let cached = CachedValue::new(value, expiration_type, secs);
        ctx.store.upsert(key, cached, expires_at, partition)?;
        Ok(Value::Null)
    }
}
