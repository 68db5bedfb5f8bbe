//! `cache.list` and `cache.count` verbs.

use anyhow::Result;
use serde_json::{Value, json};

use super::args;
use super::{CacheVerb, VerbContext};

/// Handler for `cache.list`.
///
/// Returns `[{key, value}, ...]` sorted by key, paged by `offset`/`limit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheList;

impl CacheVerb for CacheList {
    fn name(&self) -> &'static str {
        "cache.list"
    }

    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let filter = args::optional_str(args, "filter")?;
        let partition = args::partition(args)?;
        let offset = args::optional_usize(args, "offset", 0)?;
        let limit = args::optional_usize(args, "limit", ctx.list_limit)?;

        let items = ctx
            .store
            .items(filter, partition)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(key, cached)| json!({ "key": key, "value": cached.value }))
            .collect();

        Ok(Value::Array(items))
    }
}

/// Handler for `cache.count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheCount;

impl CacheVerb for CacheCount {
    fn name(&self) -> &'static str {
        "cache.count"
    }

    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let filter = args::optional_str(args, "filter")?;
        let partition = args::partition(args)?;
        Ok(Value::from(ctx.store.count(filter, partition)?))
    }
}
