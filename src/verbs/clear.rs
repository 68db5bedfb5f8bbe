//! `cache.clear` verb.

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::args;
use super::{CacheVerb, VerbContext};

/// Handler for `cache.clear`. Clears the whole partition, or only keys
/// starting with `filter`, and returns the number of live entries removed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheClear;

impl CacheVerb for CacheClear {
    fn name(&self) -> &'static str {
        "cache.clear"
    }

    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let filter = args::optional_str(args, "filter")?;
        let partition = args::partition(args)?;

        let removed = ctx.store.clear(filter, partition)?;

        debug!("[{}] removed {} entries", self.name(), removed);
        Ok(Value::from(removed))
    }
}
