//! `cache.try-get` and `wait.cache.try-get` verbs.
//!
//! Return the cached value for `key`, or evaluate the `.lambda` child,
//! cache its result and return it. Concurrent callers of one key share a
//! single evaluation. The `wait.` form suspends instead of blocking while
//! another caller evaluates.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::args::{self, ExpirationType};
use super::{
    AsyncCacheVerb, AsyncLambdaEvaluator, CacheVerb, CachedValue, LambdaEvaluator, VerbContext,
};
use crate::cache::Partition;

/// Evaluator returning the lambda's `return` child as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnEvaluator;

fn return_child(lambda: &Value) -> Result<Value> {
    lambda
        .get("return")
        .cloned()
        .context("[.lambda] has no [return] value")
}

impl LambdaEvaluator for ReturnEvaluator {
    fn evaluate(&self, lambda: &Value) -> Result<Value> {
        return_child(lambda)
    }
}

#[async_trait]
impl AsyncLambdaEvaluator for ReturnEvaluator {
    async fn evaluate(&self, lambda: &Value) -> Result<Value> {
        return_child(lambda)
    }
}

/// Arguments shared by both forms of the verb.
struct TryGetArgs<'a> {
    key: &'a str,
    partition: Partition,
    lambda: &'a Value,
    secs: i64,
    expiration_type: ExpirationType,
}

impl<'a> TryGetArgs<'a> {
    fn parse(verb: &str, ctx: &VerbContext, args: &'a Value) -> Result<Self> {
        let key = args::key(args, verb)?;
        let partition = args::partition(args)?;
        let lambda = args
            .get(".lambda")
            .filter(|lambda| !lambda.is_null())
            .ok_or_else(|| anyhow!("[{}] must be given a [.lambda]", verb))?;

        Ok(Self {
            key,
            partition,
            lambda,
            secs: args::expiration_secs(args, ctx.default_expiration)?,
            expiration_type: args::expiration_type(args)?,
        })
    }

    /// Wrap a freshly evaluated value into the entry to commit.
    fn entry(&self, value: Value) -> Result<(CachedValue, DateTime<Utc>)> {
        let expires_at = args::expires_in(self.secs)?;
        Ok((CachedValue::new(value, self.expiration_type, self.secs), expires_at))
    }

    /// Final value for the caller. A hit on a sliding entry counts as a
    /// read and renews it.
    fn settle(&self, ctx: &VerbContext, cached: CachedValue, produced: bool) -> Result<Value> {
        if produced || cached.sliding.is_none() {
            return Ok(cached.value);
        }
        let renewed = ctx
            .store
            .get_renewing(self.key, self.partition, CachedValue::renewal)?;
        Ok(renewed.unwrap_or(cached).value)
    }
}

/// Handler for `cache.try-get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheTryGet;

impl CacheVerb for CacheTryGet {
    fn name(&self) -> &'static str {
        "cache.try-get"
    }

    fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let args = TryGetArgs::parse(self.name(), ctx, args)?;
        let evaluator = ctx
            .evaluator
            .as_deref()
            .ok_or_else(|| anyhow!("[{}] needs a lambda evaluator", self.name()))?;

        let mut produced = false;
        let cached = ctx.store.get_or_create(args.key, args.partition, || {
            let value = evaluator.evaluate(args.lambda)?;
            produced = true;
            args.entry(value)
        })?;

        args.settle(ctx, cached, produced)
    }
}

/// Handler for `wait.cache.try-get`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheTryGetAsync;

#[async_trait]
impl AsyncCacheVerb for CacheTryGetAsync {
    fn name(&self) -> &'static str {
        "wait.cache.try-get"
    }

    async fn invoke(&self, ctx: &VerbContext, args: &Value) -> Result<Value> {
        let args = TryGetArgs::parse(self.name(), ctx, args)?;
        let evaluator = ctx
            .async_evaluator
            .as_deref()
            .ok_or_else(|| anyhow!("[{}] needs an async lambda evaluator", self.name()))?;

        let produced = AtomicBool::new(false);
        let cached = {
            let (args, produced) = (&args, &produced);
            ctx.store
                .get_or_create_async(args.key, args.partition, move || async move {
                    let value = evaluator.evaluate(args.lambda).await?;
                    produced.store(true, Ordering::Relaxed);
                    args.entry(value)
                })
                .await?
        };

        args.settle(ctx, cached, produced.load(Ordering::Relaxed))
    }
}
