//! Argument extraction for verbs.

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::Partition;

/// How an entry's expiration is applied.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationType {
    /// Entry expires a fixed time after it was written.
    #[default]
    Absolute,
    /// Expiration is pushed back every time the entry is read.
    Sliding,
}

/// Required, non-empty `key` argument.
pub fn key<'a>(args: &'a Value, verb: &str) -> Result<&'a str> {
    match args.get("key") {
        Some(Value::String(k)) if !k.is_empty() => Ok(k.as_str()),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            bail!("[{}] must be given a key", verb)
        }
        Some(other) => bail!("[{}] key must be a string, got {}", verb, other),
    }
}

/// Optional string argument; null counts as absent.
pub fn optional_str<'a>(args: &'a Value, name: &str) -> Result<Option<&'a str>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => bail!("[{}] must be a string, got {}", name, other),
    }
}

/// Optional integer argument, accepting numbers and numeric strings.
fn optional_i64(args: &Value, name: &str) -> Result<Option<i64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(Some)
            .ok_or_else(|| anyhow!("[{}] must be an integer, got {}", name, n)),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("[{}] must be an integer, got '{}'", name, s)),
        Some(other) => bail!("[{}] must be an integer, got {}", name, other),
    }
}

/// Optional non-negative count argument such as `offset` or `limit`.
pub fn optional_usize(args: &Value, name: &str, default: usize) -> Result<usize> {
    match optional_i64(args, name)? {
        None => Ok(default),
        Some(n) => usize::try_from(n).map_err(|_| anyhow!("[{}] must not be negative", name)),
    }
}

/// `expiration` in seconds, falling back to `default`.
pub fn expiration_secs(args: &Value, default: i64) -> Result<i64> {
    Ok(optional_i64(args, "expiration")?.unwrap_or(default))
}

/// Absolute expiry instant `secs` from now.
pub fn expires_in(secs: i64) -> Result<DateTime<Utc>> {
    Duration::try_seconds(secs)
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| anyhow!("[expiration] of {} seconds is out of range", secs))
}

pub fn expiration_type(args: &Value) -> Result<ExpirationType> {
    match args.get("expiration-type") {
        None | Some(Value::Null) => Ok(ExpirationType::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|_| {
            anyhow!("[expiration-type] must be 'absolute' or 'sliding', got {}", value)
        }),
    }
}

/// Partition selected by the optional `hidden` flag.
pub fn partition(args: &Value) -> Result<Partition> {
    match args.get("hidden") {
        None | Some(Value::Null) => Ok(Partition::Visible),
        Some(Value::Bool(hidden)) => Ok(Partition::from_hidden(*hidden)),
        Some(other) => bail!("[hidden] must be a boolean, got {}", other),
    }
}
