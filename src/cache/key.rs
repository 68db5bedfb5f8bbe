//! Key namespacing.
//!
//! Every caller key is stored as `scope + marker + key`, where the marker
//! separates the hidden (internal) partition from the visible one. Caller
//! input starting with a marker is rejected on the visible partition so it
//! can never reach into hidden entries.

use super::error::{CacheError, Result};

/// Marker prefixed to keys in the hidden partition.
pub const HIDDEN_MARKER: char = '.';

/// Marker prefixed to keys in the visible partition.
pub const VISIBLE_MARKER: char = '+';

/// Which half of the key space an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Partition {
    /// Caller-addressable entries.
    #[default]
    Visible,
    /// Internal entries, invisible to visible-partition enumeration.
    Hidden,
}

impl Partition {
    /// Build a partition from a `hidden` flag.
    pub fn from_hidden(hidden: bool) -> Self {
        if hidden { Self::Hidden } else { Self::Visible }
    }

    pub fn marker(self) -> char {
        match self {
            Self::Visible => VISIBLE_MARKER,
            Self::Hidden => HIDDEN_MARKER,
        }
    }
}

fn starts_with_marker(s: &str) -> bool {
    s.starts_with(HIDDEN_MARKER) || s.starts_with(VISIBLE_MARKER)
}

fn partition_prefix(scope: &str, partition: Partition) -> String {
    let mut prefix = String::with_capacity(scope.len() + 1);
    prefix.push_str(scope);
    prefix.push(partition.marker());
    prefix
}

/// Compute the storage key for `key` within `scope`.
pub fn effective_key(key: &str, scope: &str, partition: Partition) -> Result<String> {
    if key.is_empty() {
        return Err(CacheError::invalid_key("key must not be empty"));
    }
    if partition == Partition::Visible && starts_with_marker(key) {
        return Err(CacheError::invalid_key(format!(
            "key '{}' starts with a reserved marker",
            key
        )));
    }

    let mut full = partition_prefix(scope, partition);
    full.push_str(key);
    Ok(full)
}

/// Compute the storage prefix matching `filter` within `scope`.
///
/// An absent or empty filter matches the whole partition.
pub fn effective_filter(filter: Option<&str>, scope: &str, partition: Partition) -> Result<String> {
    let filter = filter.unwrap_or_default();
    if partition == Partition::Visible && starts_with_marker(filter) {
        return Err(CacheError::invalid_key(format!(
            "filter '{}' starts with a reserved marker",
            filter
        )));
    }

    let mut full = partition_prefix(scope, partition);
    full.push_str(filter);
    Ok(full)
}

/// Strip scope and marker from a storage key.
///
/// Returns `None` if `full` does not belong to `scope`/`partition`.
pub fn strip<'a>(full: &'a str, scope: &str, partition: Partition) -> Option<&'a str> {
    full.strip_prefix(scope)?.strip_prefix(partition.marker())
}
