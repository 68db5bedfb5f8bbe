//! Scope resolution.

/// Supplies the scope prefix that namespaces every key of a store.
///
/// The store asks once per operation and never caches the answer, so a
/// resolver may return different scopes over time (e.g. per tenant).
pub trait ScopeResolver: Send + Sync {
    fn scope_prefix(&self) -> String;
}

/// Resolver returning the same scope for every call.
#[derive(Debug, Clone, Default)]
pub struct StaticScope(String);

impl StaticScope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }
}

impl ScopeResolver for StaticScope {
    fn scope_prefix(&self) -> String {
        self.0.clone()
    }
}

impl<F> ScopeResolver for F
where
    F: Fn() -> String + Send + Sync,
{
    fn scope_prefix(&self) -> String {
        self()
    }
}
