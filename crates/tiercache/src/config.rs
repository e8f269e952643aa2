//! Coordinator configuration

/// Which queries the session tier may answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalCacheScope {
    /// Repeated queries within a session are served from the session tier
    #[default]
    Session,
    /// Every query bypasses the session tier; entries are only staged for
    /// promotion
    Statement,
}

/// Settings for a [`CacheCoordinator`](crate::CacheCoordinator)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Use the shared tier at all. The session tier is always on.
    pub cache_enabled: bool,
    /// Scope of session-tier hits.
    pub local_scope: LocalCacheScope,
    /// Clear the namespace's shared cache after every write.
    pub flush_shared_on_write: bool,
    /// Maximum entries per namespace shared cache.
    pub shared_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            local_scope: LocalCacheScope::Session,
            flush_shared_on_write: false,
            shared_capacity: 10_000,
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable the shared tier.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Set the session-tier scope.
    pub fn with_local_scope(mut self, scope: LocalCacheScope) -> Self {
        self.local_scope = scope;
        self
    }

    /// Clear the shared tier on every write by default.
    pub fn with_flush_shared_on_write(mut self, flush: bool) -> Self {
        self.flush_shared_on_write = flush;
        self
    }

    /// Set the per-namespace shared capacity.
    pub fn with_shared_capacity(mut self, capacity: usize) -> Self {
        self.shared_capacity = capacity;
        self
    }
}

/// Per-query overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Consult the shared tier and promote the result on close.
    pub use_cache: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { use_cache: true }
    }
}

/// Per-write overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    /// Clear the shared tier after this write. `None` follows
    /// [`CacheConfig::flush_shared_on_write`].
    pub flush_shared: Option<bool>,
}

impl WriteOptions {
    /// Force a shared-tier flush for this write.
    pub fn flush() -> Self {
        Self {
            flush_shared: Some(true),
        }
    }
}
