//! Cache coordinator: routes queries through both tiers to the store
//!
//! ```text
//! query -> session tier -> shared tier (namespace) -> Persistence::fetch
//!            ^                 ^
//!            |                 +-- merge on close / commit
//!            +-- cleared on write / clear / rollback
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::RwLock;
use tierstore::{Mutation, Persistence, QuerySignature, Record};
use tracing::{debug, info};

use crate::config::{CacheConfig, LocalCacheScope, QueryOptions, WriteOptions};
use crate::error::{Error, Result};
use crate::session::SessionCache;
use crate::shared::SharedCache;
use crate::stats::CacheStats;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting queries and writes
    Open,
    /// Closed; every further operation is an `InvalidState` fault
    Closed,
}

/// Caller-owned session handle
///
/// Dropping an open session discards its cache without promotion, the same
/// as [`CacheCoordinator::rollback`] followed by abandonment.
pub struct Session {
    id: u64,
    namespace: String,
    cache: SessionCache,
}

impl Session {
    /// Unique id within the coordinator
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Namespace the session was opened on
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        if self.cache.is_closed() {
            SessionState::Closed
        } else {
            SessionState::Open
        }
    }

    /// Number of entries in the session tier
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn check_namespace(&self, requested: &str) -> Result<()> {
        if requested != self.namespace {
            return Err(Error::NamespaceMismatch {
                session: self.namespace.clone(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }
}

/// Two-level read-through cache in front of a [`Persistence`] store
///
/// Owns one [`SharedCache`] per namespace, created on first use and dropped
/// with the coordinator.
pub struct CacheCoordinator<P: Persistence> {
    store: P,
    config: CacheConfig,
    namespaces: RwLock<HashMap<String, Arc<SharedCache>, RandomState>>,
    stats: CacheStats,
    next_session: AtomicU64,
}

impl<P: Persistence> CacheCoordinator<P> {
    /// Create a coordinator over a store
    pub fn new(store: P, config: CacheConfig) -> Self {
        info!(
            cache_enabled = config.cache_enabled,
            local_scope = ?config.local_scope,
            flush_shared_on_write = config.flush_shared_on_write,
            shared_capacity = config.shared_capacity,
            "cache coordinator created"
        );
        Self {
            store,
            config,
            namespaces: RwLock::new(HashMap::with_hasher(RandomState::new())),
            stats: CacheStats::new(),
            next_session: AtomicU64::new(1),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Counters across all sessions
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The backing store
    pub fn store(&self) -> &P {
        &self.store
    }

    fn shared(&self, namespace: &str) -> Arc<SharedCache> {
        if let Some(cache) = self.namespaces.read().get(namespace) {
            return Arc::clone(cache);
        }

        let mut namespaces = self.namespaces.write();
        let cache = namespaces.entry(namespace.to_string()).or_insert_with(|| {
            debug!(namespace, "shared cache created");
            Arc::new(SharedCache::new(namespace, self.config.shared_capacity))
        });
        Arc::clone(cache)
    }

    /// Shared cache for a namespace, if one has been created
    pub fn shared_cache(&self, namespace: &str) -> Option<Arc<SharedCache>> {
        self.namespaces.read().get(namespace).cloned()
    }

    /// Names of every namespace seen so far, sorted
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Open a session on a namespace
    pub fn open_session(&self, namespace: &str) -> Session {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        if self.config.cache_enabled {
            self.shared(namespace);
        }
        debug!(session = id, namespace, "session opened");

        Session {
            id,
            namespace: namespace.to_string(),
            cache: SessionCache::new(id),
        }
    }

    /// Resolve a query with default options
    ///
    /// `Ok(None)` is a store miss; misses are never cached.
    pub fn query(
        &self,
        session: &mut Session,
        signature: &QuerySignature,
    ) -> Result<Option<Arc<Record>>> {
        self.query_with(session, signature, QueryOptions::default())
    }

    /// Resolve a query
    pub fn query_with(
        &self,
        session: &mut Session,
        signature: &QuerySignature,
        options: QueryOptions,
    ) -> Result<Option<Arc<Record>>> {
        session.cache.ensure_open("query")?;
        session.check_namespace(signature.namespace())?;

        if self.config.local_scope == LocalCacheScope::Session {
            if let Some(record) = session.cache.lookup(signature)? {
                self.stats.record_session_hit();
                debug!(session = session.id, %signature, "session cache hit");
                return Ok(Some(record));
            }
        }

        let shared_tier = self.config.cache_enabled && options.use_cache;
        if shared_tier {
            if let Some(value) = self.shared(&session.namespace).lookup(signature) {
                self.stats.record_shared_hit();
                debug!(session = session.id, %signature, "shared cache hit");
                let record = Arc::new(value);
                session
                    .cache
                    .store(signature.clone(), Arc::clone(&record), false)?;
                return Ok(Some(record));
            }
        }

        self.stats.record_fetch();
        debug!(session = session.id, %signature, "fetching from store");
        match self.store.fetch(signature)? {
            Some(value) => {
                let record = Arc::new(value);
                session
                    .cache
                    .store(signature.clone(), Arc::clone(&record), shared_tier)?;
                Ok(Some(record))
            }
            None => {
                self.stats.record_not_found();
                Ok(None)
            }
        }
    }

    /// Apply a mutation with default options
    pub fn write(&self, session: &mut Session, mutation: &Mutation) -> Result<u64> {
        self.write_with(session, mutation, WriteOptions::default())
    }

    /// Apply a mutation, then clear the session tier
    ///
    /// The shared tier is only cleared when the options or the config ask for
    /// it; until then other sessions may read the pre-write value.
    pub fn write_with(
        &self,
        session: &mut Session,
        mutation: &Mutation,
        options: WriteOptions,
    ) -> Result<u64> {
        session.cache.ensure_open("write")?;
        session.check_namespace(mutation.namespace())?;

        let affected = self.store.execute(mutation)?;

        session.cache.invalidate_all()?;
        self.stats.record_invalidation();
        debug!(session = session.id, affected, "write applied, session cache cleared");

        if options
            .flush_shared
            .unwrap_or(self.config.flush_shared_on_write)
        {
            self.clear_namespace_cache(&session.namespace);
        }

        Ok(affected)
    }

    fn promote(&self, namespace: &str, entries: Vec<(QuerySignature, Record)>) -> usize {
        if !self.config.cache_enabled || entries.is_empty() {
            return 0;
        }

        let outcome = self.shared(namespace).merge(entries);
        self.stats.record_promotions(outcome.merged as u64);
        self.stats.record_evictions(outcome.evicted as u64);
        outcome.merged
    }

    /// Promote fresh session entries while keeping the session open
    pub fn commit(&self, session: &mut Session) -> Result<usize> {
        let entries = session.cache.take_fresh()?;
        let promoted = self.promote(&session.namespace, entries);
        debug!(session = session.id, promoted, "session committed");
        Ok(promoted)
    }

    /// Discard the session tier without promoting anything
    pub fn rollback(&self, session: &mut Session) -> Result<()> {
        session.cache.invalidate_all()?;
        self.stats.record_invalidation();
        debug!(session = session.id, "session rolled back");
        Ok(())
    }

    /// Clear the session tier only
    pub fn clear_session_cache(&self, session: &mut Session) -> Result<()> {
        session.cache.invalidate_all()?;
        self.stats.record_invalidation();
        Ok(())
    }

    /// Close a session and merge its fresh entries into the shared tier
    ///
    /// Returns the number of entries promoted.
    pub fn close_session(&self, session: &mut Session) -> Result<usize> {
        let entries = session.cache.close()?;
        let fresh: Vec<(QuerySignature, Record)> = entries
            .into_iter()
            .filter(|(_, entry)| entry.is_fresh())
            .map(|(signature, entry)| (signature, Record::clone(entry.record())))
            .collect();

        let promoted = self.promote(&session.namespace, fresh);
        debug!(session = session.id, promoted, "session closed");
        Ok(promoted)
    }

    /// Clear a namespace's shared cache, returning the entries dropped
    pub fn clear_namespace_cache(&self, namespace: &str) -> usize {
        let cleared = self
            .shared_cache(namespace)
            .map_or(0, |cache| cache.clear());
        debug!(namespace, cleared, "shared cache cleared");
        cleared
    }

    /// Clear and drop every shared cache
    pub fn shutdown(&self) {
        let mut namespaces = self.namespaces.write();
        for cache in namespaces.values() {
            cache.clear();
        }
        info!(namespaces = namespaces.len(), "cache coordinator shut down");
        namespaces.clear();
    }
}
