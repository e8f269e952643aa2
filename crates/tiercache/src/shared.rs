//! Second-level cache shared by all sessions of one namespace
//!
//! Holds plain `Record` values. Every lookup hands out a new copy, so no two
//! sessions ever see the same instance. A merge runs under a single write
//! lock: readers observe either none or all of a closed session's entries.

use parking_lot::RwLock;
use tierstore::{QuerySignature, Record};

use crate::lru::LruCache;

/// Result of merging a session's entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Entries written (inserts and overwrites)
    pub merged: usize,
    /// Entries pushed out by the capacity bound
    pub evicted: usize,
}

/// Bounded per-namespace cache
pub struct SharedCache {
    namespace: String,
    entries: RwLock<LruCache<QuerySignature, Record>>,
}

impl SharedCache {
    /// Create an empty cache holding at most `capacity` entries
    pub fn new(namespace: &str, capacity: usize) -> Self {
        Self {
            namespace: namespace.to_string(),
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Namespace this cache serves
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Copy of the cached value, if any
    pub fn lookup(&self, signature: &QuerySignature) -> Option<Record> {
        // get() refreshes recency, so even reads take the write lock
        self.entries.write().get(signature).cloned()
    }

    /// Check membership without touching recency
    pub fn contains(&self, signature: &QuerySignature) -> bool {
        self.entries.read().contains(signature)
    }

    /// Add a batch of entries; later entries for a signature win
    pub fn merge<I>(&self, entries: I) -> MergeOutcome
    where
        I: IntoIterator<Item = (QuerySignature, Record)>,
    {
        let mut outcome = MergeOutcome::default();
        let mut cache = self.entries.write();
        for (signature, record) in entries {
            outcome.merged += 1;
            if cache.put(signature, record).is_some() {
                outcome.evicted += 1;
            }
        }
        outcome
    }

    /// Drop every entry, returning how many were held
    pub fn clear(&self) -> usize {
        let mut cache = self.entries.write();
        let n = cache.len();
        cache.clear();
        n
    }

    /// Current number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.entries.read().capacity()
    }
}
