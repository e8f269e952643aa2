//! First-level cache owned by a single session
//!
//! Entries hold `Arc<Record>` so repeated hits hand back the same instance.
//! No locking: the owning session is the only reader and writer.

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use tierstore::{QuerySignature, Record};

use crate::error::{Error, Result};

/// A record held by the session tier
#[derive(Debug, Clone)]
pub struct CacheEntry {
    record: Arc<Record>,
    fresh: bool,
}

impl CacheEntry {
    /// Wrap a record; `fresh` marks it as due for promotion
    pub fn new(record: Arc<Record>, fresh: bool) -> Self {
        Self { record, fresh }
    }

    /// The cached instance
    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }

    /// Fetched by this session and not yet promoted
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

/// Per-session map from signature to record
pub struct SessionCache {
    session: u64,
    /// `None` once closed
    entries: Option<HashMap<QuerySignature, CacheEntry, RandomState>>,
}

impl SessionCache {
    /// Create an empty, open cache for a session id
    pub fn new(session: u64) -> Self {
        Self {
            session,
            entries: Some(HashMap::with_hasher(RandomState::new())),
        }
    }

    fn open_entries(
        &self,
        operation: &'static str,
    ) -> Result<&HashMap<QuerySignature, CacheEntry, RandomState>> {
        self.entries.as_ref().ok_or(Error::InvalidState {
            session: self.session,
            operation,
        })
    }

    fn open_entries_mut(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut HashMap<QuerySignature, CacheEntry, RandomState>> {
        let session = self.session;
        self.entries
            .as_mut()
            .ok_or(Error::InvalidState { session, operation })
    }

    /// Fail with `InvalidState` if closed
    pub fn ensure_open(&self, operation: &'static str) -> Result<()> {
        self.open_entries(operation).map(|_| ())
    }

    /// Exact-match lookup
    pub fn lookup(&self, signature: &QuerySignature) -> Result<Option<Arc<Record>>> {
        Ok(self
            .open_entries("lookup")?
            .get(signature)
            .map(|entry| Arc::clone(&entry.record)))
    }

    /// Insert or overwrite
    pub fn store(
        &mut self,
        signature: QuerySignature,
        record: Arc<Record>,
        fresh: bool,
    ) -> Result<()> {
        self.open_entries_mut("store")?
            .insert(signature, CacheEntry::new(record, fresh));
        Ok(())
    }

    /// Drop every entry
    pub fn invalidate_all(&mut self) -> Result<()> {
        self.open_entries_mut("invalidate")?.clear();
        Ok(())
    }

    /// Copy out fresh entries and mark them promoted
    pub fn take_fresh(&mut self) -> Result<Vec<(QuerySignature, Record)>> {
        let mut promoted = Vec::new();
        for (signature, entry) in self.open_entries_mut("commit")?.iter_mut() {
            if entry.fresh {
                entry.fresh = false;
                promoted.push((signature.clone(), Record::clone(&entry.record)));
            }
        }
        Ok(promoted)
    }

    /// Hand back the full contents; the cache is unusable afterwards
    pub fn close(&mut self) -> Result<Vec<(QuerySignature, CacheEntry)>> {
        let entries = self.entries.take().ok_or(Error::InvalidState {
            session: self.session,
            operation: "close",
        })?;
        Ok(entries.into_iter().collect())
    }

    /// Number of entries (0 once closed)
    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, HashMap::len)
    }

    /// Check if there are no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if `close` has been called
    pub fn is_closed(&self) -> bool {
        self.entries.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tierstore::Value;

    fn sig(id: i64) -> QuerySignature {
        QuerySignature::new("emp", "getById", vec![Value::Int(id)])
    }

    fn rec(id: i64) -> Arc<Record> {
        Arc::new(Record::new().with("id", id))
    }

    #[test]
    fn test_lookup_returns_same_instance() {
        let mut cache = SessionCache::new(1);
        let stored = rec(1);
        cache.store(sig(1), Arc::clone(&stored), true).unwrap();

        let a = cache.lookup(&sig(1)).unwrap().unwrap();
        let b = cache.lookup(&sig(1)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &stored));
        assert!(cache.lookup(&sig(2)).unwrap().is_none());
    }

    #[test]
    fn test_invalidate_all() {
        let mut cache = SessionCache::new(1);
        cache.store(sig(1), rec(1), true).unwrap();
        cache.store(sig(2), rec(2), false).unwrap();

        cache.invalidate_all().unwrap();
        assert!(cache.is_empty());
        assert!(cache.lookup(&sig(1)).unwrap().is_none());
    }

    #[test]
    fn test_take_fresh_marks_promoted() {
        let mut cache = SessionCache::new(1);
        cache.store(sig(1), rec(1), true).unwrap();
        cache.store(sig(2), rec(2), false).unwrap();

        let promoted = cache.take_fresh().unwrap();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].0, sig(1));

        assert!(cache.take_fresh().unwrap().is_empty());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_close_returns_contents() {
        let mut cache = SessionCache::new(1);
        cache.store(sig(1), rec(1), true).unwrap();
        cache.store(sig(1), rec(1), true).unwrap();
        cache.store(sig(2), rec(2), false).unwrap();

        let mut entries = cache.close().unwrap();
        entries.sort_by_key(|(_, e)| e.record().id());
        assert_eq!(entries.len(), 2);
        assert!(entries[0].1.is_fresh());
        assert!(!entries[1].1.is_fresh());
        assert!(cache.is_closed());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let mut cache = SessionCache::new(7);
        cache.close().unwrap();

        assert!(matches!(
            cache.lookup(&sig(1)),
            Err(Error::InvalidState {
                session: 7,
                operation: "lookup"
            })
        ));
        assert!(cache.store(sig(1), rec(1), true).is_err());
        assert!(cache.invalidate_all().is_err());
        assert!(cache.take_fresh().is_err());
        assert!(cache.ensure_open("query").is_err());
        assert!(matches!(
            cache.close(),
            Err(Error::InvalidState {
                operation: "close",
                ..
            })
        ));
    }
}
