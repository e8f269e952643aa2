use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;
use tiercache::{CacheConfig, CacheCoordinator, Error};
use tierstore::{Lookup, Mutation, Persistence, QuerySignature, Record, RecordStore, Value};

/// Store wrapper that counts fetches and can be told to fail
struct Probe {
    inner: RecordStore,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl Persistence for Probe {
    fn fetch(&self, signature: &QuerySignature) -> tierstore::Result<Option<Record>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(tierstore::Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk on fire",
            )));
        }
        self.inner.fetch(signature)
    }

    fn execute(&self, mutation: &Mutation) -> tierstore::Result<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(tierstore::Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk on fire",
            )));
        }
        self.inner.execute(mutation)
    }
}

fn coordinator(config: CacheConfig) -> (TempDir, CacheCoordinator<Probe>) {
    let dir = TempDir::new().unwrap();
    let store = RecordStore::open(dir.path()).unwrap();
    store.map_statement("emp", "getById", Lookup::ById);
    store.map_statement("dept", "getDept", Lookup::ById);

    for (id, name) in [(1, "Alice"), (2, "Bob")] {
        store
            .execute(&Mutation::Insert {
                namespace: "emp".to_string(),
                record: Record::new().with("id", id).with("name", name),
            })
            .unwrap();
    }
    store
        .execute(&Mutation::Insert {
            namespace: "dept".to_string(),
            record: Record::new().with("id", 1).with("deptName", "Engineering"),
        })
        .unwrap();

    let probe = Probe {
        inner: store,
        fetches: AtomicUsize::new(0),
        failing: AtomicBool::new(false),
    };
    (dir, CacheCoordinator::new(probe, config))
}

fn emp(id: i64) -> QuerySignature {
    QuerySignature::new("emp", "getById", vec![Value::Int(id)])
}

fn fetches(c: &CacheCoordinator<Probe>) -> usize {
    c.store().fetches.load(Ordering::SeqCst)
}

#[test]
fn same_session_returns_same_instance() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let mut a = cache.open_session("emp");

    let first = cache.query(&mut a, &emp(1)).unwrap().unwrap();
    let second = cache.query(&mut a, &emp(1)).unwrap().unwrap();

    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn write_forces_refetch_in_same_session() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let mut a = cache.open_session("emp");

    let before = cache.query(&mut a, &emp(1)).unwrap().unwrap();
    cache
        .write(
            &mut a,
            &Mutation::Update {
                namespace: "emp".to_string(),
                record: Record::new().with("id", 1).with("name", "Alicia"),
            },
        )
        .unwrap();
    let after = cache.query(&mut a, &emp(1)).unwrap().unwrap();

    assert_eq!(fetches(&cache), 2);
    assert!(!Arc::ptr_eq(&before, &after));
    assert_eq!(after.get("name").and_then(Value::as_text), Some("Alicia"));
}

#[test]
fn shared_tier_filled_only_after_close() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let mut a = cache.open_session("emp");
    cache.query(&mut a, &emp(1)).unwrap();

    let shared = cache.shared_cache("emp").unwrap();
    assert!(!shared.contains(&emp(1)));

    // a concurrently open session still goes to the store
    let mut b = cache.open_session("emp");
    cache.query(&mut b, &emp(1)).unwrap();
    assert_eq!(fetches(&cache), 2);

    cache.close_session(&mut a).unwrap();
    assert!(shared.contains(&emp(1)));
}

#[test]
fn closed_session_serves_next_session() {
    let (_dir, cache) = coordinator(CacheConfig::default());

    let mut a = cache.open_session("emp");
    cache.query(&mut a, &emp(2)).unwrap();
    cache.close_session(&mut a).unwrap();

    let mut b = cache.open_session("emp");
    let rec = cache.query(&mut b, &emp(2)).unwrap().unwrap();

    assert_eq!(fetches(&cache), 1);
    assert_eq!(rec.get("name").and_then(Value::as_text), Some("Bob"));
    assert_eq!(cache.stats().shared_hits(), 1);
}

#[test]
fn misses_are_never_cached() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let mut a = cache.open_session("emp");

    assert!(cache.query(&mut a, &emp(3)).unwrap().is_none());
    assert!(cache.query(&mut a, &emp(3)).unwrap().is_none());
    assert_eq!(fetches(&cache), 2);

    cache.close_session(&mut a).unwrap();
    assert!(!cache.shared_cache("emp").unwrap().contains(&emp(3)));

    let mut b = cache.open_session("emp");
    cache
        .write(
            &mut b,
            &Mutation::Insert {
                namespace: "emp".to_string(),
                record: Record::new().with("id", 3).with("name", "Carol"),
            },
        )
        .unwrap();
    let carol = cache.query(&mut b, &emp(3)).unwrap().unwrap();
    assert_eq!(carol.id(), Some(3));
    assert_eq!(fetches(&cache), 3);
    assert_eq!(cache.stats().not_found(), 2);
}

#[test]
fn tutorial_scenario() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let expected = Record::new().with("id", 1).with("name", "Alice");

    let mut a = cache.open_session("emp");
    let first = cache.query(&mut a, &emp(1)).unwrap().unwrap();
    assert_eq!(fetches(&cache), 1);
    assert_eq!(*first, expected);

    let again = cache.query(&mut a, &emp(1)).unwrap().unwrap();
    assert_eq!(fetches(&cache), 1);
    assert!(Arc::ptr_eq(&first, &again));

    cache.close_session(&mut a).unwrap();

    let mut b = cache.open_session("emp");
    let from_b = cache.query(&mut b, &emp(1)).unwrap().unwrap();
    assert_eq!(fetches(&cache), 1);
    assert_eq!(*from_b, expected);
    assert!(!Arc::ptr_eq(&first, &from_b));
}

#[test]
fn namespaces_have_separate_shared_caches() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let dept = QuerySignature::new("dept", "getDept", vec![Value::Int(1)]);

    let mut e = cache.open_session("emp");
    cache.query(&mut e, &emp(1)).unwrap();
    cache.close_session(&mut e).unwrap();

    let mut d = cache.open_session("dept");
    cache.query(&mut d, &dept).unwrap();
    cache.close_session(&mut d).unwrap();

    assert_eq!(cache.shared_cache("emp").unwrap().len(), 1);
    assert_eq!(cache.shared_cache("dept").unwrap().len(), 1);

    cache.clear_namespace_cache("emp");
    assert_eq!(cache.shared_cache("emp").unwrap().len(), 0);
    assert_eq!(cache.shared_cache("dept").unwrap().len(), 1);

    let mut d2 = cache.open_session("dept");
    let rec = cache.query(&mut d2, &dept).unwrap().unwrap();
    assert_eq!(rec.get("deptName").and_then(Value::as_text), Some("Engineering"));
    assert_eq!(fetches(&cache), 2);
}

#[test]
fn collaborator_failures_surface_unchanged() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let mut a = cache.open_session("emp");
    cache.store().failing.store(true, Ordering::SeqCst);

    match cache.query(&mut a, &emp(1)) {
        Err(Error::Store(tierstore::Error::Io(e))) => assert_eq!(e.to_string(), "disk on fire"),
        other => panic!("unexpected result: {:?}", other.map(|r| r.is_some())),
    }
    assert!(matches!(
        cache.write(&mut a, &Mutation::Delete { namespace: "emp".to_string(), id: 1 }),
        Err(Error::Store(tierstore::Error::Io(_)))
    ));

    // nothing cached from the failed attempt; the next query retries
    cache.store().failing.store(false, Ordering::SeqCst);
    assert!(cache.query(&mut a, &emp(1)).unwrap().is_some());
    assert_eq!(fetches(&cache), 2);
}

#[test]
fn bounded_shared_tier_evicts() {
    let (_dir, cache) = coordinator(CacheConfig::default().with_shared_capacity(1));

    let mut a = cache.open_session("emp");
    cache.query(&mut a, &emp(1)).unwrap();
    cache.query(&mut a, &emp(2)).unwrap();
    assert_eq!(cache.close_session(&mut a).unwrap(), 2);

    assert_eq!(cache.shared_cache("emp").unwrap().len(), 1);
    assert_eq!(cache.stats().evictions(), 1);
}

#[test]
fn concurrent_sessions_share_the_namespace_cache() {
    let (_dir, cache) = coordinator(CacheConfig::default());
    let cache = Arc::new(cache);

    let mut warm = cache.open_session("emp");
    cache.query(&mut warm, &emp(1)).unwrap();
    cache.query(&mut warm, &emp(2)).unwrap();
    cache.close_session(&mut warm).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut s = cache.open_session("emp");
                    let rec = cache.query(&mut s, &emp(1 + (i % 2))).unwrap().unwrap();
                    assert!(rec.id().is_some());
                    cache.close_session(&mut s).unwrap();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(fetches(&cache), 2);
    assert_eq!(cache.stats().shared_hits(), 400);
}
