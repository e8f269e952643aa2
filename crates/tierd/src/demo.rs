//! Walkthrough of session and shared caching against a seeded store

use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context, Result};
use tiercache::{CacheConfig, CacheCoordinator};
use tierstore::{Lookup, Mutation, Persistence, QuerySignature, Record, RecordStore, Value};
use tracing::info;

fn seed(store: &RecordStore) -> Result<()> {
    store.map_statement("emp", "getEmps", Lookup::ById);
    store.map_statement("dept", "getDept", Lookup::ById);

    let rows = [
        ("emp", Record::new().with("id", 1).with("name", "Alice")),
        ("emp", Record::new().with("id", 2).with("name", "Bob")),
        ("dept", Record::new().with("id", 1).with("deptName", "Engineering")),
    ];
    for (namespace, record) in rows {
        let insert = Mutation::Insert {
            namespace: namespace.to_string(),
            record,
        };
        match store.execute(&insert) {
            Ok(_) | Err(tierstore::Error::Duplicate { .. }) => {}
            Err(e) => return Err(e).context("seeding demo data"),
        }
    }
    Ok(())
}

fn emp(id: i64) -> QuerySignature {
    QuerySignature::new("emp", "getEmps", vec![Value::Int(id)])
}

/// Two overlapping sessions each hit the store; repeats inside a session do not
fn first_level(cache: &CacheCoordinator<RecordStore>) -> Result<()> {
    let before = cache.stats().fetches();
    let mut a = cache.open_session("emp");
    let mut b = cache.open_session("emp");

    let a1 = cache.query(&mut a, &emp(1))?.context("emp 1 missing")?;
    let a2 = cache.query(&mut a, &emp(1))?.context("emp 1 missing")?;
    let b1 = cache.query(&mut b, &emp(1))?.context("emp 1 missing")?;

    info!(
        same_instance_in_session = Arc::ptr_eq(&a1, &a2),
        same_instance_across_sessions = Arc::ptr_eq(&a1, &b1),
        fetches = cache.stats().fetches() - before,
        "first-level cache: {}",
        a1
    );
    ensure!(Arc::ptr_eq(&a1, &a2), "session tier returned a new instance");
    ensure!(!Arc::ptr_eq(&a1, &b1), "sessions shared an instance");

    cache.close_session(&mut a)?;
    cache.close_session(&mut b)?;
    Ok(())
}

/// A closed session feeds the next one through the shared tier
fn second_level(cache: &CacheCoordinator<RecordStore>) -> Result<()> {
    cache.clear_namespace_cache("emp");
    let before = cache.stats().fetches();

    let mut a = cache.open_session("emp");
    let from_a = cache.query(&mut a, &emp(2))?.context("emp 2 missing")?;
    let promoted = cache.close_session(&mut a)?;

    let mut b = cache.open_session("emp");
    let from_b = cache.query(&mut b, &emp(2))?.context("emp 2 missing")?;
    cache.close_session(&mut b)?;

    let fetches = cache.stats().fetches() - before;
    info!(promoted, fetches, "second-level cache: {}", from_b);
    ensure!(fetches == 1, "expected one store fetch, saw {}", fetches);
    ensure!(*from_a == *from_b, "shared tier returned a different record");
    Ok(())
}

/// Namespaces keep their own shared caches
fn department(cache: &CacheCoordinator<RecordStore>) -> Result<()> {
    let dept = QuerySignature::new("dept", "getDept", vec![Value::Int(1)]);
    let before = cache.stats().fetches();

    for round in 0..2 {
        let mut session = cache.open_session("dept");
        let record = cache.query(&mut session, &dept)?.context("dept 1 missing")?;
        cache.close_session(&mut session)?;
        info!(round, "department cache: {}", record);
    }

    let fetches = cache.stats().fetches() - before;
    let cached = cache.shared_cache("dept").map_or(0, |shared| shared.len());
    info!(fetches, cached, "department cache done");
    ensure!(fetches == 1, "expected one store fetch, saw {}", fetches);
    Ok(())
}

pub fn run(data: &Path) -> Result<()> {
    std::fs::create_dir_all(data)?;
    let store = RecordStore::open(data)
        .with_context(|| format!("opening store at {}", data.display()))?;
    seed(&store)?;

    let cache = CacheCoordinator::new(store, CacheConfig::default());
    first_level(&cache)?;
    second_level(&cache)?;
    department(&cache)?;

    let stats = cache.stats().snapshot();
    info!(
        session_hits = stats.session_hits,
        shared_hits = stats.shared_hits,
        fetches = stats.fetches,
        promotions = stats.promotions,
        "demo finished"
    );

    cache.shutdown();
    cache.store().close()?;
    Ok(())
}
