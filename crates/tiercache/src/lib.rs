//! # tiercache
//!
//! Two-level read-through cache in front of a `tierstore::Persistence` store.
//!
//! ## Architecture
//! - **Session tier**: per-session map, always on, cleared on write. Repeated
//!   hits return the same `Arc<Record>`.
//! - **Shared tier**: per-namespace bounded LRU, filled only when a session
//!   closes or commits. Lookups hand out copies.
//! - **Coordinator**: routes queries, applies writes, promotes entries.
//!
//! ```no_run
//! use tiercache::{CacheConfig, CacheCoordinator};
//! use tierstore::{Lookup, QuerySignature, RecordStore, Value};
//!
//! let store = RecordStore::open("./data")?;
//! store.map_statement("emp", "getById", Lookup::ById);
//! let cache = CacheCoordinator::new(store, CacheConfig::default());
//!
//! let mut session = cache.open_session("emp");
//! let sig = QuerySignature::new("emp", "getById", vec![Value::Int(1)]);
//! let employee = cache.query(&mut session, &sig)?;
//! cache.close_session(&mut session)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]

mod config;
mod coordinator;
mod error;
mod lru;
mod session;
mod shared;
mod stats;

pub use config::{CacheConfig, LocalCacheScope, QueryOptions, WriteOptions};
pub use coordinator::{CacheCoordinator, Session, SessionState};
pub use error::{Error, Result};
pub use session::{CacheEntry, SessionCache};
pub use shared::{MergeOutcome, SharedCache};
pub use stats::{CacheStats, StatsSnapshot};
