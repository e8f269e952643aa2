//! # tierstore
//!
//! Persistence layer behind `tiercache`: a small embedded record store using
//! the TOON (Token-Oriented Object Notation) line format.
//!
//! ## Model
//! - Records grouped by namespace, keyed by an integer `id` field
//! - Append-only data file; updates supersede, deletes write tombstones
//! - Queries go through statements mapped per namespace (`Lookup`)
//! - 1 MB max row, 1 GB max DB size

#![warn(missing_docs)]

mod error;
mod parser;
mod record;
mod storage;

use std::sync::Arc;

pub use error::{Error, Result};
pub use parser::{format_row, parse_row, validate_identifier, Row};
pub use record::{Mutation, QuerySignature, Record, Value};
pub use storage::{Lookup, RecordStore};

/// Backing store the cache reads through
///
/// A miss is `Ok(None)`, never an error. Any `Err` is a collaborator
/// failure and is surfaced to the caller unchanged.
pub trait Persistence: Send + Sync {
    /// Execute a keyed query
    fn fetch(&self, signature: &QuerySignature) -> Result<Option<Record>>;

    /// Apply a mutation, returning the number of rows affected
    fn execute(&self, mutation: &Mutation) -> Result<u64>;
}

impl<P: Persistence + ?Sized> Persistence for Arc<P> {
    fn fetch(&self, signature: &QuerySignature) -> Result<Option<Record>> {
        (**self).fetch(signature)
    }

    fn execute(&self, mutation: &Mutation) -> Result<u64> {
        (**self).execute(mutation)
    }
}
