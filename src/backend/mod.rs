//! Backend Module
//!
//! Contracts for the two external systems a `Model` coordinates.
//!
//! ## Persistence
//! Record storage scoped to one table: create/update/remove/clear, count and
//! query by `Query` descriptor, index management.
//!
//! ## Coordination
//! Fast shared key-value store: atomic counters, TTL locks, ordered lists
//! with expiry.
//!
//! Both return [`BackendResult`]; the model decides how each failure maps
//! onto `ModelError`. `memory` holds in-process implementations of both.

pub mod memory;

use std::time::Duration;

use crate::error::BackendResult;
use crate::query::{Condition, ExecMode, IndexSpec, Query, UpdateDoc};
use crate::record::{Record, RowId};

/// Record storage for one table
pub trait Persistence: Send + Sync {
    /// Store a new record and return it as stored
    fn create(&self, record: Record) -> BackendResult<Record>;

    /// Apply `doc` to the record with `rowid`; returns the number matched
    fn update(&self, rowid: RowId, doc: &UpdateDoc) -> BackendResult<u64>;

    /// Remove every record matching all `conditions`; returns the number removed
    fn remove(&self, conditions: &[Condition]) -> BackendResult<u64>;

    /// Remove every record; returns the number removed
    fn clear(&self) -> BackendResult<u64>;

    /// Count records matching the query predicate
    fn count(&self, query: &Query) -> BackendResult<u64>;

    /// Run the query. `ExecMode::One` returns at most one record.
    fn find(&self, query: &Query, mode: ExecMode) -> BackendResult<Vec<Record>>;

    /// Declare an index from schema metadata
    fn index(&self, spec: &IndexSpec) -> BackendResult<()> {
        self.ensure_index(spec)
    }

    /// Create the index if it does not exist
    fn ensure_index(&self, spec: &IndexSpec) -> BackendResult<()>;

    /// Drop an index by name
    fn drop_index(&self, name: &str) -> BackendResult<()>;
}

/// Shared coordination store
pub trait Coordination: Send + Sync {
    /// Atomically increment the named counter and return the new value
    fn next_id(&self, counter: &str) -> BackendResult<RowId>;

    /// Set the lock if it is free. Returns whether this call took it.
    fn acquire_lock(&self, name: &str, ttl: Duration) -> BackendResult<bool>;

    /// Clear the lock
    fn release_lock(&self, name: &str) -> BackendResult<()>;

    /// Whether the lock is currently set
    fn is_lock_held(&self, name: &str) -> BackendResult<bool>;

    fn key_exists(&self, key: &str) -> BackendResult<bool>;

    fn delete_key(&self, key: &str) -> BackendResult<()>;

    /// Elements `start..=end` of the list at `key` (empty when missing)
    fn list_slice(&self, key: &str, start: usize, end: usize) -> BackendResult<Vec<String>>;

    /// Append `values` to the list at `key`, creating it if needed
    fn list_push(&self, key: &str, values: &[String]) -> BackendResult<()>;

    /// Expire `key` after `ttl`
    fn set_expiry(&self, key: &str, ttl: Duration) -> BackendResult<()>;
}
