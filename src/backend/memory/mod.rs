//! In-memory backends
//!
//! Process-local implementations of [`Persistence`](super::Persistence) and
//! [`Coordination`](super::Coordination). They back the test suite, the CLI
//! and the benches, and double as the reference semantics for conditions
//! and update operators.
//!
//! ## Data Structure Choice
//! - Tables: `BTreeMap<RowId, Record>` behind a `parking_lot::RwLock`, so
//!   scans come out in row-id order without sorting
//! - Coordination: one `Mutex<HashMap>` keyspace; every command is atomic
//!   with respect to the others, expiry is checked lazily on access
//!
//! Both have an offline switch that makes every call fail with
//! `BackendError::Unavailable`.

mod coordinator;
mod matcher;
mod store;

pub use coordinator::MemoryCoordinator;
pub use store::{MemoryCollection, MemoryDatabase};
