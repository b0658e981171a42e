//! # recordgate
//!
//! A lock-guarded CRUD coordinator for record stores with:
//! - Atomic row id allocation
//! - Table-scoped write locking (fail fast) with lock-aware reads
//! - Filter translation from where-descriptors to backend conditions
//! - Cached, paginated list reads with large-page capping
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application Code                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Model                                │
//! │        (create / update / save / remove / find_*)           │
//! └──┬──────────────┬──────────────┬──────────────┬─────────────┘
//!    │              │              │              │
//!    ▼              ▼              ▼              ▼
//! ┌────────┐  ┌────────────┐  ┌──────────┐  ┌────────────┐
//! │ RowId  │  │   Table    │  │  Filter  │  │ List Cache │
//! │ Alloc  │  │   Lock     │  │Translate │  │  (TTL ids) │
//! └───┬────┘  └─────┬──────┘  └────┬─────┘  └─────┬──────┘
//!     │             │              │              │
//!     ▼             ▼              ▼              ▼
//! ┌──────────────────────────┐  ┌──────────────────────────┐
//! │   Coordination backend   │  │   Persistence backend    │
//! │ (counters, locks, lists) │  │  (records, count, query) │
//! └──────────────────────────┘  └──────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod record;
pub mod schema;

pub mod backend;
pub mod query;
pub mod rowid;
pub mod lock;
pub mod cache;
pub mod model;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BackendError, BackendResult, ModelError, Result};
pub use config::{ModelConfig, ReadRetry};
pub use record::{Record, RowId};
pub use schema::{FieldDef, IndexKind, RelationSpec, Schema};
pub use query::{Condition, IndexSpec, ListRequest, Projection, Query};
pub use lock::CancelToken;
pub use model::{FindOptions, FindTarget, ListPage, Model};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of recordgate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
