//! Row id allocation
//!
//! Ids come from one atomic counter per table in the coordination backend,
//! so every process sharing that backend draws from the same sequence.

use std::sync::Arc;

use crate::backend::Coordination;
use crate::error::{ModelError, Result};
use crate::record::RowId;

/// Issues distinct, increasing row ids for one table
pub struct RowIdAllocator {
    coordination: Arc<dyn Coordination>,

    /// Counter key, e.g. `recordgate:rowid:users`
    counter: String,
}

impl RowIdAllocator {
    pub fn new(coordination: Arc<dyn Coordination>, counter: impl Into<String>) -> Self {
        Self {
            coordination,
            counter: counter.into(),
        }
    }

    /// Allocate the next id
    ///
    /// Any backend failure is an `Allocation` error; callers must not write
    /// anything without an id.
    pub fn next_id(&self) -> Result<RowId> {
        self.coordination
            .next_id(&self.counter)
            .map_err(|e| ModelError::Allocation(e.to_string()))
    }
}
