//! List Cache
//!
//! Caches the ordered row ids a list read matched, so later pages of the
//! same request are served by id instead of re-running the predicate.
//!
//! ## Key Layout
//! ```text
//! {prefix}:list:{table}:{crc32 of key material}{material length}
//! ```
//! Key material is the bincode encoding of (table, request path, filter,
//! large page). Page number and page size are not part of it: every page of
//! a request shares one cached id list.
//!
//! ## Entry Lifecycle
//! An entry is absent, or fully populated with a TTL. It is only ever
//! replaced by deleting it and pushing a new list.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::backend::Coordination;
use crate::error::{BackendError, ModelError, Result};
use crate::query::ListRequest;
use crate::record::{Record, RowId};

#[derive(Serialize)]
struct KeyMaterial<'a> {
    table: &'a str,
    path: &'a str,
    filter: &'a Record,
    large_page: usize,
}

/// Cached id lists for one table
pub struct ListCache {
    coordination: Arc<dyn Coordination>,
    prefix: String,
    table: String,
    ttl: Duration,
}

impl ListCache {
    pub fn new(
        coordination: Arc<dyn Coordination>,
        prefix: impl Into<String>,
        table: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            coordination,
            prefix: prefix.into(),
            table: table.into(),
            ttl,
        }
    }

    /// Cache key for a request, `None` when the request has no path
    pub fn key_for(&self, request: &ListRequest, large_page: usize) -> Result<Option<String>> {
        let Some(path) = request.path.as_deref() else {
            return Ok(None);
        };

        let material = bincode::serialize(&KeyMaterial {
            table: &self.table,
            path,
            filter: &request.filter,
            large_page,
        })?;
        let digest = crc32fast::hash(&material);

        Ok(Some(format!(
            "{}:list:{}:{:08x}{:x}",
            self.prefix,
            self.table,
            digest,
            material.len()
        )))
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        self.coordination.key_exists(key).map_err(cache_failure)
    }

    /// Drop an entry
    pub fn invalidate(&self, key: &str) -> Result<()> {
        tracing::debug!("Invalidating list cache {}", key);
        self.coordination.delete_key(key).map_err(cache_failure)
    }

    /// Up to `limit` cached ids starting at offset `start`
    pub fn slice(&self, key: &str, start: usize, limit: usize) -> Result<Vec<RowId>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .coordination
            .list_slice(key, start, start + limit - 1)
            .map_err(cache_failure)?;

        tracing::trace!("List cache {} slice at {}: {} ids", key, start, raw.len());

        raw.iter()
            .map(|s| {
                s.parse::<RowId>().map_err(|_| {
                    ModelError::Coordination(format!("corrupt row id {:?} in {}", s, key))
                })
            })
            .collect()
    }

    /// Replace the entry at `key` with `ids` and start its TTL
    pub fn store(&self, key: &str, ids: &[RowId]) -> Result<()> {
        let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        self.coordination.delete_key(key).map_err(cache_failure)?;
        self.coordination.list_push(key, &values).map_err(cache_failure)?;
        self.coordination.set_expiry(key, self.ttl).map_err(cache_failure)?;

        tracing::debug!("Cached {} row ids under {} for {:?}", ids.len(), key, self.ttl);
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

fn cache_failure(err: BackendError) -> ModelError {
    ModelError::Coordination(format!("list cache: {}", err))
}
