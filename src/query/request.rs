//! List request parameters

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;

/// Caller-facing parameters of a `find_list` read
///
/// `path` identifies the originating request (e.g. a route). Only requests
/// with a path take part in list caching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListRequest {
    pub path: Option<String>,
    pub filter: Record,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    pub large_page: Option<usize>,
}

impl ListRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn filter(mut self, filter: Record) -> Self {
        self.filter = filter;
        self
    }

    /// Add one filter entry
    pub fn where_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter.insert(field.into(), value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: usize) -> Self {
        self.page = Some(page);
        self
    }

    pub fn large_page(mut self, large_page: usize) -> Self {
        self.large_page = Some(large_page);
        self
    }
}
