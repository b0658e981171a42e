//! Query Module
//!
//! Backend-neutral descriptions of reads and writes.
//!
//! ## Responsibilities
//! - `Condition`: one backend-native predicate
//! - `Query`: the descriptor a `Model` hands to `Persistence::count/find`
//! - `UpdateDoc`: a plain field set or a raw operator document
//! - `ListRequest`: the caller-facing parameters of a list read
//!
//! A `Query` is only ever built by the model; backends read it through
//! accessors.

mod filter;
mod request;

pub use filter::translate;
pub use request::ListRequest;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{Record, RowId, ROWID_FIELD};
use crate::schema::{IndexKind, RelationSpec};

/// A single backend-native predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// `field == value`
    Eq { field: String, value: Value },

    /// `field` is one of `values`
    In { field: String, values: Vec<Value> },

    /// Case-sensitive pattern match on `field`
    Pattern { field: String, pattern: String },

    /// Full-text search over the whole record
    Text { search: String },

    /// Operator expression handed to the backend verbatim
    Raw { field: String, expr: Value },
}

impl Condition {
    /// Field this condition is scoped to (`None` for full-text search)
    pub fn field(&self) -> Option<&str> {
        match self {
            Condition::Eq { field, .. }
            | Condition::In { field, .. }
            | Condition::Pattern { field, .. }
            | Condition::Raw { field, .. } => Some(field),
            Condition::Text { .. } => None,
        }
    }
}

/// Which fields a read returns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    /// Apply to a record. `rowid` always survives.
    pub fn apply(&self, record: Record) -> Record {
        match self {
            Projection::All => record,
            Projection::Include(fields) => record
                .into_iter()
                .filter(|(k, _)| k == ROWID_FIELD || fields.iter().any(|f| f == k))
                .collect(),
            Projection::Exclude(fields) => record
                .into_iter()
                .filter(|(k, _)| k == ROWID_FIELD || !fields.iter().any(|f| f == k))
                .collect(),
        }
    }
}

/// Result shape requested from `Persistence::find`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    One,
    List,
}

/// Body of an update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateDoc {
    /// Set these fields to these values
    Set(Record),

    /// Raw operator document (`$set`, `$inc`, ...)
    Operators(Record),
}

/// Index declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: Option<String>,
    pub keys: Vec<(String, IndexKind)>,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, field: impl Into<String>, kind: IndexKind) -> Self {
        self.keys.push((field.into(), kind));
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Explicit name, or `field_1` / `field_text` segments joined by `_`
    pub fn index_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|(field, kind)| match kind {
                IndexKind::Ascending => format!("{}_1", field),
                IndexKind::Text => format!("{}_text", field),
            })
            .collect::<Vec<_>>()
            .join("_")
    }
}

/// Read descriptor handed to the persistence backend
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    conditions: Vec<Condition>,
    projection: Projection,
    populate: Vec<(String, RelationSpec)>,
    row_ids: Option<Vec<RowId>>,
    skip: usize,
    limit: Option<usize>,
    request: Option<ListRequest>,
}

impl Query {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            conditions: Vec::new(),
            projection: Projection::All,
            populate: Vec::new(),
            row_ids: None,
            skip: 0,
            limit: None,
            request: None,
        }
    }

    pub(crate) fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub(crate) fn select(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub(crate) fn populate(mut self, relations: Vec<(String, RelationSpec)>) -> Self {
        self.populate = relations;
        self
    }

    pub(crate) fn restrict_to(mut self, ids: Vec<RowId>) -> Self {
        self.row_ids = Some(ids);
        self
    }

    pub(crate) fn window(mut self, skip: usize, limit: Option<usize>) -> Self {
        self.skip = skip;
        self.limit = limit;
        self
    }

    pub(crate) fn with_request(mut self, request: ListRequest) -> Self {
        self.request = Some(request);
        self
    }

    /// Same predicate, no id restriction and no window: what `count` sees
    pub(crate) fn predicate_only(&self) -> Self {
        Self {
            row_ids: None,
            skip: 0,
            limit: None,
            ..self.clone()
        }
    }

    // =========================================================================
    // Accessors (for backends)
    // =========================================================================

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Relations to populate: `(local field, spec)`
    pub fn relations(&self) -> &[(String, RelationSpec)] {
        &self.populate
    }

    /// When set, only rows with these ids match
    pub fn row_ids(&self) -> Option<&[RowId]> {
        self.row_ids.as_deref()
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// The list request this query was derived from, if any
    pub fn request(&self) -> Option<&ListRequest> {
        self.request.as_ref()
    }
}
