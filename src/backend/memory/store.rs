//! In-memory persistence
//!
//! `MemoryDatabase` owns every table; `MemoryCollection` is the
//! table-scoped `Persistence` handle a model holds. Collections of one
//! database can see each other, which is what relation population needs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::matcher::{matches_all, values_equal};
use crate::backend::Persistence;
use crate::error::{BackendError, BackendResult};
use crate::query::{Condition, ExecMode, IndexSpec, Query, UpdateDoc};
use crate::record::{rowid_of, Record, RowId, ROWID_FIELD};

/// A set of in-memory tables
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<DatabaseInner>,
}

#[derive(Default)]
struct DatabaseInner {
    /// Tables by name, created on first use
    tables: RwLock<HashMap<String, Arc<Table>>>,

    /// When set, every call fails with `Unavailable`
    offline: AtomicBool,
}

#[derive(Default)]
struct Table {
    rows: RwLock<BTreeMap<RowId, Record>>,
    indexes: RwLock<BTreeMap<String, IndexSpec>>,

    /// Number of `count` + `find` calls served
    queries: AtomicU64,

    /// Most recent query passed to `find`
    last_query: Mutex<Option<Query>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table-scoped handle, creating the table if needed
    pub fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            name: name.to_string(),
            table: self.inner.table(name),
            db: Arc::clone(&self.inner),
        }
    }

    /// Simulate the backend going away (or coming back)
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }
}

impl DatabaseInner {
    fn table(&self, name: &str) -> Arc<Table> {
        if let Some(table) = self.tables.read().get(name) {
            return Arc::clone(table);
        }
        let mut tables = self.tables.write();
        Arc::clone(tables.entry(name.to_string()).or_default())
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("memory database is offline".to_string()));
        }
        Ok(())
    }
}

/// `Persistence` over one in-memory table
#[derive(Clone)]
pub struct MemoryCollection {
    name: String,
    table: Arc<Table>,
    db: Arc<DatabaseInner>,
}

impl MemoryCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.table.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored record by id, bypassing queries
    pub fn get(&self, rowid: RowId) -> Option<Record> {
        self.table.rows.read().get(&rowid).cloned()
    }

    /// Names of declared indexes
    pub fn index_names(&self) -> Vec<String> {
        self.table.indexes.read().keys().cloned().collect()
    }

    /// Number of `count` and `find` calls served so far
    pub fn queries_served(&self) -> u64 {
        self.table.queries.load(Ordering::SeqCst)
    }

    /// The last query passed to `find`
    pub fn last_query(&self) -> Option<Query> {
        self.table.last_query.lock().clone()
    }

    /// Rows matching the query predicate and id restriction, in id order
    fn matching(&self, query: &Query) -> BackendResult<Vec<Record>> {
        let rows = self.table.rows.read();
        let mut out = Vec::new();

        for (rowid, record) in rows.iter() {
            if let Some(ids) = query.row_ids() {
                if !ids.contains(rowid) {
                    continue;
                }
            }
            if matches_all(record, query.conditions())? {
                out.push(record.clone());
            }
        }
        Ok(out)
    }

    /// Attach related rows, then apply the projection
    fn shape(&self, record: Record, query: &Query) -> Record {
        let mut populated = Vec::with_capacity(query.relations().len());
        for (local, spec) in query.relations() {
            let local_value = record.get(local).cloned().unwrap_or(Value::Null);
            let foreign = self.db.table(&spec.from);
            let related: Vec<Value> = foreign
                .rows
                .read()
                .values()
                .filter(|row| {
                    let theirs = row.get(&spec.key).unwrap_or(&Value::Null);
                    match &local_value {
                        Value::Array(items) => items.iter().any(|v| values_equal(theirs, v)),
                        v => values_equal(theirs, v),
                    }
                })
                .map(|row| Value::Object(row.clone()))
                .collect();
            populated.push((spec.as_field.clone(), Value::Array(related)));
        }

        let mut shaped = query.projection().apply(record);
        shaped.extend(populated);
        shaped
    }
}

impl Persistence for MemoryCollection {
    fn create(&self, record: Record) -> BackendResult<Record> {
        self.db.check_online()?;
        let rowid = rowid_of(&record)
            .ok_or_else(|| BackendError::Rejected("record has no rowid".to_string()))?;

        let mut rows = self.table.rows.write();
        if rows.contains_key(&rowid) {
            return Err(BackendError::Rejected(format!("duplicate rowid {}", rowid)));
        }
        rows.insert(rowid, record.clone());
        Ok(record)
    }

    fn update(&self, rowid: RowId, doc: &UpdateDoc) -> BackendResult<u64> {
        self.db.check_online()?;
        let mut rows = self.table.rows.write();
        let Some(row) = rows.get_mut(&rowid) else {
            return Ok(0);
        };

        // Work on a copy so a rejected operator leaves the row untouched
        let mut updated = row.clone();
        match doc {
            UpdateDoc::Set(fields) => apply_set(&mut updated, fields),
            UpdateDoc::Operators(ops) => {
                for (op, body) in ops {
                    let body = body.as_object().ok_or_else(|| {
                        BackendError::Rejected(format!("{} expects an object", op))
                    })?;
                    match op.as_str() {
                        "$set" => apply_set(&mut updated, body),
                        "$unset" => {
                            for key in body.keys().filter(|k| *k != ROWID_FIELD) {
                                updated.remove(key);
                            }
                        }
                        "$inc" => apply_inc(&mut updated, body)?,
                        unknown => {
                            return Err(BackendError::Rejected(format!(
                                "unsupported update operator {}",
                                unknown
                            )))
                        }
                    }
                }
            }
        }
        *row = updated;
        Ok(1)
    }

    fn remove(&self, conditions: &[Condition]) -> BackendResult<u64> {
        self.db.check_online()?;
        let mut rows = self.table.rows.write();

        let mut doomed = Vec::new();
        for (rowid, record) in rows.iter() {
            if matches_all(record, conditions)? {
                doomed.push(*rowid);
            }
        }
        for rowid in &doomed {
            rows.remove(rowid);
        }
        Ok(doomed.len() as u64)
    }

    fn clear(&self) -> BackendResult<u64> {
        self.db.check_online()?;
        let mut rows = self.table.rows.write();
        let removed = rows.len() as u64;
        rows.clear();
        Ok(removed)
    }

    fn count(&self, query: &Query) -> BackendResult<u64> {
        self.db.check_online()?;
        self.table.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.matching(query)?.len() as u64)
    }

    fn find(&self, query: &Query, mode: ExecMode) -> BackendResult<Vec<Record>> {
        self.db.check_online()?;
        self.table.queries.fetch_add(1, Ordering::SeqCst);
        *self.table.last_query.lock() = Some(query.clone());

        let take = match mode {
            ExecMode::One => 1,
            ExecMode::List => query.limit().unwrap_or(usize::MAX),
        };

        Ok(self
            .matching(query)?
            .into_iter()
            .skip(query.skip())
            .take(take)
            .map(|record| self.shape(record, query))
            .collect())
    }

    fn ensure_index(&self, spec: &IndexSpec) -> BackendResult<()> {
        self.db.check_online()?;
        if spec.is_empty() {
            return Err(BackendError::Rejected("index spec has no keys".to_string()));
        }
        self.table
            .indexes
            .write()
            .entry(spec.index_name())
            .or_insert_with(|| spec.clone());
        Ok(())
    }

    fn drop_index(&self, name: &str) -> BackendResult<()> {
        self.db.check_online()?;
        match self.table.indexes.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(BackendError::Rejected(format!("index not found: {}", name))),
        }
    }
}

// =============================================================================
// Update Helpers
// =============================================================================

fn apply_set(row: &mut Record, fields: &Record) {
    for (key, value) in fields {
        if key != ROWID_FIELD {
            row.insert(key.clone(), value.clone());
        }
    }
}

fn apply_inc(row: &mut Record, deltas: &Record) -> BackendResult<()> {
    for (key, delta) in deltas {
        if key == ROWID_FIELD {
            continue;
        }
        let current = row.get(key).cloned().unwrap_or(Value::from(0));
        let (Value::Number(a), Value::Number(b)) = (&current, delta) else {
            return Err(BackendError::Rejected(format!("$inc on non-numeric field {}", key)));
        };
        let next = match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => match a.checked_add(b) {
                Some(sum) => Value::from(sum),
                None => {
                    return Err(BackendError::Rejected(format!("$inc overflows field {}", key)));
                }
            },
            _ => Value::from(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)),
        };
        row.insert(key.clone(), next);
    }
    Ok(())
}
