//! Model
//!
//! The CRUD engine for one table. Coordinates the row id allocator, the
//! table lock, filter translation, the list cache and the persistence
//! backend.
//!
//! ## Write path
//! allocate id (create only) → validate → take lock → persist → release lock
//!
//! ## Read path
//! wait for writers → translate filter → (list cache) → count + list
//! concurrently → shape results
//!
//! ## Ownership
//! Operations that change the loaded record (`create`, `update`, `save`,
//! `set*`, `load`) take `&mut self`; everything else takes `&self`. Use one
//! `Model` per logical record/session and share the backends through `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::backend::{Coordination, Persistence};
use crate::cache::ListCache;
use crate::config::ModelConfig;
use crate::error::{BackendError, ModelError, Result};
use crate::lock::{CancelToken, LockCoordinator, LockGuard};
use crate::query::{translate, Condition, ExecMode, IndexSpec, ListRequest, Projection, Query, UpdateDoc};
use crate::record::{rowid_of, Record, RowId, ROWID_FIELD};
use crate::rowid::RowIdAllocator;
use crate::schema::{RelationSpec, Schema};

/// One page of a list read
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    /// Records matching the full predicate
    pub count: u64,

    /// Records on the requested page
    pub list: Vec<Record>,
}

/// Per-call read options
#[derive(Debug, Clone)]
pub struct FindOptions {
    /// When false an existing list cache entry is dropped and rebuilt
    pub allow_cache: bool,

    /// When false the read does not wait for a held table lock
    pub wait_for_lock: bool,

    /// Aborts the lock wait when cancelled
    pub cancel: Option<CancelToken>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            allow_cache: true,
            wait_for_lock: true,
            cancel: None,
        }
    }
}

impl FindOptions {
    /// Options that force the list cache entry to be rebuilt
    pub fn refresh() -> Self {
        Self {
            allow_cache: false,
            ..Self::default()
        }
    }

    pub fn cancel_with(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// What `find_one` looks for
#[derive(Debug, Clone)]
pub enum FindTarget {
    RowId(RowId),
    Filter(Record),
    Query(Query),
}

impl From<RowId> for FindTarget {
    fn from(rowid: RowId) -> Self {
        FindTarget::RowId(rowid)
    }
}

impl From<Record> for FindTarget {
    fn from(filter: Record) -> Self {
        FindTarget::Filter(filter)
    }
}

impl From<Query> for FindTarget {
    fn from(query: Query) -> Self {
        FindTarget::Query(query)
    }
}

/// Resolved pagination for one list read
struct ListPlan {
    limit: usize,
    page: usize,
    large_page: usize,
    key: Option<String>,
    query: Query,
}

/// Outcome of the cache-populating phase of `find_list`
enum Warmup {
    /// Nothing to cache; this is the answer
    Done(ListPage),

    /// These ids were cached
    Stored(Vec<RowId>),
}

/// CRUD engine for one table
pub struct Model {
    table: String,
    schema: Schema,
    projection: Projection,
    relations: Vec<(String, RelationSpec)>,
    config: ModelConfig,
    persistence: Arc<dyn Persistence>,
    allocator: RowIdAllocator,
    lock: LockCoordinator,
    cache: ListCache,
}

impl Model {
    /// Build a model over the given backends
    ///
    /// Derives the relation map from the schema and, when
    /// `config.build_indexes` is set, declares every field index.
    pub fn new(
        table: impl Into<String>,
        schema: Schema,
        persistence: Arc<dyn Persistence>,
        coordination: Arc<dyn Coordination>,
        config: ModelConfig,
    ) -> Result<Self> {
        let table = table.into();
        let prefix = config.key_prefix.clone();

        let relations: Vec<(String, RelationSpec)> = schema
            .definitions()
            .filter(|(name, _)| *name != ROWID_FIELD)
            .filter_map(|(name, def)| def.relation.clone().map(|spec| (name.to_string(), spec)))
            .collect();

        let model = Self {
            allocator: RowIdAllocator::new(
                Arc::clone(&coordination),
                format!("{}:rowid:{}", prefix, table),
            ),
            lock: LockCoordinator::new(
                Arc::clone(&coordination),
                format!("{}:lock:{}", prefix, table),
                config.lock_ttl,
            ),
            cache: ListCache::new(coordination, prefix, table.clone(), config.list_cache_ttl),
            table,
            schema,
            projection: Projection::All,
            relations,
            config,
            persistence,
        };

        if model.config.build_indexes {
            model.declare_indexes()?;
        }

        tracing::debug!(
            "Model {} ready: {} relations",
            model.table,
            model.relations.len()
        );
        Ok(model)
    }

    /// Set the projection applied to every read
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    fn declare_indexes(&self) -> Result<()> {
        for (name, def) in self.schema.definitions() {
            let Some(kind) = def.index else { continue };
            let spec = IndexSpec::new().key(name, kind);
            self.persistence.index(&spec).map_err(persistence_failure)?;
            tracing::debug!("Declared index {} on {}", spec.index_name(), self.table);
        }
        Ok(())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new record
    ///
    /// Steps:
    /// 1. Allocate a row id and merge it in
    /// 2. Load into the schema and validate
    /// 3. Take the table lock (fail fast)
    /// 4. Persist
    ///
    /// On success the model holds the new record and its id.
    pub fn create(&mut self, mut record: Record) -> Result<Record> {
        let rowid = self.allocator.next_id()?;
        if self.config.debug {
            tracing::debug!("Allocated rowid {} for {}", rowid, self.table);
        }
        record.insert(ROWID_FIELD.to_string(), Value::from(rowid));

        let mut candidate = self.schema.clone();
        candidate.reset();
        candidate.set_data(&record);
        if let Some(err) = candidate.validate() {
            return Err(ModelError::Validation(err));
        }

        let stored = {
            let _guard = self.write_lock("create")?;
            self.persistence
                .create(candidate.get_data(false))
                .map_err(persistence_failure)?
        };

        self.schema = candidate;
        tracing::debug!("Created {} rowid={}", self.table, rowid);
        Ok(stored)
    }

    /// Patch an existing record
    ///
    /// The target is the loaded record, or `patch.rowid` when nothing is
    /// loaded. `rowid` is stripped from the patch. A patch whose keys all
    /// start with `$` is sent as raw operators; otherwise it is wrapped as a
    /// field set. With `required` the merged result is validated first.
    pub fn update(&mut self, mut patch: Record, required: bool) -> Result<RowId> {
        if patch.is_empty() {
            return Err(ModelError::Validation("update patch is empty".to_string()));
        }
        let rowid = self
            .schema
            .rowid()
            .or_else(|| rowid_of(&patch))
            .ok_or_else(|| ModelError::Validation("update needs a rowid".to_string()))?;

        patch.remove(ROWID_FIELD);
        let doc = classify_patch(patch)?;

        if required {
            let mut merged = self.schema.get_data(false);
            if let UpdateDoc::Set(fields) = &doc {
                merged.extend(fields.clone());
            }
            if let Some(err) = self.schema.validate_record(&merged) {
                return Err(ModelError::Validation(err));
            }
        }

        let matched = {
            let _guard = self.write_lock("update")?;
            self.persistence
                .update(rowid, &doc)
                .map_err(persistence_failure)?
        };

        if matched == 0 {
            tracing::debug!("Update of {} rowid={} matched nothing", self.table, rowid);
        }
        if self.schema.rowid() == Some(rowid) {
            if let UpdateDoc::Set(fields) = &doc {
                self.schema.set_data(fields);
            }
        }
        Ok(rowid)
    }

    /// Persist the loaded record: update when it has an id, create otherwise
    pub fn save(&mut self) -> Result<RowId> {
        let data = self.schema.get_data(false);
        if data.is_empty() {
            return Err(ModelError::Validation("nothing to save".to_string()));
        }

        if self.schema.rowid().is_some() {
            self.update(data, false)
        } else {
            let stored = self.create(data)?;
            rowid_of(&stored)
                .or(self.schema.rowid())
                .ok_or_else(|| ModelError::Persistence("stored record has no rowid".to_string()))
        }
    }

    /// Remove records matching `filter`
    ///
    /// An empty filter, or one naming no declared field, removes nothing and
    /// returns 0 without touching the lock.
    pub fn remove(&self, filter: &Record) -> Result<u64> {
        if filter.is_empty() {
            return Ok(0);
        }
        let conditions = translate(&self.schema, filter);
        if conditions.is_empty() {
            tracing::debug!("Remove on {} has no usable conditions; skipping", self.table);
            return Ok(0);
        }

        let _guard = self.write_lock("remove")?;
        let removed = self
            .persistence
            .remove(&conditions)
            .map_err(persistence_failure)?;
        tracing::debug!("Removed {} records from {}", removed, self.table);
        Ok(removed)
    }

    /// Remove every record of the table
    pub fn clear(&self) -> Result<u64> {
        let _guard = self.write_lock("clear")?;
        let removed = self.persistence.clear().map_err(persistence_failure)?;
        tracing::info!("Cleared {} ({} records)", self.table, removed);
        Ok(removed)
    }

    fn write_lock(&self, op: &str) -> Result<LockGuard<'_>> {
        match self.lock.acquire()? {
            Some(guard) => Ok(guard),
            None => {
                tracing::warn!("{} on {} refused: table is locked", op, self.table);
                Err(ModelError::Lock(format!(
                    "table {} is locked by another writer",
                    self.table
                )))
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Build a query descriptor from a where-descriptor
    pub fn query(&self, filter: &Record) -> Query {
        Query::new(&self.table)
            .with_conditions(translate(&self.schema, filter))
            .select(self.projection.clone())
            .populate(self.relations.clone())
    }

    /// Fetch a single record
    pub fn find_one(&self, target: impl Into<FindTarget>) -> Result<Option<Record>> {
        self.find_one_with(target, &FindOptions::default())
    }

    pub fn find_one_with(
        &self,
        target: impl Into<FindTarget>,
        options: &FindOptions,
    ) -> Result<Option<Record>> {
        self.wait_for_writers(options)?;

        let query = match target.into() {
            FindTarget::RowId(rowid) => Query::new(&self.table)
                .with_conditions(vec![Condition::Eq {
                    field: ROWID_FIELD.to_string(),
                    value: Value::from(rowid),
                }])
                .select(self.projection.clone())
                .populate(self.relations.clone()),
            FindTarget::Filter(filter) => self.query(&filter),
            FindTarget::Query(query) => query
                .select(self.projection.clone())
                .populate(self.relations.clone()),
        };

        let found = self
            .persistence
            .find(&query, ExecMode::One)
            .map_err(persistence_failure)?;
        Ok(found.into_iter().next())
    }

    /// Fetch one page of records
    pub fn find_list(&self, request: &ListRequest) -> Result<ListPage> {
        self.find_list_with(request, &FindOptions::default())
    }

    /// Fetch one page of records
    ///
    /// Requests with a path go through the list cache. On a miss the read
    /// runs in two phases: the first discovers the matching ids (capped to
    /// the large-page window) and caches them, the second serves the page
    /// from the warm entry. The second phase runs at most once.
    pub fn find_list_with(&self, request: &ListRequest, options: &FindOptions) -> Result<ListPage> {
        self.wait_for_writers(options)?;
        let plan = self.plan_list(request)?;

        let Some(key) = plan.key.as_deref() else {
            return self.read_uncached(&plan);
        };

        let mut cached = self.cache.exists(key)?;
        if cached && !options.allow_cache {
            self.cache.invalidate(key)?;
            cached = false;
        }
        tracing::debug!(
            "List read on {} page={} limit={}: cache {}",
            self.table,
            plan.page,
            plan.limit,
            if cached { "hit" } else { "miss" }
        );

        if cached {
            return self.read_cached(&plan, key, None);
        }
        match self.warm_cache(&plan, key)? {
            Warmup::Done(page) => Ok(page),
            Warmup::Stored(window) => self.read_cached(&plan, key, Some(&window)),
        }
    }

    fn wait_for_writers(&self, options: &FindOptions) -> Result<()> {
        if !options.wait_for_lock {
            return Ok(());
        }
        let cancel = options.cancel.clone().unwrap_or_default();
        self.lock.wait_until_free(&self.config.read_retry, &cancel)?;
        Ok(())
    }

    fn plan_list(&self, request: &ListRequest) -> Result<ListPlan> {
        let limit = request.limit.unwrap_or(self.config.page_limit);
        if limit == 0 {
            return Err(ModelError::Validation("limit must be positive".to_string()));
        }

        // Wrap out-of-range pages back into the large-page window
        let pages = self.config.large_limit.div_ceil(limit);
        let page = match request.page.unwrap_or(1) % pages {
            0 => 1,
            p => p,
        };
        let large_page = request.large_page.unwrap_or(1).max(1);

        Ok(ListPlan {
            limit,
            page,
            large_page,
            key: self.cache.key_for(request, large_page)?,
            query: self.query(&request.filter).with_request(request.clone()),
        })
    }

    /// No cache key: let the backend apply the page window
    fn read_uncached(&self, plan: &ListPlan) -> Result<ListPage> {
        let list_query = plan
            .query
            .clone()
            .window((plan.page - 1) * plan.limit, Some(plan.limit));
        let (count, list) = self.count_and_list(&plan.query.predicate_only(), &list_query)?;
        Ok(ListPage { count, list })
    }

    /// Phase one: discover matching ids and cache the large-page window
    fn warm_cache(&self, plan: &ListPlan, key: &str) -> Result<Warmup> {
        let large_limit = self.config.large_limit;
        let id_scan = plan
            .query
            .clone()
            .select(Projection::Include(Vec::new()))
            .populate(Vec::new())
            .window(0, Some(plan.large_page.saturating_mul(large_limit)));

        let (count, rows) = self.count_and_list(&plan.query.predicate_only(), &id_scan)?;
        let mut ids: Vec<RowId> = rows.iter().filter_map(rowid_of).collect();

        if ids.len() >= large_limit {
            let start = (plan.large_page - 1)
                .saturating_mul(large_limit)
                .min(ids.len());
            let end = start.saturating_add(large_limit).min(ids.len());
            ids = ids[start..end].to_vec();
        }
        if ids.is_empty() {
            return Ok(Warmup::Done(ListPage {
                count,
                list: Vec::new(),
            }));
        }

        self.cache.store(key, &ids)?;
        Ok(Warmup::Stored(ids))
    }

    /// Phase two (or a plain cache hit): serve the page by cached id
    ///
    /// `window` is the id list phase one just cached; it is paged in memory
    /// if the entry disappeared in between.
    fn read_cached(&self, plan: &ListPlan, key: &str, window: Option<&[RowId]>) -> Result<ListPage> {
        let start = (plan.page - 1).saturating_mul(plan.limit);
        let mut ids = self.cache.slice(key, start, plan.limit)?;

        if ids.is_empty() {
            if let Some(window) = window {
                if !self.cache.exists(key)? {
                    tracing::debug!("List cache {} vanished before read; paging locally", key);
                    ids = window.iter().skip(start).take(plan.limit).copied().collect();
                }
            }
        }

        let list_query = plan.query.clone().restrict_to(ids.clone());
        let (count, list) = self.count_and_list(&plan.query.predicate_only(), &list_query)?;
        Ok(ListPage {
            count,
            list: order_by_ids(list, &ids),
        })
    }

    /// Run the count and the list query concurrently
    fn count_and_list(&self, count_query: &Query, list_query: &Query) -> Result<(u64, Vec<Record>)> {
        let persistence = &self.persistence;

        let outcome = crossbeam::thread::scope(|s| -> Result<(u64, Vec<Record>)> {
            let counter = s.spawn(|_| persistence.count(count_query));
            let list = persistence.find(list_query, ExecMode::List);
            let count = counter
                .join()
                .map_err(|_| ModelError::Persistence("count query panicked".to_string()))?;
            Ok((
                count.map_err(persistence_failure)?,
                list.map_err(persistence_failure)?,
            ))
        })
        .map_err(|_| ModelError::Persistence("query worker panicked".to_string()))?;

        outcome
    }

    // =========================================================================
    // Loaded Record
    // =========================================================================

    /// Load a stored record into the model; returns false when it is missing
    pub fn load(&mut self, rowid: RowId) -> Result<bool> {
        let Some(found) = self.find_one(rowid)? else {
            return Ok(false);
        };
        self.schema.reset();
        self.schema.set_data(&found);
        Ok(true)
    }

    pub fn set_data(&mut self, record: &Record) {
        self.schema.set_data(record);
    }

    pub fn get_data(&self, include_virtual: bool) -> Record {
        self.schema.get_data(include_virtual)
    }

    /// Read one field (value, else default, else computed)
    pub fn get(&self, field: &str) -> Option<Value> {
        let value = self.schema.value(field);
        if self.config.debug {
            tracing::debug!("get {}.{} = {:?}", self.table, field, value);
        }
        value
    }

    /// Set one declared field; returns false for unknown or virtual fields
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        if self.config.debug {
            tracing::debug!("set {}.{} = {}", self.table, field, value);
        }
        self.schema.set_value(field, value)
    }

    /// Forget the loaded record
    pub fn reset(&mut self) {
        self.schema.reset();
    }

    pub fn is_new(&self) -> bool {
        self.schema.rowid().is_none()
    }

    pub fn rowid(&self) -> Option<RowId> {
        self.schema.rowid()
    }

    // =========================================================================
    // Indexes
    // =========================================================================

    /// Create an index; an empty spec is a no-op
    pub fn create_index(&self, spec: &IndexSpec) -> Result<()> {
        if spec.is_empty() {
            return Ok(());
        }
        self.persistence
            .ensure_index(spec)
            .map_err(persistence_failure)
    }

    /// Drop an index by name; an empty name is a no-op
    pub fn remove_index(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        self.persistence.drop_index(name).map_err(persistence_failure)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Relation map derived from the schema: `(local field, spec)`
    pub fn relations(&self) -> &[(String, RelationSpec)] {
        &self.relations
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn lock(&self) -> &LockCoordinator {
        &self.lock
    }

    pub fn list_cache(&self) -> &ListCache {
        &self.cache
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn persistence_failure(err: BackendError) -> ModelError {
    ModelError::Persistence(err.to_string())
}

/// `$`-prefixed keys are operators; plain keys become a field set
fn classify_patch(patch: Record) -> Result<UpdateDoc> {
    let operators = patch.keys().filter(|k| k.starts_with('$')).count();
    match operators {
        0 if patch.is_empty() => Err(ModelError::Validation(
            "update patch only contained rowid".to_string(),
        )),
        0 => Ok(UpdateDoc::Set(patch)),
        n if n == patch.len() => Ok(UpdateDoc::Operators(patch)),
        _ => Err(ModelError::Validation(
            "update patch mixes operators and plain fields".to_string(),
        )),
    }
}

/// Reorder fetched records to follow the cached id order
fn order_by_ids(list: Vec<Record>, ids: &[RowId]) -> Vec<Record> {
    let mut by_id: HashMap<RowId, Record> = list
        .into_iter()
        .filter_map(|record| rowid_of(&record).map(|id| (id, record)))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}
