//! Schema Module
//!
//! Field definitions and the loaded field values of one model.
//!
//! ## Responsibilities
//! - Hold current value / default / validation rule per field
//! - Carry index and relation metadata read once at model construction
//! - Produce the record that gets persisted (`get_data`)
//!
//! Validation rules are caller-supplied closures; this module only runs them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{rowid_of, Record, RowId, ROWID_FIELD};

/// A validation rule: `Err(message)` rejects the value
pub type Rule = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// Computes a virtual field from the persisted fields
pub type Compute = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// How a field is indexed in the persistence backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Ordinary ascending index
    Ascending,

    /// Full-text index
    Text,
}

/// Foreign-reference metadata for relation population
///
/// For a local field `f`, rows of `from` whose `key` equals the local value
/// are attached to the result under `as_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationSpec {
    /// Field in the foreign table matched against the local value
    pub key: String,

    /// Output field the matched rows are stored under
    pub as_field: String,

    /// Foreign table
    pub from: String,
}

impl RelationSpec {
    pub fn new(key: impl Into<String>, as_field: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            as_field: as_field.into(),
            from: from.into(),
        }
    }
}

/// Definition of a single field
#[derive(Clone, Default)]
pub struct FieldDef {
    pub default: Option<Value>,
    pub rule: Option<Rule>,
    pub index: Option<IndexKind>,
    pub relation: Option<RelationSpec>,
    pub compute: Option<Compute>,
}

impl FieldDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// A virtual field, computed on read and never persisted
    pub fn computed(f: impl Fn(&Record) -> Value + Send + Sync + 'static) -> Self {
        Self {
            compute: Some(Arc::new(f)),
            ..Self::default()
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn rule(
        mut self,
        rule: impl Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.rule = Some(Arc::new(rule));
        self
    }

    pub fn index(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    pub fn relation(mut self, spec: RelationSpec) -> Self {
        self.relation = Some(spec);
        self
    }

    pub fn is_virtual(&self) -> bool {
        self.compute.is_some()
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("default", &self.default)
            .field("rule", &self.rule.is_some())
            .field("index", &self.index)
            .field("relation", &self.relation)
            .field("virtual", &self.is_virtual())
            .finish()
    }
}

/// Field set of a model plus the values currently loaded into it
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, FieldDef>,
    values: BTreeMap<String, Value>,
    rowid: Option<RowId>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field definition (builder style)
    pub fn field(mut self, name: impl Into<String>, def: FieldDef) -> Self {
        self.fields.insert(name.into(), def);
        self
    }

    /// Whether `name` is a declared field. `rowid` is always declared.
    pub fn declares(&self, name: &str) -> bool {
        name == ROWID_FIELD || self.fields.contains_key(name)
    }

    /// Iterate over field definitions in name order
    pub fn definitions(&self) -> impl Iterator<Item = (&str, &FieldDef)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Load a record. Undeclared and virtual fields are ignored.
    pub fn set_data(&mut self, record: &Record) {
        if let Some(rowid) = rowid_of(record) {
            self.rowid = Some(rowid);
        }
        for (key, value) in record {
            if let Some(def) = self.fields.get(key) {
                if !def.is_virtual() {
                    self.values.insert(key.clone(), value.clone());
                }
            }
        }
    }

    /// Set one declared field; returns false for unknown or virtual fields
    pub fn set_value(&mut self, name: &str, value: Value) -> bool {
        match self.fields.get(name) {
            Some(def) if !def.is_virtual() => {
                self.values.insert(name.to_string(), value);
                true
            }
            _ => false,
        }
    }

    /// Current value of a field, falling back to its default
    pub fn value(&self, name: &str) -> Option<Value> {
        if name == ROWID_FIELD {
            return self.rowid.map(Value::from);
        }
        let def = self.fields.get(name)?;
        if let Some(compute) = &def.compute {
            return Some(compute(&self.get_data(false)));
        }
        self.values.get(name).cloned().or_else(|| def.default.clone())
    }

    /// The loaded record: stored fields (value or default), `rowid` when set,
    /// and virtual fields when `include_virtual` is true.
    pub fn get_data(&self, include_virtual: bool) -> Record {
        let mut data = Record::new();
        if let Some(rowid) = self.rowid {
            data.insert(ROWID_FIELD.to_string(), Value::from(rowid));
        }
        for (name, def) in &self.fields {
            if def.is_virtual() {
                continue;
            }
            if let Some(value) = self.values.get(name).or(def.default.as_ref()) {
                data.insert(name.clone(), value.clone());
            }
        }
        if include_virtual {
            let base = data.clone();
            for (name, def) in &self.fields {
                if let Some(compute) = &def.compute {
                    data.insert(name.clone(), compute(&base));
                }
            }
        }
        data
    }

    /// Run every rule against the loaded data
    pub fn validate(&self) -> Option<String> {
        self.validate_record(&self.get_data(false))
    }

    /// Run every rule against an arbitrary record; absent fields are `null`
    pub fn validate_record(&self, record: &Record) -> Option<String> {
        for (name, def) in &self.fields {
            let Some(rule) = &def.rule else { continue };
            let value = record.get(name).cloned().unwrap_or(Value::Null);
            if let Err(message) = rule(&value) {
                return Some(format!("{}: {}", name, message));
            }
        }
        None
    }

    pub fn rowid(&self) -> Option<RowId> {
        self.rowid
    }

    /// Forget loaded values and identity, keep definitions
    pub fn reset(&mut self) {
        self.values.clear();
        self.rowid = None;
    }
}
