//! Record Types
//!
//! Records are JSON objects carrying a mandatory `rowid` field.

use serde_json::{Map, Value};

/// Numeric identity of a record
pub type RowId = u64;

/// A record: field name → value, plus `rowid`
pub type Record = Map<String, Value>;

/// Name of the identity field
pub const ROWID_FIELD: &str = "rowid";

/// Read the `rowid` of a record, if it has a usable one
pub fn rowid_of(record: &Record) -> Option<RowId> {
    record.get(ROWID_FIELD).and_then(rowid_from_value)
}

/// Interpret a JSON value as a row id
///
/// Accepts non-negative integers and numeric strings (ids coming back from
/// the coordination backend's lists are strings).
pub fn rowid_from_value(value: &Value) -> Option<RowId> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Build a record from `(field, value)` pairs
pub fn record<I, K>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
