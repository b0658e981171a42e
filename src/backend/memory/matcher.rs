//! Condition evaluation for the in-memory store

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{BackendError, BackendResult};
use crate::query::Condition;
use crate::record::Record;

/// Whether `record` satisfies every condition
pub(super) fn matches_all(record: &Record, conditions: &[Condition]) -> BackendResult<bool> {
    for condition in conditions {
        if !matches(record, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches(record: &Record, condition: &Condition) -> BackendResult<bool> {
    let field_value = |field: &str| record.get(field).unwrap_or(&Value::Null);

    Ok(match condition {
        Condition::Eq { field, value } => values_equal(field_value(field), value),
        Condition::In { field, values } => {
            let actual = field_value(field);
            values.iter().any(|v| values_equal(actual, v))
        }
        Condition::Pattern { field, pattern } => match field_value(field) {
            Value::String(s) => s.contains(pattern.as_str()),
            _ => false,
        },
        Condition::Text { search } => text_matches(record, search),
        Condition::Raw { field, expr } => raw_matches(record.get(field), expr)?,
    })
}

/// All whitespace-separated terms occur (case-insensitively) in some string
/// value of the record
fn text_matches(record: &Record, search: &str) -> bool {
    let mut haystack = String::new();
    for value in record.values() {
        collect_text(value, &mut haystack);
    }
    let haystack = haystack.to_lowercase();

    search
        .split_whitespace()
        .all(|term| haystack.contains(&term.to_lowercase()))
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            out.push_str(s);
            out.push(' ');
        }
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        _ => {}
    }
}

fn raw_matches(actual: Option<&Value>, expr: &Value) -> BackendResult<bool> {
    let operators = match expr {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        // Not an operator document: compare the whole object
        other => return Ok(values_equal(actual.unwrap_or(&Value::Null), other)),
    };
    eval_operators(actual, operators)
}

fn eval_operators(actual: Option<&Value>, operators: &Map<String, Value>) -> BackendResult<bool> {
    let value = actual.unwrap_or(&Value::Null);

    for (op, operand) in operators {
        let ok = match op.as_str() {
            "$eq" => values_equal(value, operand),
            "$ne" => !values_equal(value, operand),
            "$gt" => compare(value, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare(value, operand) == Some(Ordering::Less),
            "$lte" => matches!(
                compare(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            "$in" => operand_list(op, operand)?.iter().any(|v| values_equal(value, v)),
            "$nin" => !operand_list(op, operand)?.iter().any(|v| values_equal(value, v)),
            "$exists" => actual.is_some() == operand.as_bool().unwrap_or(true),
            unknown => {
                return Err(BackendError::Rejected(format!(
                    "unsupported query operator {}",
                    unknown
                )))
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn operand_list<'a>(op: &str, operand: &'a Value) -> BackendResult<&'a Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| BackendError::Rejected(format!("{} expects an array", op)))
}

/// JSON equality with integer/float numbers compared by value
pub(super) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                x == y
            } else if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                x == y
            } else {
                x.as_f64() == y.as_f64()
            }
        }
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
