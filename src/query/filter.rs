//! Filter translation
//!
//! Turns a where-descriptor (field → value or operator object) into
//! backend conditions:
//!
//! | descriptor value            | condition          |
//! |-----------------------------|--------------------|
//! | array                       | `In`               |
//! | `{ "like" / "pattern": p }` | `Pattern` on field |
//! | `{ "search": s }`           | `Text` (record)    |
//! | any other object            | `Raw` passthrough  |
//! | scalar                      | `Eq`               |
//!
//! Fields the schema does not declare are dropped without error.

use serde_json::Value;

use super::Condition;
use crate::record::Record;
use crate::schema::Schema;

const PATTERN_KEYS: [&str; 2] = ["like", "pattern"];
const SEARCH_KEY: &str = "search";

/// Translate a where-descriptor against a schema
pub fn translate(schema: &Schema, filter: &Record) -> Vec<Condition> {
    let mut conditions = Vec::with_capacity(filter.len());

    for (field, value) in filter {
        if !schema.declares(field) {
            tracing::trace!("Dropping undeclared filter field {}", field);
            continue;
        }
        conditions.push(translate_field(field, value));
    }

    conditions
}

fn translate_field(field: &str, value: &Value) -> Condition {
    match value {
        Value::Array(values) => Condition::In {
            field: field.to_string(),
            values: values.clone(),
        },
        Value::Object(map) => {
            if let Some(pattern) = PATTERN_KEYS.iter().find_map(|k| map.get(*k)) {
                Condition::Pattern {
                    field: field.to_string(),
                    pattern: as_text(pattern),
                }
            } else if let Some(search) = map.get(SEARCH_KEY) {
                Condition::Text {
                    search: as_text(search),
                }
            } else {
                Condition::Raw {
                    field: field.to_string(),
                    expr: value.clone(),
                }
            }
        }
        scalar => Condition::Eq {
            field: field.to_string(),
            value: scalar.clone(),
        },
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
