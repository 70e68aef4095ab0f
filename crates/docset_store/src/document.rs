//! Documents and value comparison.

use crate::error::{StoreError, StoreResult};
use crate::id::DocumentId;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Name of the primary key field.
pub const ID_FIELD: &str = "_id";

/// Returns the identifier of a document.
///
/// # Errors
///
/// Returns `InvalidDocument` if `_id` is missing, or `InvalidId` if it
/// does not parse.
pub fn document_id(doc: &Document) -> StoreResult<DocumentId> {
    let value = doc
        .get(ID_FIELD)
        .ok_or_else(|| StoreError::invalid_document("document has no _id"))?;
    DocumentId::from_value(value)
}

/// Resolves a dotted path (`a.b.c`) inside a document.
#[must_use]
pub fn lookup_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Compares two values for equality, treating all numbers numerically.
#[must_use]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Orders two values of the same kind.
///
/// Numbers compare numerically, strings lexicographically, booleans with
/// `false < true`. Mixed kinds have no order.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
