//! Identifier coercion for loosely-typed input.

use crate::error::{EngineError, EngineResult};
use docset_store::{DocumentId, ID_FIELD};
use serde_json::Value;

/// Reads an identifier-like value: a string id, a one-element list
/// holding one, or an object carrying `_id`.
pub fn id_from_value(value: &Value) -> EngineResult<DocumentId> {
    match value {
        Value::String(s) => DocumentId::parse(s).map_err(|_| EngineError::InvalidId {
            value: s.clone(),
        }),
        Value::Array(items) if items.len() == 1 => id_from_value(&items[0]),
        Value::Object(map) => match map.get(ID_FIELD) {
            Some(id) => id_from_value(id),
            None => Err(EngineError::InvalidId {
                value: value.to_string(),
            }),
        },
        other => Err(EngineError::InvalidId {
            value: other.to_string(),
        }),
    }
}

/// Reads one identifier or a list of identifiers.
///
/// # Errors
///
/// Returns `Type` for shapes that are neither, and `InvalidId` for
/// strings that are not identifiers.
pub fn ids_from_value(value: &Value) -> EngineResult<Vec<DocumentId>> {
    match value {
        Value::Array(items) => items.iter().map(id_from_value).collect(),
        Value::String(_) | Value::Object(_) => Ok(vec![id_from_value(value)?]),
        other => Err(EngineError::type_error(format!(
            "expected an identifier or a list of identifiers, got {other}"
        ))),
    }
}

/// Returns true for values an import treats as an empty cell.
#[must_use]
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepted_shapes() {
        let id = DocumentId::new();
        assert_eq!(id_from_value(&id.to_value()).unwrap(), id);
        assert_eq!(id_from_value(&json!([id.to_string()])).unwrap(), id);
        assert_eq!(id_from_value(&json!({"_id": id.to_string()})).unwrap(), id);
    }

    #[test]
    fn rejected_shapes() {
        assert!(matches!(
            id_from_value(&json!("42")),
            Err(EngineError::InvalidId { .. })
        ));
        assert!(matches!(
            ids_from_value(&json!(42)),
            Err(EngineError::Type { .. })
        ));
        assert!(ids_from_value(&json!(["nope"])).is_err());
    }

    #[test]
    fn list_of_ids() {
        let ids = vec![DocumentId::new(), DocumentId::new()];
        let value = json!([ids[0].to_string(), ids[1].to_string()]);
        assert_eq!(ids_from_value(&value).unwrap(), ids);
    }

    #[test]
    fn blank_cells() {
        assert!(is_blank(&json!("")));
        assert!(is_blank(&json!("  ")));
        assert!(is_blank(&Value::Null));
        assert!(!is_blank(&json!(0)));
    }
}
