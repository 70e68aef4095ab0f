//! Unique index specifications.

use crate::document::{lookup_path, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Specification of a unique index over one or more fields.
///
/// A compound index is unique on the tuple of its fields. Documents in
/// which every indexed field is missing or null are not indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Collection the index belongs to.
    pub collection: String,
    /// Index name, unique per collection.
    pub name: String,
    /// Indexed field paths, in key order.
    pub fields: Vec<String>,
}

impl IndexSpec {
    /// Creates a unique index on a single field, named after it.
    pub fn single(collection: impl Into<String>, field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            collection: collection.into(),
            name: field.clone(),
            fields: vec![field],
        }
    }

    /// Creates a compound unique index named after its fields.
    pub fn compound<I, S>(collection: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        Self {
            collection: collection.into(),
            name: fields.join("+"),
            fields,
        }
    }

    /// Extracts the index key of a document.
    ///
    /// Returns `None` when the document is not indexed.
    #[must_use]
    pub fn key_of(&self, doc: &Document) -> Option<String> {
        let key: Vec<Value> = self
            .fields
            .iter()
            .map(|f| lookup_path(doc, f).cloned().unwrap_or(Value::Null))
            .collect();
        if key.iter().all(Value::is_null) {
            return None;
        }
        Some(Value::Array(key).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compound_name_and_key() {
        let spec = IndexSpec::compound("rel", ["a_id", "b_id"]);
        assert_eq!(spec.name, "a_id+b_id");
        let doc = json!({"a_id": "x", "b_id": "y"}).as_object().cloned().unwrap();
        assert_eq!(spec.key_of(&doc).as_deref(), Some("[\"x\",\"y\"]"));
    }

    #[test]
    fn all_null_keys_are_skipped() {
        let spec = IndexSpec::single("base.user", "email");
        let doc = json!({"name": "x"}).as_object().cloned().unwrap();
        assert_eq!(spec.key_of(&doc), None);
    }
}
