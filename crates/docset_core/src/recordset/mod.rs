//! Recordsets.
//!
//! A [`Recordset`] is a lazily-evaluated handle over the documents of one
//! model. It owns a filter predicate, never a list of documents: every
//! call resolves the predicate against the store again. `search` and
//! `browse` return recordsets whose predicate is `{"_id": {"$in": [...]}}`,
//! so two recordsets compare equal exactly when they resolve to the same
//! identifiers.
//!
//! # Example
//!
//! ```rust,ignore
//! let people = env.model("res.person")?;
//! let ann = people.create(json!({"name": "Ann"}))?;
//! let adults = people.search(json!({"age": {"$gte": 18}}))?;
//! adults.write(json!({"tag_ids": [["add", tag_id]]}))?;
//! for person in adults.iter()? {
//!     println!("{}", person.get_field("name")?);
//! }
//! ```

mod crud;
mod relational;

pub use relational::X2ManyOp;

use crate::base::MODEL_DATA;
use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::field::FieldKind;
use crate::model::Model;
use crate::security::{self, Operation};
use crate::value::{id_from_value, ids_from_value};
use docset_store::{DocumentId, Filter};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A query-defined set of documents of one model.
#[derive(Clone)]
pub struct Recordset {
    pub(crate) model: Arc<Model>,
    pub(crate) predicate: Value,
    pub(crate) env: Environment,
}

/// A field value of a singleton record.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// A scalar value; null when unset.
    Scalar(Value),
    /// Related records of a relational field.
    Records(Recordset),
}

impl FieldValue {
    /// Returns the scalar value, if this is one.
    #[must_use]
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::Records(_) => None,
        }
    }

    /// Returns the related records, if this is a relational value.
    #[must_use]
    pub fn as_records(&self) -> Option<&Recordset> {
        match self {
            Self::Records(r) => Some(r),
            Self::Scalar(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(Value::String(s)) => f.write_str(s),
            Self::Scalar(v) => write!(f, "{v}"),
            Self::Records(r) => write!(f, "{}{}", r.model_name(), r.predicate),
        }
    }
}

/// The result of [`Recordset::mapped`].
#[derive(Debug, Clone)]
pub enum Mapped {
    /// One value per record, in record order.
    Values(Vec<Value>),
    /// The union of related records.
    Records(Recordset),
}

impl Recordset {
    pub(crate) fn empty(model: Arc<Model>, env: Environment) -> Self {
        Self {
            model,
            predicate: Filter::ids_document(&[]),
            env,
        }
    }

    /// Returns the model.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Returns the model name.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Returns the bound environment.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Returns the filter predicate.
    #[must_use]
    pub fn predicate(&self) -> &Value {
        &self.predicate
    }

    /// Returns the same recordset bound to another environment.
    #[must_use]
    pub fn with_env(&self, env: &Environment) -> Self {
        Self {
            model: Arc::clone(&self.model),
            predicate: self.predicate.clone(),
            env: env.clone(),
        }
    }

    /// Returns the recordset of exactly these identifiers. Never touches
    /// the store.
    #[must_use]
    pub fn browse_ids(&self, ids: &[DocumentId]) -> Self {
        Self {
            model: Arc::clone(&self.model),
            predicate: Filter::ids_document(ids),
            env: self.env.clone(),
        }
    }

    /// Returns the recordset of an identifier, an identifier string or a
    /// list of either. Never touches the store.
    ///
    /// # Errors
    ///
    /// Returns `Type` for other shapes and `InvalidId` for strings that
    /// are not identifiers.
    pub fn browse(&self, ids: impl Into<Value>) -> EngineResult<Self> {
        Ok(self.browse_ids(&ids_from_value(&ids.into())?))
    }

    /// Resolves every document of the model matching `predicate` and
    /// returns them as an identifier-based recordset.
    ///
    /// The read DLS predicate of the actor is applied.
    ///
    /// # Errors
    ///
    /// Returns `Access` when the actor may not read the model and
    /// `Store` for malformed predicates.
    pub fn search(&self, predicate: Value) -> EngineResult<Self> {
        let predicate = security::restrict(&self.env, self.model_name(), Operation::Read, predicate)?;
        let ids = self.env.find_ids_raw(self.model_name(), &predicate)?;
        Ok(self.browse_ids(&ids))
    }

    /// Counts the documents the predicate matches.
    ///
    /// # Errors
    ///
    /// Returns `Access` when the actor may not read every matching
    /// document.
    pub fn count(&self) -> EngineResult<usize> {
        security::check_access(self, Operation::Read)?;
        let filter = Filter::parse(&self.predicate)?;
        Ok(self
            .env
            .store()
            .count(self.env.session(), self.model_name(), &filter)?)
    }

    /// Returns true when the predicate matches nothing.
    pub fn is_empty(&self) -> EngineResult<bool> {
        Ok(self.count()? == 0)
    }

    /// Resolves the identifiers, in store order.
    ///
    /// # Errors
    ///
    /// Returns `Access` when the actor may not read every matching
    /// document.
    pub fn ids(&self) -> EngineResult<Vec<DocumentId>> {
        security::check_access(self, Operation::Read)?;
        self.resolve_ids()
    }

    /// Resolves the identifiers without access control.
    pub(crate) fn resolve_ids(&self) -> EngineResult<Vec<DocumentId>> {
        self.env.find_ids_raw(self.model_name(), &self.predicate)
    }

    /// `ensure_one` without access control.
    pub(crate) fn resolve_one(&self) -> EngineResult<DocumentId> {
        one(self.model_name(), self.resolve_ids()?)
    }

    /// Returns the identifier of a singleton.
    ///
    /// # Errors
    ///
    /// Returns `EnsureOne` unless exactly one document matches.
    pub fn ensure_one(&self) -> EngineResult<DocumentId> {
        one(self.model_name(), self.ids()?)
    }

    /// Returns true if `id` belongs to the recordset.
    pub fn contains(&self, id: DocumentId) -> EngineResult<bool> {
        security::check_access(self, Operation::Read)?;
        let predicate = json!({ "$and": [self.predicate.clone(), Filter::ids_document(&[id])] });
        Ok(!self.env.find_ids_raw(self.model_name(), &predicate)?.is_empty())
    }

    /// Returns an iterator of singleton recordsets, one per identifier.
    pub fn iter(&self) -> EngineResult<RecordsetIter> {
        Ok(RecordsetIter {
            records: self.clone(),
            ids: self.ids()?,
            position: 0,
        })
    }

    /// Compares the resolved identifier sets of two recordsets.
    pub fn eq_records(&self, other: &Self) -> EngineResult<bool> {
        if self.model_name() != other.model_name() {
            return Ok(false);
        }
        let mine: HashSet<DocumentId> = self.ids()?.into_iter().collect();
        let theirs: HashSet<DocumentId> = other.ids()?.into_iter().collect();
        Ok(mine == theirs)
    }

    /// Narrows the recordset with an additional predicate.
    ///
    /// # Errors
    ///
    /// Returns `Store` for a malformed predicate.
    pub fn filtered(&self, predicate: Value) -> EngineResult<Self> {
        Filter::parse(&predicate)?;
        Ok(Self {
            model: Arc::clone(&self.model),
            predicate: json!({ "$and": [self.predicate.clone(), predicate] }),
            env: self.env.clone(),
        })
    }

    /// Returns the values of one field across the recordset, or the union
    /// of related records for a relational field.
    pub fn mapped(&self, field: &str) -> EngineResult<Mapped> {
        let spec = self
            .model
            .field(field)
            .ok_or_else(|| EngineError::unknown_field(self.model_name(), field))?;
        let rows = self.read(&[field])?;
        let Some(comodel) = spec.comodel() else {
            return Ok(Mapped::Values(
                rows.into_iter()
                    .map(|mut row| row.remove(field).unwrap_or(Value::Null))
                    .collect(),
            ));
        };
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for row in &rows {
            for id in related_ids(row.get(field).unwrap_or(&Value::Null)) {
                if seen.insert(id) {
                    ids.push(id);
                }
            }
        }
        Ok(Mapped::Records(self.env.model(comodel)?.browse_ids(&ids)))
    }

    /// Returns the recordset with one context key overridden.
    #[must_use]
    pub fn with_context(&self, key: &str, value: impl Into<Value>) -> Self {
        self.with_env(&self.env.with_context(key, value))
    }

    /// Returns the recordset bound to the root identity.
    #[must_use]
    pub fn sudo(&self) -> Self {
        self.with_env(&self.env.sudo())
    }

    /// Resolves an external identifier of this model.
    ///
    /// # Errors
    ///
    /// Returns `Access` when the actor may not read the record it names.
    pub fn get(&self, external_id: &str) -> EngineResult<Option<Self>> {
        security::check_model_access(&self.env, self.model_name(), Operation::Read)?;
        let rows = self.env.find_raw(
            MODEL_DATA,
            &json!({ "model": self.model_name(), "name": external_id }),
        )?;
        let Some(id) = rows.first().and_then(|row| row.get("res_id")) else {
            return Ok(None);
        };
        let record = self.browse_ids(&[id_from_value(id)?]);
        security::check_access(&record, Operation::Read)?;
        Ok(Some(record))
    }

    /// Reads one field of a singleton.
    ///
    /// # Errors
    ///
    /// Returns `EnsureOne` unless the recordset holds exactly one record,
    /// and `UnknownField` for undeclared fields.
    pub fn get_field(&self, name: &str) -> EngineResult<FieldValue> {
        self.ensure_one()?;
        let field = self
            .model
            .field(name)
            .ok_or_else(|| EngineError::unknown_field(self.model_name(), name))?;
        let mut rows = self.read(&[name])?;
        let value = rows
            .pop()
            .and_then(|mut row| row.remove(name))
            .unwrap_or(Value::Null);
        match field.kind() {
            FieldKind::ManyToOne { comodel, .. }
            | FieldKind::OneToMany { comodel, .. }
            | FieldKind::ManyToMany { comodel, .. } => Ok(FieldValue::Records(
                self.env.model(comodel)?.browse_ids(&related_ids(&value)),
            )),
            _ => Ok(FieldValue::Scalar(value)),
        }
    }

    /// Assigns one field on every record; `write({name: value})`.
    pub fn set_field(&self, name: &str, value: impl Into<Value>) -> EngineResult<()> {
        let mut values = serde_json::Map::new();
        values.insert(name.to_string(), value.into());
        self.write(Value::Object(values))
    }
}

fn one(model: &str, ids: Vec<DocumentId>) -> EngineResult<DocumentId> {
    match ids.as_slice() {
        [id] => Ok(*id),
        _ => Err(EngineError::EnsureOne {
            model: model.to_string(),
            count: ids.len(),
        }),
    }
}

/// Extracts identifiers from a read value: `[id, repr]`, a list of such
/// pairs, or null.
fn related_ids(value: &Value) -> Vec<DocumentId> {
    let pair_id = |pair: &Value| pair.get(0).and_then(|id| id_from_value(id).ok());
    match value {
        Value::Array(items) if items.iter().all(Value::is_array) => {
            items.iter().filter_map(pair_id).collect()
        }
        Value::Array(_) => pair_id(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

impl PartialEq for Recordset {
    fn eq(&self, other: &Self) -> bool {
        self.eq_records(other).unwrap_or(false)
    }
}

impl fmt::Debug for Recordset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recordset")
            .field("model", &self.model.name())
            .field("predicate", &self.predicate)
            .field("actor", &self.env.actor())
            .finish()
    }
}

/// Iterator over the singletons of a recordset.
///
/// The identifiers are resolved when the iterator is created;
/// [`RecordsetIter::rewind`] restarts from the first one.
#[derive(Debug)]
pub struct RecordsetIter {
    records: Recordset,
    ids: Vec<DocumentId>,
    position: usize,
}

impl RecordsetIter {
    /// Restarts iteration.
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Returns the number of records being iterated.
    #[must_use]
    pub fn total(&self) -> usize {
        self.ids.len()
    }
}

impl Iterator for RecordsetIter {
    type Item = Recordset;

    fn next(&mut self) -> Option<Self::Item> {
        let id = *self.ids.get(self.position)?;
        self.position += 1;
        Some(self.records.browse_ids(&[id]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ids.len() - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RecordsetIter {}
