//! Create, read, write and unlink.

use super::relational::{self, X2ManyOp};
use super::Recordset;
use crate::base::MODEL_DATA;
use crate::cache::CacheEntry;
use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::field::{Field, FieldKind, OnDelete};
use crate::model::Model;
use crate::security::{self, Operation};
use docset_store::{Document, DocumentId, Filter, ID_FIELD};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Plural field assignments to apply once the owning documents exist.
type Relational = Vec<(Field, Vec<X2ManyOp>)>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Create,
    Write,
}

impl Recordset {
    /// Creates one document from an object, or several from a list of
    /// objects, and returns the new records.
    ///
    /// Scalar and many-to-one values are validated and queued as one
    /// create per document, then flushed; plural relational operations are
    /// applied to the new records afterwards. The call is all-or-nothing.
    ///
    /// # Errors
    ///
    /// Returns `Validation`, `Required`, `UnknownField`, `Access` or
    /// `Uniqueness` errors; nothing is persisted on error.
    pub fn create(&self, values: Value) -> EngineResult<Recordset> {
        let ids = self
            .env
            .atomic(|env| self.with_env(env).create_documents(&values))?;
        Ok(self.browse_ids(&ids))
    }

    fn create_documents(&self, values: &Value) -> EngineResult<Vec<DocumentId>> {
        let rows: Vec<&Map<String, Value>> = match values {
            Value::Object(row) => vec![row],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_object().ok_or_else(|| {
                        EngineError::type_error(format!("create expects objects, got {item}"))
                    })
                })
                .collect::<EngineResult<_>>()?,
            other => {
                return Err(EngineError::type_error(format!(
                    "create expects an object or a list of objects, got {other}"
                )))
            }
        };

        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            let (scalars, relational) = self.split(row, Mode::Create)?;
            let id = self.stage_create(&scalars)?;
            created.push((id, relational));
        }
        self.env.flush()?;

        for (id, relational) in &created {
            let record = self.browse_ids(&[*id]);
            for (field, ops) in relational {
                relational::apply(&record, field, ops)?;
            }
        }
        self.env.flush()?;
        debug!(model = %self.model_name(), count = created.len(), "records created");
        Ok(created.into_iter().map(|(id, _)| id).collect())
    }

    /// Writes `values` on every record. The identifier is read-only.
    ///
    /// # Errors
    ///
    /// As [`Recordset::create`]; `Access` also when the recordset reaches
    /// documents the write DLS predicate excludes.
    pub fn write(&self, values: Value) -> EngineResult<()> {
        self.env
            .atomic(|env| self.with_env(env).write_documents(&values))
    }

    fn write_documents(&self, values: &Value) -> EngineResult<()> {
        let row = values.as_object().ok_or_else(|| {
            EngineError::type_error(format!("write expects an object, got {values}"))
        })?;
        security::check_access(self, Operation::Write)?;
        let (scalars, relational) = self.split(row, Mode::Write)?;
        let ids = self.resolve_ids()?;
        if ids.is_empty() {
            return Ok(());
        }
        let payload = self.validate_write(&scalars)?;
        if !payload.is_empty() {
            self.env
                .cache()
                .enqueue(CacheEntry::write(self.model_name(), ids.clone(), payload));
        }
        self.env.flush()?;
        for id in &ids {
            let record = self.browse_ids(&[*id]);
            for (field, ops) in &relational {
                relational::apply(&record, field, ops)?;
            }
        }
        self.env.flush()?;
        debug!(model = %self.model_name(), count = ids.len(), "records written");
        Ok(())
    }

    /// Separates plural relational values from the rest, parsing their
    /// operations. Nothing is validated against the store yet.
    fn split(&self, row: &Map<String, Value>, mode: Mode) -> EngineResult<(Document, Relational)> {
        let mut scalars = Document::new();
        let mut relational = Vec::new();
        for (name, value) in row {
            let field = self
                .model
                .field(name)
                .ok_or_else(|| EngineError::unknown_field(self.model_name(), name))?;
            if !field.is_plural() {
                scalars.insert(name.clone(), value.clone());
                continue;
            }
            let ops = X2ManyOp::parse_list(value)
                .map_err(|message| EngineError::validation(self.model_name(), name, message))?;
            if mode == Mode::Create {
                if let Some(op) = ops.iter().find(|op| !op.allowed_on_create()) {
                    return Err(EngineError::validation(
                        self.model_name(),
                        name,
                        format!("'{}' is not allowed on create", op.tag()),
                    ));
                }
            }
            relational.push((field.clone(), ops));
        }
        Ok((scalars, relational))
    }

    /// Validates a new document and queues its creation without flushing.
    ///
    /// Every declared scalar field is validated, so defaults and required
    /// checks apply to omitted fields. A supplied `_id` is kept.
    pub(crate) fn stage_create(&self, values: &Document) -> EngineResult<DocumentId> {
        security::check_model_access(&self.env, self.model_name(), Operation::Create)?;
        let model = self.model_name();
        let mut document = Document::new();
        for field in self.model.fields() {
            let name = field.name();
            if field.is_plural() {
                if values.contains_key(name) {
                    return Err(EngineError::validation(
                        model,
                        name,
                        "relational operations cannot be staged",
                    ));
                }
                continue;
            }
            if name == ID_FIELD {
                continue;
            }
            let raw = values.get(name).unwrap_or(&Value::Null);
            document.insert(name.to_string(), field.validate(self, raw)?);
        }
        if let Some(unknown) = values.keys().find(|k| !self.model.has_field(k)) {
            return Err(EngineError::unknown_field(model, unknown.as_str()));
        }

        let id = match values.get(ID_FIELD) {
            Some(raw) if !raw.is_null() => crate::value::id_from_value(raw)?,
            _ => DocumentId::new(),
        };
        document.insert(ID_FIELD.to_string(), id.to_value());
        security::check_create_candidate(&self.env, model, &document)?;
        self.env
            .cache()
            .enqueue(CacheEntry::create(model, id, document));
        Ok(id)
    }

    /// Validates changed values and queues a write of `ids` without
    /// flushing.
    ///
    /// The write ACL and DLS apply to `ids` as they would for
    /// [`Recordset::write`].
    pub(crate) fn stage_write(&self, ids: &[DocumentId], values: &Document) -> EngineResult<()> {
        security::check_access(&self.browse_ids(ids), Operation::Write)?;
        if values.keys().any(|k| self.model.field(k).is_some_and(Field::is_plural)) {
            return Err(EngineError::invalid_operation(
                "relational operations cannot be staged",
            ));
        }
        let payload = self.validate_write(values)?;
        if !payload.is_empty() && !ids.is_empty() {
            self.env
                .cache()
                .enqueue(CacheEntry::write(self.model_name(), ids.to_vec(), payload));
        }
        Ok(())
    }

    fn validate_write(&self, values: &Document) -> EngineResult<Document> {
        let model = self.model_name();
        let mut payload = Document::new();
        for (name, raw) in values {
            if name == ID_FIELD {
                return Err(EngineError::validation(model, ID_FIELD, "identifier is read-only"));
            }
            let field = self
                .model
                .field(name)
                .ok_or_else(|| EngineError::unknown_field(model, name.as_str()))?;
            payload.insert(name.clone(), field.validate(self, raw)?);
        }
        Ok(payload)
    }

    /// Reads the requested fields (every readable field when empty) of
    /// every record.
    ///
    /// Many-to-one values become `[id, represent]` or null; plural
    /// relational values become lists of `[id, represent]`. Each
    /// relational field costs one batched lookup for the whole recordset.
    /// Fields excluded from read are never returned.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared fields and `Access` when the
    /// actor may not read every record of the recordset.
    pub fn read(&self, fields: &[&str]) -> EngineResult<Vec<Document>> {
        security::check_access(self, Operation::Read)?;
        let model = self.model_name();
        let selected: Vec<&Field> = if fields.is_empty() {
            self.model.fields().iter().collect()
        } else {
            fields
                .iter()
                .map(|name| {
                    self.model
                        .field(name)
                        .ok_or_else(|| EngineError::unknown_field(model, *name))
                })
                .collect::<EngineResult<_>>()?
        };
        let selected: Vec<&Field> = selected
            .into_iter()
            .filter(|f| !f.is_excluded_from_read() && f.name() != ID_FIELD)
            .collect();

        let documents = self.env.find_raw(model, &self.predicate)?;
        let ids: Vec<DocumentId> = documents
            .iter()
            .map(docset_store::document_id)
            .collect::<Result<_, _>>()?;

        let mut columns: HashMap<&str, Vec<Value>> = HashMap::new();
        for field in &selected {
            if let Some(column) = relational_column(&self.env, field, &documents, &ids)? {
                columns.insert(field.name(), column);
            }
        }

        let mut rows = Vec::with_capacity(documents.len());
        for (i, document) in documents.iter().enumerate() {
            let mut row = Document::new();
            row.insert(ID_FIELD.to_string(), ids[i].to_value());
            for field in &selected {
                let value = match columns.get(field.name()) {
                    Some(column) => column[i].clone(),
                    None => document.get(field.name()).cloned().unwrap_or(Value::Null),
                };
                row.insert(field.name().to_string(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// Deletes every record and returns how many were deleted.
    ///
    /// Every many-to-one reference to the deleted documents is handled
    /// by its delete policy; junction rows are always deleted. External
    /// identifiers of deleted documents are purged.
    ///
    /// # Errors
    ///
    /// Returns `DeletionConstraint` when a `RESTRICT` reference exists;
    /// nothing is deleted then.
    pub fn unlink(&self) -> EngineResult<usize> {
        self.env
            .atomic(|env| self.with_env(env).unlink_documents())
    }

    fn unlink_documents(&self) -> EngineResult<usize> {
        security::check_access(self, Operation::Unlink)?;
        let ids = self.resolve_ids()?;
        if ids.is_empty() {
            return Ok(0);
        }
        let sudo = self.env.sudo();
        let mut visited = HashSet::new();
        let deleted = stage_unlink(&sudo, &self.model, ids, &mut visited)?;
        self.env.flush()?;
        debug!(model = %self.model_name(), deleted, cascaded = visited.len() - deleted, "records unlinked");
        Ok(deleted)
    }
}

/// Queues the deletion of `ids` and every side effect of it. Returns the
/// number of documents of `model` queued.
fn stage_unlink(
    env: &Environment,
    model: &Model,
    mut ids: Vec<DocumentId>,
    visited: &mut HashSet<(String, DocumentId)>,
) -> EngineResult<usize> {
    ids.retain(|id| visited.insert((model.name().to_string(), *id)));
    if ids.is_empty() {
        return Ok(0);
    }
    let registry = std::sync::Arc::clone(env.registry());
    let targets: Vec<Value> = ids.iter().map(DocumentId::to_value).collect();

    for constraint in registry.deletion_constraints(model.name()) {
        let referencing = registry.model(&constraint.model)?;
        let refs = env.find_ids_raw(
            &constraint.model,
            &json!({ constraint.field.as_str(): { "$in": targets.clone() } }),
        )?;
        if refs.is_empty() {
            continue;
        }
        let policy = if referencing.is_junction() {
            OnDelete::Cascade
        } else {
            constraint.on_delete
        };
        match policy {
            OnDelete::Restrict => {
                let blocking = refs
                    .iter()
                    .any(|r| !visited.contains(&(constraint.model.clone(), *r)));
                if blocking {
                    return Err(EngineError::DeletionConstraint {
                        model: model.name().to_string(),
                        referencing_model: constraint.model.clone(),
                        field: constraint.field.clone(),
                    });
                }
            }
            OnDelete::Cascade => {
                let cascaded = stage_unlink(env, referencing, refs, visited)?;
                debug!(model = %constraint.model, count = cascaded, "cascade delete");
            }
            OnDelete::SetNull => {
                let refs: Vec<DocumentId> = refs
                    .into_iter()
                    .filter(|r| !visited.contains(&(constraint.model.clone(), *r)))
                    .collect();
                if refs.is_empty() {
                    continue;
                }
                let mut payload = Document::new();
                payload.insert(constraint.field.clone(), Value::Null);
                env.cache()
                    .enqueue(CacheEntry::write(constraint.model.as_str(), refs, payload));
            }
        }
    }

    env.cache()
        .enqueue(CacheEntry::delete(model.name(), ids.clone()));
    let xids = env.find_ids_raw(
        MODEL_DATA,
        &json!({ "model": model.name(), "res_id": { "$in": targets } }),
    )?;
    if !xids.is_empty() {
        env.cache().enqueue(CacheEntry::delete(MODEL_DATA, xids));
    }
    Ok(ids.len())
}

/// Resolves a relational field for every document in one lookup. Returns
/// `None` for scalar fields.
fn relational_column(
    env: &Environment,
    field: &Field,
    documents: &[Document],
    ids: &[DocumentId],
) -> EngineResult<Option<Vec<Value>>> {
    let parents: Vec<Value> = ids.iter().map(DocumentId::to_value).collect();
    let column = match field.kind() {
        FieldKind::ManyToOne {
            comodel, represent, ..
        } => {
            let targets: Vec<Option<DocumentId>> = documents
                .iter()
                .map(|d| d.get(field.name()).and_then(|v| DocumentId::from_value(v).ok()))
                .collect();
            let wanted: Vec<DocumentId> = targets.iter().flatten().copied().collect();
            let labels = represent_map(env, comodel, represent, &wanted)?;
            targets
                .iter()
                .map(|target| match target.and_then(|t| labels.get(&t).map(|l| (t, l))) {
                    Some((id, label)) => json!([id.to_value(), label]),
                    None => Value::Null,
                })
                .collect()
        }
        FieldKind::OneToMany {
            comodel,
            inverse,
            represent,
        } => {
            let children = env.find_raw(comodel, &json!({ inverse.as_str(): { "$in": parents } }))?;
            let mut grouped: HashMap<DocumentId, Vec<Value>> = HashMap::new();
            for child in &children {
                let parent = child.get(inverse).and_then(|v| DocumentId::from_value(v).ok());
                if let (Some(parent), Ok(id)) = (parent, docset_store::document_id(child)) {
                    let label = child.get(represent).cloned().unwrap_or(Value::Null);
                    grouped
                        .entry(parent)
                        .or_default()
                        .push(json!([id.to_value(), label]));
                }
            }
            ids.iter()
                .map(|id| Value::Array(grouped.remove(id).unwrap_or_default()))
                .collect()
        }
        FieldKind::ManyToMany {
            comodel,
            junction,
            field_a,
            field_b,
            represent,
        } => {
            let links = env.find_raw(junction, &json!({ field_a.as_str(): { "$in": parents } }))?;
            let pairs: Vec<(DocumentId, DocumentId)> = links
                .iter()
                .filter_map(|link| {
                    let a = DocumentId::from_value(link.get(field_a)?).ok()?;
                    let b = DocumentId::from_value(link.get(field_b)?).ok()?;
                    Some((a, b))
                })
                .collect();
            let wanted: Vec<DocumentId> = pairs.iter().map(|(_, b)| *b).collect();
            let labels = represent_map(env, comodel, represent, &wanted)?;
            let mut grouped: HashMap<DocumentId, Vec<Value>> = HashMap::new();
            for (a, b) in pairs {
                if let Some(label) = labels.get(&b) {
                    grouped
                        .entry(a)
                        .or_default()
                        .push(json!([b.to_value(), label]));
                }
            }
            ids.iter()
                .map(|id| Value::Array(grouped.remove(id).unwrap_or_default()))
                .collect()
        }
        _ => return Ok(None),
    };
    Ok(Some(column))
}

/// Maps existing comodel documents to their represent value.
fn represent_map(
    env: &Environment,
    comodel: &str,
    represent: &str,
    ids: &[DocumentId],
) -> EngineResult<HashMap<DocumentId, Value>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let mut labels = HashMap::new();
    for document in env.find_raw(comodel, &Filter::ids_document(ids))? {
        let id = docset_store::document_id(&document)?;
        labels.insert(id, document.get(represent).cloned().unwrap_or(Value::Null));
    }
    Ok(labels)
}
