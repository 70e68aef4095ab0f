//! Bulk import.
//!
//! [`Recordset::load`] takes a header of slash-delimited field paths and a
//! table of rows:
//!
//! ```text
//! id        name   partner_id/id   line_ids/name   line_ids/qty
//! order_1   A      partner_x       bolts           10
//!                                  nuts            20
//! order_2   B      partner_x       washers         5
//! ```
//!
//! `id` columns hold external identifiers. Rows whose own columns are blank
//! (or repeat the current record's) continue the current record, which is
//! how one order above gets two lines. Many-to-one sub-records are
//! imported first, then the record itself, then its one-to-many and
//! many-to-many sub-records.
//!
//! Nothing is written until every row has been staged. Any error discards
//! the whole batch; the errors are returned, not raised.

use crate::base::{MODEL_DATA, MODULE, MODULE_FILE, MODULE_INSTALLED};
use crate::cache::CacheOp;
use crate::environment::Environment;
use crate::error::{EngineError, EngineResult};
use crate::field::FieldKind;
use crate::model::Model;
use crate::recordset::Recordset;
use crate::value::{id_from_value, is_blank};
use docset_store::{Document, DocumentId};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use tracing::{info, warn};

/// Column naming the external identifier.
pub const XID_COLUMN: &str = "id";

/// Prefix of external identifiers generated for records imported without
/// one.
pub const GENERATED_XID_PREFIX: &str = "__import__";

/// A problem found while importing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportError {
    /// Index of the first row of the failing record; `None` for batch
    /// level failures.
    pub row: Option<usize>,
    /// Field at fault, when known.
    pub field: Option<String>,
    /// Description.
    pub message: String,
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {row}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result of [`Recordset::load`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    /// Identifiers of the top-level records, empty when anything failed.
    pub ids: Vec<DocumentId>,
    /// Errors, at most the configured cap.
    pub errors: Vec<ImportError>,
}

impl LoadOutcome {
    /// Returns true when the batch was applied.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `{"ids": [...], "errors": [...]}`.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let ids: Vec<Value> = self.ids.iter().map(DocumentId::to_value).collect();
        json!({ "ids": ids, "errors": serde_json::to_value(&self.errors).unwrap_or_default() })
    }
}

type Row<'r> = (usize, &'r [Value]);

/// Column layout of one model in the header.
#[derive(Debug, Default)]
struct Header {
    xid: Option<usize>,
    scalars: Vec<(String, usize)>,
    many2one: Vec<(String, Header)>,
    plural: Vec<(String, Header)>,
}

impl Header {
    fn parse(env: &Environment, model: &Model, paths: &[(Vec<&str>, usize)]) -> EngineResult<Self> {
        let mut header = Self::default();
        let mut names: Vec<&str> = Vec::new();
        for (path, _) in paths {
            if !names.contains(&path[0]) {
                names.push(path[0]);
            }
        }
        for name in names {
            let columns: Vec<&(Vec<&str>, usize)> = paths.iter().filter(|(p, _)| p[0] == name).collect();
            let plain: Vec<usize> = columns.iter().filter(|(p, _)| p.len() == 1).map(|(_, c)| *c).collect();
            let nested: Vec<(Vec<&str>, usize)> = columns
                .iter()
                .filter(|(p, _)| p.len() > 1)
                .map(|(p, c)| (p[1..].to_vec(), *c))
                .collect();
            let bad_header = |message: String| EngineError::invalid_operation(format!("import header: {message}"));

            if name == XID_COLUMN {
                if !nested.is_empty() || plain.len() > 1 {
                    return Err(bad_header(format!("malformed '{XID_COLUMN}' column in {}", model.name())));
                }
                header.xid = plain.first().copied();
                continue;
            }
            let field = model
                .field(name)
                .ok_or_else(|| EngineError::unknown_field(model.name(), name))?;
            if plain.len() > 1 || (!plain.is_empty() && !nested.is_empty()) {
                return Err(bad_header(format!("{}.{name} appears more than once", model.name())));
            }
            if let Some(&column) = plain.first() {
                if field.is_plural() {
                    return Err(bad_header(format!(
                        "{}.{name} needs sub-columns such as {name}/{XID_COLUMN}",
                        model.name()
                    )));
                }
                header.scalars.push((name.to_string(), column));
                continue;
            }
            let comodel = field.comodel().ok_or_else(|| {
                bad_header(format!("{}.{name} is not relational", model.name()))
            })?;
            let sub = Self::parse(env, env.registry().model(comodel)?, &nested)?;
            if field.is_plural() {
                header.plural.push((name.to_string(), sub));
            } else {
                header.many2one.push((name.to_string(), sub));
            }
        }
        Ok(header)
    }

    /// Columns describing the record itself, many-to-one sub-records
    /// included.
    fn own_columns(&self) -> Vec<usize> {
        let mut columns: Vec<usize> = self.xid.into_iter().collect();
        columns.extend(self.scalars.iter().map(|(_, c)| *c));
        for (_, sub) in &self.many2one {
            columns.extend(sub.all_columns());
        }
        columns
    }

    fn all_columns(&self) -> Vec<usize> {
        let mut columns = self.own_columns();
        for (_, sub) in &self.plural {
            columns.extend(sub.all_columns());
        }
        columns
    }
}

fn cell<'r>(row: Row<'r>, column: usize) -> &'r Value {
    row.1.get(column).unwrap_or(&Value::Null)
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// Splits rows into logical records of `header`.
fn group_rows<'r>(header: &Header, rows: &[Row<'r>]) -> Vec<Vec<Row<'r>>> {
    let own = header.own_columns();
    let all = header.all_columns();
    let mut groups: Vec<Vec<Row<'r>>> = Vec::new();
    let mut current: Option<Vec<&Value>> = None;
    for &row in rows {
        let key: Vec<&Value> = own.iter().map(|&c| cell(row, c)).collect();
        let blank = key.iter().all(|v| is_blank(v));
        let continues = blank || current.as_ref() == Some(&key);
        match groups.last_mut() {
            Some(group) if continues => group.push(row),
            _ => {
                groups.push(vec![row]);
                current = Some(key);
            }
        }
    }
    groups.retain(|group| {
        group
            .iter()
            .any(|&row| all.iter().any(|&c| !is_blank(cell(row, c))))
    });
    groups
}

/// Finds the record an external identifier names, pending ones included.
fn resolve_xid(env: &Environment, model: &str, name: &str) -> EngineResult<Option<DocumentId>> {
    let pending = env.cache().entries().iter().rev().find_map(|entry| {
        let payload = &entry.payload;
        let matches = entry.op == CacheOp::Create
            && entry.collection == MODEL_DATA
            && payload.get("model").and_then(Value::as_str) == Some(model)
            && payload.get("name").and_then(Value::as_str) == Some(name);
        if matches {
            payload.get("res_id").cloned()
        } else {
            None
        }
    });
    if let Some(id) = pending {
        return id_from_value(&id).map(Some);
    }
    let rows = env.find_raw(MODEL_DATA, &json!({ "model": model, "name": name }))?;
    rows.first()
        .and_then(|row| row.get("res_id"))
        .map(id_from_value)
        .transpose()
}

struct Importer<'e> {
    env: &'e Environment,
    errors: Vec<ImportError>,
    failures: usize,
    cap: usize,
}

impl Importer<'_> {
    fn record(&mut self, row: usize, error: &EngineError) {
        self.failures += 1;
        if self.errors.len() >= self.cap {
            return;
        }
        let field = match error {
            EngineError::Validation { field, .. }
            | EngineError::Required { field, .. }
            | EngineError::UnknownField { field, .. } => Some(field.clone()),
            _ => None,
        };
        self.errors.push(ImportError {
            row: Some(row),
            field,
            message: error.to_string(),
        });
    }

    /// Stages one logical record and its sub-records. Returns `None` when
    /// the record failed; the error is recorded.
    fn import(
        &mut self,
        records: &Recordset,
        header: &Header,
        group: &[Row<'_>],
        extra: &Document,
    ) -> EngineResult<Option<DocumentId>> {
        let first = group[0];
        let model = records.model_name();
        let xid = header
            .xid
            .map(|c| cell(first, c))
            .filter(|v| !is_blank(v))
            .map(text);
        let existing = match &xid {
            Some(name) => resolve_xid(self.env, model, name)?,
            None => None,
        };

        let mut values = extra.clone();
        for (field, column) in &header.scalars {
            let value = cell(first, *column);
            if !is_blank(value) {
                values.insert(field.clone(), value.clone());
            }
        }
        for (field, sub) in &header.many2one {
            let head = &group[..1];
            if sub.all_columns().iter().all(|&c| is_blank(cell(first, c))) {
                continue;
            }
            let comodel = records.model().field(field).and_then(|f| f.comodel()).unwrap_or_default();
            let related = self.env.model(comodel)?;
            match self.import(&related, sub, head, &Document::new())? {
                Some(id) => {
                    values.insert(field.clone(), id.to_value());
                }
                None => return Ok(None),
            }
        }

        let staged = match existing {
            Some(id) if values.is_empty() => Ok(id),
            Some(id) => records.stage_write(&[id], &values).map(|()| id),
            None => records.stage_create(&values),
        };
        let id = match staged {
            Ok(id) => id,
            Err(e @ EngineError::Store(_)) => return Err(e),
            Err(e) => {
                self.record(first.0, &e);
                return Ok(None);
            }
        };
        if existing.is_none() {
            let name = xid.unwrap_or_else(|| format!("{GENERATED_XID_PREFIX}.{id}"));
            let mut entry = Document::new();
            entry.insert("name".into(), Value::String(name));
            entry.insert("model".into(), Value::String(model.to_string()));
            entry.insert("res_id".into(), id.to_value());
            self.env.sudo().model(MODEL_DATA)?.stage_create(&entry)?;
        }

        for (field, sub) in &header.plural {
            let Some(spec) = records.model().field(field) else {
                continue;
            };
            for child in group_rows(sub, group) {
                match spec.kind() {
                    FieldKind::OneToMany {
                        comodel, inverse, ..
                    } => {
                        let related = self.env.model(comodel)?;
                        let mut link = Document::new();
                        link.insert(inverse.clone(), id.to_value());
                        self.import(&related, sub, &child, &link)?;
                    }
                    FieldKind::ManyToMany {
                        comodel,
                        junction,
                        field_a,
                        field_b,
                        ..
                    } => {
                        let related = self.env.model(comodel)?;
                        let Some(target) = self.import(&related, sub, &child, &Document::new())? else {
                            continue;
                        };
                        let linked = self.env.find_ids_raw(
                            junction,
                            &json!({ field_a.as_str(): id.to_value(), field_b.as_str(): target.to_value() }),
                        )?;
                        if linked.is_empty() {
                            let mut row = Document::new();
                            row.insert(field_a.clone(), id.to_value());
                            row.insert(field_b.clone(), target.to_value());
                            self.env.sudo().model(junction)?.stage_create(&row)?;
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(Some(id))
    }
}

impl Recordset {
    /// Imports rows of values described by `fields`.
    ///
    /// Returns the identifiers of the top-level records and the errors
    /// met. When any error occurs nothing is written.
    ///
    /// # Errors
    ///
    /// Malformed headers and store failures are returned as errors rather
    /// than collected.
    pub fn load(&self, fields: &[&str], rows: &[Vec<Value>]) -> EngineResult<LoadOutcome> {
        self.env
            .atomic(|env| self.with_env(env).load_rows(fields, rows))
    }

    fn load_rows(&self, fields: &[&str], rows: &[Vec<Value>]) -> EngineResult<LoadOutcome> {
        let paths: Vec<(Vec<&str>, usize)> = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.split('/').map(str::trim).collect(), i))
            .collect();
        let header = Header::parse(&self.env, &self.model, &paths)?;
        let rows: Vec<Row<'_>> = rows.iter().enumerate().map(|(i, r)| (i, r.as_slice())).collect();

        let mut importer = Importer {
            env: &self.env,
            errors: Vec::new(),
            failures: 0,
            cap: self.env.config().import_error_cap,
        };
        let mut ids = Vec::new();
        for group in group_rows(&header, &rows) {
            if let Some(id) = importer.import(self, &header, &group, &Document::new())? {
                ids.push(id);
            }
        }

        if importer.failures > 0 {
            self.env.cache().clear();
            warn!(model = %self.model_name(), failures = importer.failures, "import rejected");
            return Ok(LoadOutcome {
                ids: Vec::new(),
                errors: importer.errors,
            });
        }
        match self.env.flush() {
            Ok(()) => {
                info!(model = %self.model_name(), records = ids.len(), "import applied");
                Ok(LoadOutcome {
                    ids,
                    errors: Vec::new(),
                })
            }
            Err(e @ EngineError::Uniqueness { .. }) => {
                warn!(model = %self.model_name(), error = %e, "import rejected");
                Ok(LoadOutcome {
                    ids: Vec::new(),
                    errors: vec![ImportError {
                        row: None,
                        field: None,
                        message: e.to_string(),
                    }],
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Imports a module's data file once.
    ///
    /// Applied files are recorded in `base.module.file` and the module is
    /// marked installed; loading the same file again returns `None`
    /// without touching the store.
    pub fn load_data_file(
        &self,
        module: &str,
        file: &str,
        fields: &[&str],
        rows: &[Vec<Value>],
    ) -> EngineResult<Option<LoadOutcome>> {
        self.env.atomic(|env| {
            let sudo = env.sudo();
            let key = json!({ "module": module, "file": file });
            if !sudo.find_ids_raw(MODULE_FILE, &key)?.is_empty() {
                info!(module, file, "data file already applied");
                return Ok(None);
            }
            let outcome = self.with_env(env).load(fields, rows)?;
            if outcome.is_ok() {
                sudo.model(MODULE_FILE)?.create(key)?;
                let modules = sudo.model(MODULE)?;
                let installed = sudo.find_ids_raw(MODULE, &json!({ "name": module }))?;
                if installed.is_empty() {
                    modules.create(json!({ "name": module, "status": MODULE_INSTALLED }))?;
                } else {
                    modules.browse_ids(&installed).set_field("status", MODULE_INSTALLED)?;
                }
                info!(module, file, records = outcome.ids.len(), "data file applied");
            }
            Ok(Some(outcome))
        })
    }
}
