//! One-to-many and many-to-many assignment.
//!
//! A plural field is assigned a list of tagged operations:
//!
//! ```text
//! ["create", {values}]    create a related document and link it
//! ["write", id, {values}] write a related document
//! ["purge", id]           delete a related document (and its link)
//! ["remove", id]          drop the link only
//! ["add", id]             link an existing document
//! ["clear"]               drop every link
//! ["replace", [ids]]      clear, then add each
//! ```
//!
//! For one-to-many fields a link is the inverse many-to-one value on the
//! related document. For many-to-many fields it is a junction row; adding
//! a pair that already exists fails with a uniqueness error.

use super::Recordset;
use crate::error::{EngineError, EngineResult};
use crate::field::{Field, FieldKind};
use crate::value::id_from_value;
use docset_store::{Document, DocumentId};
use serde_json::{json, Value};

/// One relational mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum X2ManyOp {
    /// Create a related document and link it.
    Create(Document),
    /// Write values on a related document.
    Write(DocumentId, Document),
    /// Delete a related document.
    Purge(DocumentId),
    /// Unlink a related document.
    Remove(DocumentId),
    /// Link an existing document.
    Add(DocumentId),
    /// Unlink every related document.
    Clear,
    /// Make the given documents the only linked ones.
    Replace(Vec<DocumentId>),
}

impl X2ManyOp {
    /// Returns the operation tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Create(_) => "create",
            Self::Write(..) => "write",
            Self::Purge(_) => "purge",
            Self::Remove(_) => "remove",
            Self::Add(_) => "add",
            Self::Clear => "clear",
            Self::Replace(_) => "replace",
        }
    }

    /// Returns true for operations that make sense before the owning
    /// document exists.
    #[must_use]
    pub const fn allowed_on_create(&self) -> bool {
        matches!(self, Self::Create(_) | Self::Add(_) | Self::Replace(_))
    }

    /// Parses one tagged tuple.
    ///
    /// # Errors
    ///
    /// Describes unknown tags, wrong arity and wrong argument types.
    pub fn parse(value: &Value) -> Result<Self, String> {
        let items = value
            .as_array()
            .ok_or_else(|| format!("expected an operation tuple, got {value}"))?;
        let (tag, args) = match items.split_first() {
            Some((Value::String(tag), args)) => (tag.as_str(), args),
            _ => return Err(format!("operation tuple must start with a tag: {value}")),
        };
        let arity = |n: usize| {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!("'{tag}' takes {n} argument(s), got {}", args.len()))
            }
        };
        let id = |v: &Value| id_from_value(v).map_err(|_| format!("'{tag}' expects an identifier, got {v}"));
        let values = |v: &Value| {
            v.as_object()
                .cloned()
                .ok_or_else(|| format!("'{tag}' expects an object of values, got {v}"))
        };
        match tag {
            "create" => {
                arity(1)?;
                Ok(Self::Create(values(&args[0])?))
            }
            "write" => {
                arity(2)?;
                Ok(Self::Write(id(&args[0])?, values(&args[1])?))
            }
            "purge" => {
                arity(1)?;
                Ok(Self::Purge(id(&args[0])?))
            }
            "remove" => {
                arity(1)?;
                Ok(Self::Remove(id(&args[0])?))
            }
            "add" => {
                arity(1)?;
                Ok(Self::Add(id(&args[0])?))
            }
            "clear" => {
                arity(0)?;
                Ok(Self::Clear)
            }
            "replace" => {
                arity(1)?;
                let ids = args[0]
                    .as_array()
                    .ok_or_else(|| format!("'replace' expects a list of identifiers, got {}", args[0]))?;
                Ok(Self::Replace(ids.iter().map(id).collect::<Result<_, _>>()?))
            }
            other => Err(format!("unknown operation '{other}'")),
        }
    }

    /// Parses an assignment: one tuple, a list of tuples, the bare string
    /// `"clear"`, or null for no operation.
    pub fn parse_list(value: &Value) -> Result<Vec<Self>, String> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::String(s) if s == "clear" => Ok(vec![Self::Clear]),
            Value::Array(items) if items.first().is_some_and(Value::is_string) => {
                Ok(vec![Self::parse(value)?])
            }
            Value::Array(items) => items.iter().map(Self::parse).collect(),
            other => Err(format!("expected relational operations, got {other}")),
        }
    }

    /// Returns the wire form of the operation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Create(values) => json!([self.tag(), values]),
            Self::Write(id, values) => json!([self.tag(), id.to_value(), values]),
            Self::Purge(id) | Self::Remove(id) | Self::Add(id) => json!([self.tag(), id.to_value()]),
            Self::Clear => json!([self.tag()]),
            Self::Replace(ids) => {
                let ids: Vec<Value> = ids.iter().map(DocumentId::to_value).collect();
                json!([self.tag(), ids])
            }
        }
    }
}

/// Applies operations on a plural field of a singleton.
pub(crate) fn apply(record: &Recordset, field: &Field, ops: &[X2ManyOp]) -> EngineResult<()> {
    if ops.is_empty() {
        return Ok(());
    }
    let owner = record.resolve_one()?;
    match field.kind() {
        FieldKind::OneToMany {
            comodel, inverse, ..
        } => {
            let related = record.env().model(comodel)?;
            for op in ops {
                apply_one2many(&related, inverse, owner, op)?;
            }
            Ok(())
        }
        FieldKind::ManyToMany {
            comodel,
            junction,
            field_a,
            field_b,
            ..
        } => {
            let related = record.env().model(comodel)?;
            let links = record.env().sudo().model(junction)?;
            let columns = (field_a.as_str(), field_b.as_str());
            for op in ops {
                apply_many2many(&related, &links, columns, owner, op)?;
            }
            Ok(())
        }
        _ => Err(EngineError::invalid_operation(format!(
            "{}.{} is not a plural relational field",
            record.model_name(),
            field.name()
        ))),
    }
}

fn apply_one2many(
    related: &Recordset,
    inverse: &str,
    owner: DocumentId,
    op: &X2ManyOp,
) -> EngineResult<()> {
    match op {
        X2ManyOp::Create(values) => {
            let mut values = values.clone();
            values.insert(inverse.to_string(), owner.to_value());
            related.create(Value::Object(values))?;
        }
        X2ManyOp::Write(id, values) => related.browse_ids(&[*id]).write(Value::Object(values.clone()))?,
        X2ManyOp::Purge(id) => {
            related.browse_ids(&[*id]).unlink()?;
        }
        X2ManyOp::Remove(id) => related.browse_ids(&[*id]).set_field(inverse, Value::Null)?,
        X2ManyOp::Add(id) => related.browse_ids(&[*id]).set_field(inverse, owner.to_value())?,
        X2ManyOp::Clear => {
            let linked = related
                .env()
                .find_ids_raw(related.model_name(), &json!({ inverse: owner.to_value() }))?;
            if !linked.is_empty() {
                related.browse_ids(&linked).set_field(inverse, Value::Null)?;
            }
        }
        X2ManyOp::Replace(ids) => {
            apply_one2many(related, inverse, owner, &X2ManyOp::Clear)?;
            if !ids.is_empty() {
                related.browse_ids(ids).set_field(inverse, owner.to_value())?;
            }
        }
    }
    Ok(())
}

fn apply_many2many(
    related: &Recordset,
    links: &Recordset,
    (field_a, field_b): (&str, &str),
    owner: DocumentId,
    op: &X2ManyOp,
) -> EngineResult<()> {
    let link = |target: DocumentId| {
        links.create(json!({ field_a: owner.to_value(), field_b: target.to_value() }))
    };
    match op {
        X2ManyOp::Create(values) => {
            let created = related.create(Value::Object(values.clone()))?;
            link(created.resolve_one()?)?;
        }
        X2ManyOp::Write(id, values) => related.browse_ids(&[*id]).write(Value::Object(values.clone()))?,
        X2ManyOp::Purge(id) => {
            related.browse_ids(&[*id]).unlink()?;
        }
        X2ManyOp::Remove(id) => {
            let rows = links.env().find_ids_raw(
                links.model_name(),
                &json!({ field_a: owner.to_value(), field_b: id.to_value() }),
            )?;
            links.browse_ids(&rows).unlink()?;
        }
        X2ManyOp::Add(id) => {
            link(*id)?;
        }
        X2ManyOp::Clear => {
            let rows = links
                .env()
                .find_ids_raw(links.model_name(), &json!({ field_a: owner.to_value() }))?;
            links.browse_ids(&rows).unlink()?;
        }
        X2ManyOp::Replace(ids) => {
            apply_many2many(related, links, (field_a, field_b), owner, &X2ManyOp::Clear)?;
            for id in ids {
                link(*id)?;
            }
        }
    }
    Ok(())
}
