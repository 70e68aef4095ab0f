//! Field descriptors.
//!
//! A [`Field`] is a typed slot on a model. Fields are declared with the
//! constructor for their kind and refined with builder methods:
//!
//! ```rust,ignore
//! let name = Field::char().max_length(64).required();
//! let owner = Field::many2one("base.user").on_delete(OnDelete::Cascade);
//! let tags = Field::many2many("res.tag");
//! ```
//!
//! The field's name is assigned by the owning model when it is declared
//! and cannot change afterwards.

use crate::config::DEFAULT_CHAR_LENGTH;
use crate::error::{EngineError, EngineResult};
use crate::recordset::Recordset;
use crate::value::id_from_value;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Field representing a related record when none is declared.
pub const DEFAULT_REPRESENT: &str = "name";

/// Policy applied to referencing documents when their target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    /// Refuse the delete while references exist.
    #[default]
    Restrict,
    /// Delete the referencing documents too.
    Cascade,
    /// Clear the referencing field.
    SetNull,
}

/// The kind of a field, with kind-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Opaque document key.
    Identifier,
    /// Text with a maximum length; `None` means the configured default.
    Char {
        /// Maximum number of characters.
        max_length: Option<usize>,
    },
    /// 64-bit signed integer.
    Integer,
    /// Boolean flag.
    Boolean,
    /// Timestamp without time zone, stored as ISO-8601 text.
    DateTime,
    /// One of a fixed set of strings.
    Selection {
        /// Allowed values.
        choices: Vec<String>,
    },
    /// Reference to one document of another model.
    ManyToOne {
        /// Target model.
        comodel: String,
        /// Policy when the target is deleted.
        on_delete: OnDelete,
        /// Target field shown by `read`.
        represent: String,
    },
    /// Documents of another model pointing back through `inverse`.
    OneToMany {
        /// Target model.
        comodel: String,
        /// Many-to-one field on the target referencing this model.
        inverse: String,
        /// Target field shown by `read`.
        represent: String,
    },
    /// Links through a junction collection.
    ManyToMany {
        /// Target model.
        comodel: String,
        /// Junction model name; empty until the registry resolves it.
        junction: String,
        /// Junction field referencing this model.
        field_a: String,
        /// Junction field referencing the target model.
        field_b: String,
        /// Target field shown by `read`.
        represent: String,
    },
}

/// A typed, named, validated slot on a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    name: String,
    kind: FieldKind,
    required: bool,
    unique: bool,
    default: Option<Value>,
    excluded_from_read: bool,
    setter: Option<String>,
}

impl Field {
    fn of(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            kind,
            required: false,
            unique: false,
            default: None,
            excluded_from_read: false,
            setter: None,
        }
    }

    /// An identifier field.
    #[must_use]
    pub fn identifier() -> Self {
        Self::of(FieldKind::Identifier)
    }

    /// A text field with the default maximum length.
    #[must_use]
    pub fn char() -> Self {
        Self::of(FieldKind::Char { max_length: None })
    }

    /// An integer field.
    #[must_use]
    pub fn integer() -> Self {
        Self::of(FieldKind::Integer)
    }

    /// A boolean field.
    #[must_use]
    pub fn boolean() -> Self {
        Self::of(FieldKind::Boolean)
    }

    /// A timestamp field.
    #[must_use]
    pub fn datetime() -> Self {
        Self::of(FieldKind::DateTime)
    }

    /// A selection among fixed choices.
    pub fn selection<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::of(FieldKind::Selection {
            choices: choices.into_iter().map(Into::into).collect(),
        })
    }

    /// A many-to-one reference, `RESTRICT` on delete by default.
    pub fn many2one(comodel: impl Into<String>) -> Self {
        Self::of(FieldKind::ManyToOne {
            comodel: comodel.into(),
            on_delete: OnDelete::Restrict,
            represent: String::new(),
        })
    }

    /// A one-to-many relation through `inverse` on the comodel.
    pub fn one2many(comodel: impl Into<String>, inverse: impl Into<String>) -> Self {
        Self::of(FieldKind::OneToMany {
            comodel: comodel.into(),
            inverse: inverse.into(),
            represent: String::new(),
        })
    }

    /// A many-to-many relation; the junction is named by the registry
    /// unless [`Field::junction`] is used.
    pub fn many2many(comodel: impl Into<String>) -> Self {
        Self::of(FieldKind::ManyToMany {
            comodel: comodel.into(),
            junction: String::new(),
            field_a: String::new(),
            field_b: String::new(),
            represent: String::new(),
        })
    }

    /// Marks the field required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field unique (and therefore required).
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self.required = true;
        self
    }

    /// Declares a default value.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Omits the field from every `read` result.
    #[must_use]
    pub fn excluded_from_read(mut self) -> Self {
        self.excluded_from_read = true;
        self
    }

    /// Routes assigned values through the named model method.
    #[must_use]
    pub fn setter(mut self, method: impl Into<String>) -> Self {
        self.setter = Some(method.into());
        self
    }

    /// Sets the maximum length of a `Char` field.
    #[must_use]
    pub fn max_length(mut self, length: usize) -> Self {
        if let FieldKind::Char { max_length } = &mut self.kind {
            *max_length = Some(length);
        }
        self
    }

    /// Sets the delete policy of a many-to-one field.
    #[must_use]
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        if let FieldKind::ManyToOne { on_delete, .. } = &mut self.kind {
            *on_delete = policy;
        }
        self
    }

    /// Sets the comodel field shown by `read` for a relational field.
    #[must_use]
    pub fn represent(mut self, field: impl Into<String>) -> Self {
        match &mut self.kind {
            FieldKind::ManyToOne { represent, .. }
            | FieldKind::OneToMany { represent, .. }
            | FieldKind::ManyToMany { represent, .. } => *represent = field.into(),
            _ => {}
        }
        self
    }

    /// Names the junction of a many-to-many field and its two columns.
    #[must_use]
    pub fn junction(
        mut self,
        name: impl Into<String>,
        this_side: impl Into<String>,
        other_side: impl Into<String>,
    ) -> Self {
        if let FieldKind::ManyToMany {
            junction,
            field_a,
            field_b,
            ..
        } = &mut self.kind
        {
            *junction = name.into();
            *field_a = this_side.into();
            *field_b = other_side.into();
        }
        self
    }

    /// Returns the field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field kind.
    #[must_use]
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns true if a value must be present.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Returns true if values must be unique across the collection.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the declared default.
    #[must_use]
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Returns true if `read` never returns this field.
    #[must_use]
    pub fn is_excluded_from_read(&self) -> bool {
        self.excluded_from_read
    }

    /// Returns the setter method name.
    #[must_use]
    pub fn setter_name(&self) -> Option<&str> {
        self.setter.as_deref()
    }

    /// Returns the related model of a relational field.
    #[must_use]
    pub fn comodel(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::ManyToOne { comodel, .. }
            | FieldKind::OneToMany { comodel, .. }
            | FieldKind::ManyToMany { comodel, .. } => Some(comodel),
            _ => None,
        }
    }

    /// Returns true for one-to-many and many-to-many fields.
    #[must_use]
    pub fn is_plural(&self) -> bool {
        matches!(
            self.kind,
            FieldKind::OneToMany { .. } | FieldKind::ManyToMany { .. }
        )
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub(crate) fn kind_mut(&mut self) -> &mut FieldKind {
        &mut self.kind
    }

    /// Validates and coerces a raw value for storage.
    ///
    /// A null value takes the declared default; a value still null on a
    /// required field is an error. A setter receives the raw value and its
    /// result is stored as is. Many-to-one targets must exist or be pending
    /// in the environment's write cache.
    ///
    /// # Errors
    ///
    /// Returns `Required`, `Validation` or `InvalidId` errors.
    pub fn validate(&self, records: &Recordset, raw: &Value) -> EngineResult<Value> {
        let model = records.model_name();
        let value = match (raw, &self.default) {
            (Value::Null, Some(default)) => default.clone(),
            _ => raw.clone(),
        };
        if value.is_null() {
            if self.required {
                return Err(EngineError::required(model, &self.name));
            }
            return Ok(Value::Null);
        }

        if let Some(setter) = &self.setter {
            let method = records.model().method(setter).ok_or_else(|| {
                EngineError::registry(format!("{model} has no method {setter}"))
            })?;
            return method(records, &value);
        }

        match &self.kind {
            FieldKind::ManyToOne { comodel, .. } => {
                let id = id_from_value(&value).map_err(|_| {
                    EngineError::validation(model, &self.name, format!("not an identifier: {value}"))
                })?;
                if !records.env().exists(comodel, id)? {
                    return Err(EngineError::validation(
                        model,
                        &self.name,
                        format!("no {comodel} record {id}"),
                    ));
                }
                Ok(id.to_value())
            }
            FieldKind::OneToMany { .. } | FieldKind::ManyToMany { .. } => Err(
                EngineError::validation(model, &self.name, "expects relational operations"),
            ),
            _ => self
                .coerce(&value)
                .map_err(|message| EngineError::validation(model, &self.name, message)),
        }
    }

    /// Coerces a non-null value of a scalar kind.
    pub(crate) fn coerce(&self, value: &Value) -> Result<Value, String> {
        match &self.kind {
            FieldKind::Identifier => id_from_value(value)
                .map(|id| id.to_value())
                .map_err(|_| format!("not an identifier: {value}")),
            FieldKind::Char { max_length } => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => return Err(format!("cannot convert {other} to text")),
                };
                let limit = max_length.unwrap_or(DEFAULT_CHAR_LENGTH);
                let length = text.chars().count();
                if length > limit {
                    return Err(format!("{length} characters exceeds the limit of {limit}"));
                }
                Ok(Value::String(text))
            }
            FieldKind::Integer => coerce_integer(value).map(Value::from),
            FieldKind::Boolean => coerce_boolean(value).map(Value::Bool),
            FieldKind::DateTime => coerce_datetime(value).map(Value::String),
            FieldKind::Selection { choices } => match value.as_str() {
                Some(s) if choices.iter().any(|c| c == s) => Ok(value.clone()),
                _ => Err(format!("{value} is not one of {choices:?}")),
            },
            FieldKind::ManyToOne { .. } | FieldKind::OneToMany { .. } | FieldKind::ManyToMany { .. } => {
                Err("relational values need a recordset".to_string())
            }
        }
    }
}

fn coerce_integer(value: &Value) -> Result<i64, String> {
    let from_float = |f: f64| -> Result<i64, String> {
        let truncated = f.trunc();
        if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
            Ok(truncated as i64)
        } else {
            Err(format!("{f} is out of integer range"))
        }
    };
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(i),
            None => from_float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Ok(i),
                Err(_) => s
                    .parse::<f64>()
                    .map_err(|_| format!("{s:?} is not a number"))
                    .and_then(from_float),
            }
        }
        other => Err(format!("cannot convert {other} to an integer")),
    }
}

fn coerce_boolean(value: &Value) -> Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f == 0.0 => Ok(false),
            Some(f) if f == 1.0 => Ok(true),
            _ => Err(format!("{n} is not a boolean")),
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(format!("{s:?} is not a boolean")),
        },
        other => Err(format!("{other} is not a boolean")),
    }
}

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn coerce_datetime(value: &Value) -> Result<String, String> {
    let text = value
        .as_str()
        .ok_or_else(|| format!("{value} is not a date"))?
        .trim();
    parse_datetime(text)
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
        .ok_or_else(|| format!("{text:?} is not an ISO-8601 date"))
}

/// Parses ISO-8601 dates and date-times, converting offsets to UTC.
pub(crate) fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Formats a timestamp the way `DateTime` fields store it.
#[must_use]
pub fn datetime_value(dt: NaiveDateTime) -> Value {
    Value::String(dt.format(DATETIME_FORMAT).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_implies_required() {
        let field = Field::char().unique();
        assert!(field.is_required());
        assert!(field.is_unique());
    }

    #[test]
    fn char_coercion() {
        let field = Field::char().max_length(3);
        assert_eq!(field.coerce(&json!("abc")), Ok(json!("abc")));
        assert_eq!(field.coerce(&json!(12)), Ok(json!("12")));
        assert!(field.coerce(&json!("abcd")).is_err());
        assert!(field.coerce(&json!(["a"])).is_err());
        assert_eq!(Field::char().max_length(2).coerce(&json!("éé")), Ok(json!("éé")));
    }

    #[test]
    fn integer_coercion() {
        let field = Field::integer();
        assert_eq!(field.coerce(&json!(7)), Ok(json!(7)));
        assert_eq!(field.coerce(&json!(-7.9)), Ok(json!(-7)));
        assert_eq!(field.coerce(&json!(" 32 ")), Ok(json!(32)));
        assert_eq!(field.coerce(&json!("3.7")), Ok(json!(3)));
        assert!(field.coerce(&json!("abc")).is_err());
        assert!(field.coerce(&json!(true)).is_err());
    }

    #[test]
    fn boolean_literals() {
        let field = Field::boolean();
        for truthy in [json!(true), json!("true"), json!("1"), json!(1), json!("TRUE")] {
            assert_eq!(field.coerce(&truthy), Ok(json!(true)), "{truthy}");
        }
        for falsy in [json!(false), json!("false"), json!("0"), json!(0)] {
            assert_eq!(field.coerce(&falsy), Ok(json!(false)), "{falsy}");
        }
        assert!(field.coerce(&json!("yes")).is_err());
        assert!(field.coerce(&json!(2)).is_err());
    }

    #[test]
    fn datetime_formats() {
        let field = Field::datetime();
        assert_eq!(field.coerce(&json!("2020-01-02")), Ok(json!("2020-01-02T00:00:00")));
        assert_eq!(
            field.coerce(&json!("2020-01-02T10:11:12")),
            Ok(json!("2020-01-02T10:11:12"))
        );
        assert_eq!(
            field.coerce(&json!("2020-01-02 10:11:12.250")),
            Ok(json!("2020-01-02T10:11:12.250"))
        );
        assert_eq!(
            field.coerce(&json!("2020-01-02T10:11:12+02:00")),
            Ok(json!("2020-01-02T08:11:12"))
        );
        assert!(field.coerce(&json!("02/01/2020")).is_err());
        assert!(field.coerce(&json!(20200102)).is_err());
    }

    #[test]
    fn selection_choices() {
        let field = Field::selection(["draft", "done"]);
        assert_eq!(field.coerce(&json!("done")), Ok(json!("done")));
        assert!(field.coerce(&json!("cancelled")).is_err());
    }

    #[test]
    fn identifier_coercion() {
        let id = docset_store::DocumentId::new();
        assert_eq!(Field::identifier().coerce(&json!(id.to_string())), Ok(id.to_value()));
        assert!(Field::identifier().coerce(&json!("x")).is_err());
    }

    #[test]
    fn builder_only_touches_matching_kinds() {
        let field = Field::integer().max_length(3).on_delete(OnDelete::Cascade);
        assert_eq!(field.kind(), &FieldKind::Integer);
        let field = Field::many2many("res.tag").junction("tags.rel", "doc_id", "tag_id");
        match field.kind() {
            FieldKind::ManyToMany { junction, field_a, field_b, .. } => {
                assert_eq!(junction, "tags.rel");
                assert_eq!(field_a, "doc_id");
                assert_eq!(field_b, "tag_id");
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(field.is_plural());
        assert_eq!(field.comodel(), Some("res.tag"));
    }
}
