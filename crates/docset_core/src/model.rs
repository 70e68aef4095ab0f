//! Model declarations.

use crate::error::EngineResult;
use crate::field::{Field, FieldKind};
use crate::recordset::Recordset;
use docset_store::ID_FIELD;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A model method usable as a field setter.
///
/// It receives the recordset being written and the raw value, and
/// returns the value to store.
pub type SetterFn = Arc<dyn Fn(&Recordset, &Value) -> EngineResult<Value> + Send + Sync>;

/// A named document shape.
///
/// Models are declared with [`Model::builder`] and become usable once
/// registered in a [`Registry`](crate::Registry).
#[derive(Clone)]
pub struct Model {
    name: String,
    fields: Vec<Field>,
    positions: HashMap<String, usize>,
    unique_together: Vec<Vec<String>>,
    junction: bool,
    methods: HashMap<String, SetterFn>,
}

impl Model {
    /// Starts declaring a model.
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    /// Returns the model name, also used as the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fields in declaration order, `_id` first.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.positions.get(name).map(|&i| &self.fields[i])
    }

    /// Returns true if the model declares the field.
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Returns compound uniqueness constraints.
    #[must_use]
    pub fn unique_together(&self) -> &[Vec<String>] {
        &self.unique_together
    }

    /// Returns true for junction models synthesized for many-to-many
    /// relations.
    #[must_use]
    pub fn is_junction(&self) -> bool {
        self.junction
    }

    /// Looks up a model method.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&SetterFn> {
        self.methods.get(name)
    }

    pub(crate) fn fields_mut(&mut self) -> impl Iterator<Item = &mut Field> {
        self.fields.iter_mut()
    }

    /// Declares the junction model linking `field_a` to `model_a` and
    /// `field_b` to `model_b`.
    pub(crate) fn junction(
        name: &str,
        field_a: (&str, &str),
        field_b: (&str, &str),
    ) -> Self {
        let cascade = crate::field::OnDelete::Cascade;
        let mut model = Model::builder(name)
            .field(field_a.0, Field::many2one(field_a.1).required().on_delete(cascade))
            .field(field_b.0, Field::many2one(field_b.1).required().on_delete(cascade))
            .unique_together([field_a.0, field_b.0])
            .build();
        model.junction = true;
        model
    }

    /// Returns the many-to-one target of `field`, if it is one.
    pub(crate) fn many2one_target(&self, field: &str) -> Option<&str> {
        match self.field(field)?.kind() {
            FieldKind::ManyToOne { comodel, .. } => Some(comodel),
            _ => None,
        }
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&String> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("unique_together", &self.unique_together)
            .field("junction", &self.junction)
            .field("methods", &methods)
            .finish()
    }
}

/// Builder for [`Model`].
///
/// # Example
///
/// ```rust,ignore
/// let person = Model::builder("res.person")
///     .field("name", Field::char().required())
///     .field("age", Field::integer())
///     .build();
/// ```
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    fn new(name: impl Into<String>) -> Self {
        let mut id = Field::identifier();
        id.set_name(ID_FIELD);
        let mut positions = HashMap::new();
        positions.insert(ID_FIELD.to_string(), 0);
        Self {
            model: Model {
                name: name.into(),
                fields: vec![id],
                positions,
                unique_together: Vec::new(),
                junction: false,
                methods: HashMap::new(),
            },
        }
    }

    /// Declares a field, assigning its name. A later declaration with
    /// the same name replaces the earlier one.
    #[must_use]
    pub fn field(mut self, name: &str, mut field: Field) -> Self {
        field.set_name(name);
        match self.model.positions.get(name) {
            Some(&i) => self.model.fields[i] = field,
            None => {
                self.model
                    .positions
                    .insert(name.to_string(), self.model.fields.len());
                self.model.fields.push(field);
            }
        }
        self
    }

    /// Declares a compound uniqueness constraint.
    #[must_use]
    pub fn unique_together<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.model
            .unique_together
            .push(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Registers a method usable as a field setter.
    #[must_use]
    pub fn method<F>(mut self, name: &str, method: F) -> Self
    where
        F: Fn(&Recordset, &Value) -> EngineResult<Value> + Send + Sync + 'static,
    {
        self.model.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    /// Finishes the declaration.
    #[must_use]
    pub fn build(self) -> Model {
        self.model
    }
}
