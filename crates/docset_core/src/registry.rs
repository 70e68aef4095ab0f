//! Model registry.
//!
//! The registry is built in two phases:
//!
//! 1. every declared model is inserted as is;
//! 2. every many-to-many field is resolved to a junction model, which is
//!    synthesized when no model of that name exists yet.
//!
//! Relational fields are then checked against their comodels and the
//! deletion-constraint table is derived from every many-to-one field.
//! Building again from [`Registry::to_builder`] yields the same registry;
//! junctions are never duplicated.

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::field::{FieldKind, OnDelete, DEFAULT_REPRESENT};
use crate::model::Model;
use docset_store::{DocumentStore, IndexSpec, ID_FIELD};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// A many-to-one reference that must be honored when its target is
/// deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionConstraint {
    /// Model holding the reference.
    pub model: String,
    /// Referencing field.
    pub field: String,
    /// Declared policy.
    pub on_delete: OnDelete,
}

/// Immutable map of model names to models.
#[derive(Debug, Clone)]
pub struct Registry {
    models: BTreeMap<String, Arc<Model>>,
    deletion_constraints: HashMap<String, Vec<DeletionConstraint>>,
    config: EngineConfig,
}

impl Registry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Returns a builder holding every model of this registry, junctions
    /// included, so more models can be added.
    #[must_use]
    pub fn to_builder(&self) -> RegistryBuilder {
        RegistryBuilder {
            models: self.models.values().map(|m| Model::clone(m)).collect(),
            config: self.config.clone(),
        }
    }

    /// Looks up a model.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` if no model has this name.
    pub fn model(&self, name: &str) -> EngineResult<&Arc<Model>> {
        self.models.get(name).ok_or_else(|| EngineError::UnknownModel {
            name: name.to_string(),
        })
    }

    /// Returns true if a model has this name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Returns every model name, sorted.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Returns the number of models, junctions included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns true if no model is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Returns the references to `model` that unlink must honor.
    #[must_use]
    pub fn deletion_constraints(&self, model: &str) -> &[DeletionConstraint] {
        self.deletion_constraints
            .get(model)
            .map_or(&[], Vec::as_slice)
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Declares the unique indexes of every model in the store.
    pub fn ensure_indexes(&self, store: &dyn DocumentStore) -> EngineResult<()> {
        for model in self.models.values() {
            for field in model.fields() {
                if field.is_unique() && field.name() != ID_FIELD {
                    store.ensure_index(IndexSpec::single(model.name(), field.name()))?;
                }
            }
            for fields in model.unique_together() {
                store.ensure_index(IndexSpec::compound(model.name(), fields.clone()))?;
            }
        }
        Ok(())
    }
}

/// Builder for [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    models: Vec<Model>,
    config: EngineConfig,
}

impl RegistryBuilder {
    /// Adds a model.
    #[must_use]
    pub fn model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Adds several models.
    #[must_use]
    pub fn models(mut self, models: impl IntoIterator<Item = Model>) -> Self {
        self.models.extend(models);
        self
    }

    /// Sets the engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns `Registry` errors for duplicate model names, references
    /// to unknown models or fields, unknown setters, and junction names
    /// already taken by an incompatible model.
    pub fn build(self) -> EngineResult<Registry> {
        let config = self.config;

        // Phase one: declared models.
        let mut models: BTreeMap<String, Model> = BTreeMap::new();
        for model in self.models {
            if models.contains_key(model.name()) {
                return Err(EngineError::registry(format!(
                    "model {} registered twice",
                    model.name()
                )));
            }
            models.insert(model.name().to_string(), model);
        }

        // Phase two: junctions.
        let names: Vec<String> = models.keys().cloned().collect();
        for name in &names {
            let mut pending = Vec::new();
            if let Some(model) = models.get_mut(name) {
                for field in model.fields_mut() {
                    if let FieldKind::ManyToMany {
                        comodel,
                        junction,
                        field_a,
                        field_b,
                        ..
                    } = field.kind_mut()
                    {
                        if junction.is_empty() {
                            *junction = junction_name(name, comodel);
                        }
                        if field_a.is_empty() || field_b.is_empty() {
                            let (a, b) = junction_columns(name, comodel);
                            *field_a = a;
                            *field_b = b;
                        }
                        pending.push((
                            junction.clone(),
                            field_a.clone(),
                            field_b.clone(),
                            comodel.clone(),
                        ));
                    }
                }
            }
            for (junction, field_a, field_b, comodel) in pending {
                match models.get(&junction) {
                    Some(existing) => {
                        let compatible = existing.is_junction()
                            && existing.many2one_target(&field_a) == Some(name.as_str())
                            && existing.many2one_target(&field_b) == Some(comodel.as_str());
                        if !compatible {
                            return Err(EngineError::registry(format!(
                                "junction {junction} does not link {name}.{field_a} to {comodel}.{field_b}"
                            )));
                        }
                    }
                    None => {
                        debug!(junction = %junction, left = %name, right = %comodel, "synthesized junction model");
                        let model = Model::junction(
                            &junction,
                            (&field_a, name),
                            (&field_b, &comodel),
                        );
                        models.insert(junction, model);
                    }
                }
            }
        }

        resolve_fields(&mut models, &config)?;
        let deletion_constraints = deletion_table(&models);

        Ok(Registry {
            models: models
                .into_iter()
                .map(|(name, model)| (name, Arc::new(model)))
                .collect(),
            deletion_constraints,
            config,
        })
    }
}

/// Junction name for a pair of models, independent of declaration side.
fn junction_name(model: &str, comodel: &str) -> String {
    let (lo, hi) = if model <= comodel {
        (model, comodel)
    } else {
        (comodel, model)
    };
    format!("{lo}.{hi}.rel")
}

fn junction_columns(model: &str, comodel: &str) -> (String, String) {
    if model == comodel {
        return ("source_id".to_string(), "target_id".to_string());
    }
    (
        format!("{}_id", model.replace('.', "_")),
        format!("{}_id", comodel.replace('.', "_")),
    )
}

fn resolve_fields(models: &mut BTreeMap<String, Model>, config: &EngineConfig) -> EngineResult<()> {
    // Read-only facts needed while mutating fields.
    let mut has_name: HashMap<String, bool> = HashMap::new();
    let mut many2one: HashMap<(String, String), String> = HashMap::new();
    for (name, model) in models.iter() {
        has_name.insert(name.clone(), model.has_field(DEFAULT_REPRESENT));
        for field in model.fields() {
            if let FieldKind::ManyToOne { comodel, .. } = field.kind() {
                many2one.insert((name.clone(), field.name().to_string()), comodel.clone());
            }
        }
    }
    let default_represent = |comodel: &str| {
        if has_name.get(comodel).copied().unwrap_or(false) {
            DEFAULT_REPRESENT.to_string()
        } else {
            ID_FIELD.to_string()
        }
    };

    for (name, model) in models.iter_mut() {
        for fields in model.unique_together() {
            if let Some(missing) = fields.iter().find(|f| !model.has_field(f)) {
                return Err(EngineError::registry(format!(
                    "{name} unique constraint names unknown field {missing}"
                )));
            }
        }
        let method_missing = model
            .fields()
            .iter()
            .filter_map(|f| f.setter_name())
            .find(|setter| model.method(setter).is_none())
            .map(str::to_string);
        if let Some(setter) = method_missing {
            return Err(EngineError::registry(format!("{name} has no method {setter}")));
        }

        for field in model.fields_mut() {
            let field_name = field.name().to_string();
            match field.kind_mut() {
                FieldKind::Char { max_length } => {
                    max_length.get_or_insert(config.default_char_length);
                }
                FieldKind::ManyToOne {
                    comodel, represent, ..
                }
                | FieldKind::ManyToMany {
                    comodel, represent, ..
                } => {
                    if !has_name.contains_key(comodel.as_str()) {
                        return Err(EngineError::registry(format!(
                            "{name}.{field_name} references unknown model {comodel}"
                        )));
                    }
                    if represent.is_empty() {
                        *represent = default_represent(comodel);
                    }
                }
                FieldKind::OneToMany {
                    comodel,
                    inverse,
                    represent,
                } => {
                    if !has_name.contains_key(comodel.as_str()) {
                        return Err(EngineError::registry(format!(
                            "{name}.{field_name} references unknown model {comodel}"
                        )));
                    }
                    let target = many2one.get(&(comodel.clone(), inverse.clone()));
                    if target.map(String::as_str) != Some(name.as_str()) {
                        return Err(EngineError::registry(format!(
                            "{name}.{field_name}: {comodel}.{inverse} is not a many-to-one to {name}"
                        )));
                    }
                    if represent.is_empty() {
                        *represent = default_represent(comodel);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn deletion_table(models: &BTreeMap<String, Model>) -> HashMap<String, Vec<DeletionConstraint>> {
    let mut table: HashMap<String, Vec<DeletionConstraint>> = HashMap::new();
    for (name, model) in models {
        for field in model.fields() {
            if let FieldKind::ManyToOne {
                comodel, on_delete, ..
            } = field.kind()
            {
                table
                    .entry(comodel.clone())
                    .or_default()
                    .push(DeletionConstraint {
                        model: name.clone(),
                        field: field.name().to_string(),
                        on_delete: *on_delete,
                    });
            }
        }
    }
    table
}
