//! Test fixtures and engine helpers.
//!
//! Provides a started engine with a few sample models, and helpers to
//! declare the security rows tests need.

use docset_core::base::{ACL, DLS, GROUP, USER};
use docset_core::{bootstrap, EngineConfig, Environment, Field, Model, OnDelete, Operation};
use docset_store::{DocumentId, DocumentStore, MemoryStore, StoreConfig};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Sample model: a country, referenced with the restrict policy.
pub const COUNTRY: &str = "res.country";
/// Sample model: a tag, linked to people many-to-many.
pub const TAG: &str = "res.tag";
/// Sample model: a person.
pub const PERSON: &str = "res.person";
/// Sample model: an address, deleted with its person.
pub const ADDRESS: &str = "res.address";
/// Junction synthesized for `res.person.tag_ids`.
pub const PERSON_TAG_REL: &str = "res.person.res.tag.rel";

/// Returns the sample models.
#[must_use]
pub fn sample_models() -> Vec<Model> {
    vec![
        Model::builder(COUNTRY)
            .field("name", Field::char().required())
            .field("code", Field::char().max_length(2))
            .unique_together(["code"])
            .build(),
        Model::builder(TAG)
            .field("name", Field::char().required().unique())
            .field("person_ids", Field::many2many(PERSON))
            .build(),
        Model::builder(PERSON)
            .field("name", Field::char().required())
            .field("age", Field::integer())
            .field("email", Field::char())
            .field("active", Field::boolean().default(true))
            .field("state", Field::selection(["draft", "confirmed"]).default("draft"))
            .field("birthday", Field::datetime())
            .field("country_id", Field::many2one(COUNTRY))
            .field("manager_id", Field::many2one(PERSON).on_delete(OnDelete::SetNull))
            .field("tag_ids", Field::many2many(TAG))
            .field(
                "address_ids",
                Field::one2many(ADDRESS, "person_id").represent("street"),
            )
            .field("nickname", Field::char().setter("set_nickname"))
            .unique_together(["email"])
            .method("set_nickname", |_records, value| {
                Ok(value
                    .as_str()
                    .map_or(Value::Null, |s| Value::String(s.trim().to_lowercase())))
            })
            .build(),
        Model::builder(ADDRESS)
            .field("street", Field::char().required())
            .field("person_id", Field::many2one(PERSON).on_delete(OnDelete::Cascade))
            .field("country_id", Field::many2one(COUNTRY).on_delete(OnDelete::SetNull))
            .build(),
    ]
}

/// A started engine with automatic cleanup.
pub struct TestEngine {
    /// Root environment.
    pub env: Environment,
    config: EngineConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Starts an engine over an in-memory store.
    pub fn memory() -> Self {
        Self::memory_with_config(EngineConfig::default())
    }

    /// Starts an engine over an in-memory store with `config`.
    pub fn memory_with_config(config: EngineConfig) -> Self {
        Self {
            env: start(Arc::new(MemoryStore::new()), config.clone()),
            config,
            _temp_dir: None,
        }
    }

    /// Starts an engine over a snapshot-backed store in a temporary
    /// directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = open_store(temp_dir.path());
        let config = EngineConfig::default();
        Self {
            env: start(store, config.clone()),
            config,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the data directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Closes the store and starts again from what it persisted.
    ///
    /// In-memory engines come back empty apart from the root user.
    #[must_use]
    pub fn reopen(self) -> Self {
        let Self {
            env,
            config,
            _temp_dir,
        } = self;
        drop(env);
        let store: Arc<dyn DocumentStore> = match &_temp_dir {
            Some(dir) => open_store(dir.path()),
            None => Arc::new(MemoryStore::new()),
        };
        Self {
            env: start(store, config.clone()),
            config,
            _temp_dir,
        }
    }

    /// Returns an environment acting as `user`.
    pub fn as_user(&self, user: DocumentId) -> Environment {
        self.env.with_actor(user)
    }
}

impl std::ops::Deref for TestEngine {
    type Target = Environment;

    fn deref(&self) -> &Self::Target {
        &self.env
    }
}

fn open_store(path: &Path) -> Arc<dyn DocumentStore> {
    let config = StoreConfig::new().sync_on_commit(false);
    Arc::new(MemoryStore::open(path, config).expect("Failed to open store"))
}

fn start(store: Arc<dyn DocumentStore>, config: EngineConfig) -> Environment {
    let registry = bootstrap::registry(sample_models(), config).expect("Failed to build registry");
    bootstrap::start(registry, store).expect("Failed to start engine")
}

/// Runs a test with a root environment over a fresh in-memory engine.
///
/// # Example
///
/// ```rust,ignore
/// use docset_testkit::with_engine;
///
/// #[test]
/// fn my_test() {
///     with_engine(|env| {
///         let people = env.model("res.person").unwrap();
///         // ... test operations
///     });
/// }
/// ```
pub fn with_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Environment) -> R,
{
    let engine = TestEngine::memory();
    f(&engine.env)
}

/// Runs a test with a root environment over a fresh file-backed engine.
pub fn with_file_engine<F, R>(f: F) -> R
where
    F: FnOnce(&Environment, &Path) -> R,
{
    let engine = TestEngine::file();
    let path = engine.path().expect("File engine should have a path");
    f(&engine.env, &path)
}

/// Security rows.
pub mod security {
    use super::*;

    /// Creates a group.
    pub fn create_group(env: &Environment, name: &str) -> DocumentId {
        env.sudo()
            .model(GROUP)
            .and_then(|groups| groups.create(json!({ "name": name })))
            .and_then(|group| group.ensure_one())
            .expect("Failed to create group")
    }

    /// Creates a user belonging to `groups`.
    pub fn create_user(env: &Environment, name: &str, groups: &[DocumentId]) -> DocumentId {
        let groups: Vec<Value> = groups.iter().map(DocumentId::to_value).collect();
        env.sudo()
            .model(USER)
            .and_then(|users| {
                users.create(json!({
                    "name": name,
                    "email": format!("{name}@example.com"),
                    "group_ids": [["replace", groups]],
                }))
            })
            .and_then(|user| user.ensure_one())
            .expect("Failed to create user")
    }

    /// Grants `operations` on `model` to `group`, or to everybody when
    /// `group` is `None`.
    pub fn grant(
        env: &Environment,
        group: Option<DocumentId>,
        model: &str,
        operations: &[Operation],
    ) -> DocumentId {
        let mut values = Map::new();
        values.insert(
            "name".to_string(),
            Value::String(format!("{model}.{}", DocumentId::new())),
        );
        values.insert("model".to_string(), Value::String(model.to_string()));
        values.insert(
            "group_id".to_string(),
            group.map_or(Value::Null, |g| g.to_value()),
        );
        for op in Operation::ALL {
            values.insert(
                op.acl_flag().to_string(),
                Value::Bool(operations.contains(&op)),
            );
        }
        env.sudo()
            .model(ACL)
            .and_then(|acl| acl.create(Value::Object(values)))
            .and_then(|acl| acl.ensure_one())
            .expect("Failed to create ACL rule")
    }

    /// Grants every operation on `model` to `group`.
    pub fn grant_all(env: &Environment, group: Option<DocumentId>, model: &str) -> DocumentId {
        grant(env, group, model, &Operation::ALL)
    }

    /// Declares a DLS rule on `model` for `operations`, scoped to
    /// `groups` or global when `groups` is empty.
    pub fn add_rule(
        env: &Environment,
        model: &str,
        query: &str,
        groups: &[DocumentId],
        operations: &[Operation],
    ) -> DocumentId {
        let mut values = Map::new();
        values.insert("name".to_string(), Value::String(format!("{model} rule")));
        values.insert("model".to_string(), Value::String(model.to_string()));
        values.insert("query".to_string(), Value::String(query.to_string()));
        let groups: Vec<Value> = groups.iter().map(DocumentId::to_value).collect();
        values.insert("group_ids".to_string(), json!([["replace", groups]]));
        for op in Operation::ALL {
            values.insert(
                op.dls_flag().to_string(),
                Value::Bool(operations.contains(&op)),
            );
        }
        env.sudo()
            .model(DLS)
            .and_then(|dls| dls.create(Value::Object(values)))
            .and_then(|dls| dls.ensure_one())
            .expect("Failed to create DLS rule")
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Starts an engine holding `count` people named `person_<i>`, aged
    /// `i`.
    pub fn populated_engine(count: usize) -> TestEngine {
        let engine = TestEngine::memory();
        let people: Vec<Value> = (0..count)
            .map(|i| json!({ "name": format!("person_{i}"), "age": i }))
            .collect();
        if !people.is_empty() {
            engine
                .model(PERSON)
                .and_then(|model| model.create(Value::Array(people)))
                .expect("Failed to create people");
        }
        engine
    }

    /// Starts an engine with one group granted every operation on the
    /// sample models and one user in it. Returns the engine, the group and
    /// the user.
    pub fn staffed_engine() -> (TestEngine, DocumentId, DocumentId) {
        let engine = TestEngine::memory();
        let group = security::create_group(&engine, "staff");
        let user = security::create_user(&engine, "staff_user", &[group]);
        for model in [COUNTRY, TAG, PERSON, ADDRESS] {
            security::grant_all(&engine, Some(group), model);
        }
        (engine, group, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_engine_has_sample_models() {
        let engine = TestEngine::memory();
        for name in [COUNTRY, TAG, PERSON, ADDRESS, PERSON_TAG_REL] {
            assert!(engine.registry().contains(name), "{name}");
        }
        assert!(engine.path().is_none());
    }

    #[test]
    fn with_engine_runs_as_root() {
        with_engine(|env| assert!(env.is_root()));
    }

    #[test]
    fn created_user_is_in_group() {
        let engine = TestEngine::memory();
        let group = security::create_group(&engine, "staff");
        let user = security::create_user(&engine, "ann", &[group]);
        let groups = engine
            .model(USER)
            .unwrap()
            .browse_ids(&[user])
            .get_field("group_ids")
            .unwrap();
        assert_eq!(groups.as_records().unwrap().ids().unwrap(), vec![group]);
    }

    #[test]
    fn populated_scenario() {
        let engine = scenarios::populated_engine(5);
        let people = engine.model(PERSON).unwrap().search(json!({})).unwrap();
        assert_eq!(people.count().unwrap(), 5);
    }

    #[test]
    fn staffed_user_can_create_people() {
        let (engine, _, user) = scenarios::staffed_engine();
        let people = engine.as_user(user).model(PERSON).unwrap();
        people.create(json!({"name": "Ann"})).unwrap();
        assert_eq!(people.search(json!({})).unwrap().count().unwrap(), 1);
    }
}
