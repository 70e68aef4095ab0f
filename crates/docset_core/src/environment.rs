//! Per-operation environments.
//!
//! An [`Environment`] binds an actor, a context map and an optional store
//! session to a registry and a store. Derived environments
//! ([`Environment::with_context`], [`Environment::sudo`]) share the write
//! cache and the session of the environment they come from.

use crate::cache::WriteCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::recordset::Recordset;
use crate::registry::Registry;
use docset_store::{Document, DocumentId, DocumentStore, Filter, Session};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// The well-known identity that bypasses access control.
pub const ROOT_ID: DocumentId = DocumentId::NIL;

/// Context key that overrides the acting user.
pub const UID_KEY: &str = "uid";

/// Custom context keys.
pub type Context = BTreeMap<String, Value>;

struct Shared {
    registry: Arc<Registry>,
    store: Arc<dyn DocumentStore>,
    cache: Mutex<WriteCache>,
}

/// Caller identity, context, transaction and write cache for one
/// top-level operation.
///
/// # Example
///
/// ```rust,ignore
/// let env = Environment::new(registry, store, user_id);
/// let people = env.model("res.person")?.search(json!({"age": {"$gte": 18}}))?;
/// let rows = people.read(&["name"])?;
/// ```
#[derive(Clone)]
pub struct Environment {
    shared: Arc<Shared>,
    actor: DocumentId,
    context: Arc<Context>,
    session: Option<Session>,
}

impl Environment {
    /// Creates an environment for `actor` with an empty write cache.
    ///
    /// Unique fields and junction pairs are only enforced once
    /// [`Registry::ensure_indexes`] has run against `store`;
    /// [`crate::bootstrap::start`] does that before building the root
    /// environment.
    pub fn new(registry: Arc<Registry>, store: Arc<dyn DocumentStore>, actor: DocumentId) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                store,
                cache: Mutex::new(WriteCache::new()),
            }),
            actor,
            context: Arc::new(Context::new()),
            session: None,
        }
    }

    /// Creates an environment acting as the bypass identity.
    pub fn root(registry: Arc<Registry>, store: Arc<dyn DocumentStore>) -> Self {
        Self::new(registry, store, ROOT_ID)
    }

    /// Returns the acting user.
    #[must_use]
    pub fn actor(&self) -> DocumentId {
        self.actor
    }

    /// Returns true when acting as the bypass identity.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.actor == ROOT_ID
    }

    /// Returns the context map.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Returns the open session, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Returns the registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// Returns the store.
    #[must_use]
    pub fn store(&self) -> &dyn DocumentStore {
        self.shared.store.as_ref()
    }

    /// Returns the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.shared.registry.config()
    }

    /// Derives an environment with one context key overridden.
    ///
    /// Setting `uid` to an identifier also changes the acting user.
    #[must_use]
    pub fn with_context(&self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let mut derived = self.clone();
        if key == UID_KEY {
            match value.as_str().map(DocumentId::parse) {
                Some(Ok(actor)) => derived.actor = actor,
                _ => warn!(value = %value, "ignoring uid context value that is not an identifier"),
            }
        }
        let mut context = Context::clone(&self.context);
        context.insert(key.to_string(), value);
        derived.context = Arc::new(context);
        derived
    }

    /// Derives an environment acting as `actor`.
    #[must_use]
    pub fn with_actor(&self, actor: DocumentId) -> Self {
        self.with_context(UID_KEY, actor.to_value())
    }

    /// Derives an environment acting as the bypass identity.
    #[must_use]
    pub fn sudo(&self) -> Self {
        self.with_actor(ROOT_ID)
    }

    /// Returns the empty recordset of a model.
    ///
    /// # Errors
    ///
    /// Returns `UnknownModel` if the registry has no such model.
    pub fn model(&self, name: &str) -> EngineResult<Recordset> {
        let model = Arc::clone(self.registry().model(name)?);
        Ok(Recordset::empty(model, self.clone()))
    }

    /// Opens a store session and returns an environment bound to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if a session is already open.
    pub fn begin(&self) -> EngineResult<Self> {
        if self.session.is_some() {
            return Err(crate::EngineError::invalid_operation(
                "environment already has an open transaction",
            ));
        }
        let session = self.store().begin()?;
        let mut derived = self.clone();
        derived.session = Some(session);
        Ok(derived)
    }

    /// Flushes the write cache and commits the open session.
    pub fn commit(&self) -> EngineResult<()> {
        let Some(session) = &self.session else {
            return self.flush();
        };
        if let Err(e) = self.flush() {
            self.store().abort(session)?;
            return Err(e);
        }
        self.store().commit(session)?;
        Ok(())
    }

    /// Discards the write cache and aborts the open session.
    pub fn abort(&self) -> EngineResult<()> {
        self.cache().clear();
        if let Some(session) = &self.session {
            self.store().abort(session)?;
        }
        Ok(())
    }

    /// Runs `f` inside a transaction: committed when it returns `Ok`,
    /// aborted when it returns `Err`. Inside an open transaction `f`
    /// simply joins it.
    pub fn transaction<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Environment) -> EngineResult<T>,
    {
        if self.session.is_some() {
            return f(self);
        }
        let env = self.begin()?;
        match f(&env) {
            Ok(value) => {
                env.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = env.abort() {
                    warn!(error = %abort_err, "abort after failed transaction also failed");
                }
                Err(e)
            }
        }
    }

    /// Runs one recordset call all-or-nothing.
    ///
    /// Inside an open session a failed call is rolled back to a savepoint
    /// taken before it, so the session can still be committed. Without a
    /// session and with implicit transactions disabled only the write
    /// cache is discarded; batches already flushed by the call stay.
    pub(crate) fn atomic<F, T>(&self, f: F) -> EngineResult<T>
    where
        F: FnOnce(&Environment) -> EngineResult<T>,
    {
        if let Some(session) = &self.session {
            let savepoint = session.savepoint();
            let result = f(self);
            if result.is_err() {
                self.cache().clear();
                if let Err(rollback_err) = session.rollback_to(savepoint) {
                    warn!(error = %rollback_err, "rollback after failed call also failed");
                }
            }
            return result;
        }
        if !self.config().implicit_transactions {
            let result = f(self);
            if result.is_err() {
                self.cache().clear();
            }
            return result;
        }
        self.transaction(f)
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, WriteCache> {
        self.shared.cache.lock()
    }

    /// Sends every queued mutation to the store as one batch.
    ///
    /// # Errors
    ///
    /// Store errors are propagated; the cache is empty afterwards either
    /// way and nothing from a failed batch is persisted.
    pub fn flush(&self) -> EngineResult<()> {
        let ops = self.cache().take_ops();
        if ops.is_empty() {
            return Ok(());
        }
        let result = self.store().apply(self.session.as_ref(), &ops);
        match &result {
            Ok(()) => debug!(ops = ops.len(), "write cache flushed"),
            Err(e) => warn!(ops = ops.len(), error = %e, "write cache flush failed, batch discarded"),
        }
        result.map_err(Into::into)
    }

    /// Returns true if `id` exists in `model` or is pending creation.
    pub fn exists(&self, model: &str, id: DocumentId) -> EngineResult<bool> {
        if self.cache().is_pending(model, id) {
            return Ok(true);
        }
        Ok(self.store().count(self.session(), model, &Filter::ids(&[id]))? > 0)
    }

    /// Reads documents directly, without access control.
    pub(crate) fn find_raw(&self, collection: &str, filter: &Value) -> EngineResult<Vec<Document>> {
        let filter = Filter::parse(filter)?;
        Ok(self.store().find(self.session(), collection, &filter)?)
    }

    /// Reads identifiers directly, without access control.
    pub(crate) fn find_ids_raw(&self, collection: &str, filter: &Value) -> EngineResult<Vec<DocumentId>> {
        let filter = Filter::parse(filter)?;
        Ok(self.store().find_ids(self.session(), collection, &filter)?)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("actor", &self.actor)
            .field("context", &self.context)
            .field("session", &self.session)
            .field("pending", &self.shared.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::model::Model;
    use docset_store::MemoryStore;
    use serde_json::json;

    fn env() -> Environment {
        let registry = Registry::builder()
            .model(Model::builder("res.note").field("name", Field::char()).build())
            .build()
            .unwrap();
        Environment::new(Arc::new(registry), Arc::new(MemoryStore::new()), DocumentId::new())
    }

    #[test]
    fn sudo_switches_to_root() {
        let env = env();
        assert!(!env.is_root());
        let root = env.sudo();
        assert!(root.is_root());
        assert_eq!(root.context().get(UID_KEY), Some(&ROOT_ID.to_value()));
        assert!(!env.is_root());
    }

    #[test]
    fn uid_context_impersonates() {
        let env = env();
        let other = DocumentId::new();
        let derived = env.with_context("uid", other.to_string());
        assert_eq!(derived.actor(), other);
        let ignored = env.with_context("uid", "nobody");
        assert_eq!(ignored.actor(), env.actor());
        assert_eq!(env.with_context("lang", "fr").context()["lang"], json!("fr"));
    }

    #[test]
    fn derived_environments_share_the_cache() {
        let env = env();
        let derived = env.with_context("k", 1);
        derived
            .cache()
            .enqueue(crate::cache::CacheEntry::delete("res.note", vec![DocumentId::new()]));
        assert_eq!(env.cache().len(), 1);
    }

    #[test]
    fn unknown_model() {
        assert!(env().model("res.ghost").is_err());
        assert!(env().model("res.note").is_ok());
    }

    #[test]
    fn transaction_commits_or_aborts() {
        let env = env().sudo();
        let result: EngineResult<()> = env.transaction(|txn| {
            txn.model("res.note")?.create(json!({"name": "kept"}))?;
            Ok(())
        });
        result.unwrap();
        assert_eq!(env.model("res.note").unwrap().search(json!({})).unwrap().count().unwrap(), 1);

        let result: EngineResult<()> = env.transaction(|txn| {
            txn.model("res.note")?.create(json!({"name": "dropped"}))?;
            Err(crate::EngineError::invalid_operation("boom"))
        });
        assert!(result.is_err());
        assert_eq!(env.model("res.note").unwrap().search(json!({})).unwrap().count().unwrap(), 1);
    }

    #[test]
    fn begin_twice_is_rejected() {
        let txn = env().begin().unwrap();
        assert!(txn.begin().is_err());
        txn.abort().unwrap();
    }
}
