//! Process start-up.
//!
//! The registry and the store are constructed once and passed into every
//! environment:
//!
//! ```rust,ignore
//! let registry = bootstrap::registry([person, tag], EngineConfig::from_env())?;
//! let store = Arc::new(MemoryStore::open(&data_dir, StoreConfig::default())?);
//! let root = bootstrap::start(registry, store)?;
//! let env = root.with_actor(user_id);
//! ```

use crate::base::{self, ROOT_NAME, USER};
use crate::config::EngineConfig;
use crate::environment::{Environment, ROOT_ID};
use crate::error::EngineResult;
use crate::model::Model;
use crate::registry::Registry;
use docset_store::{DocumentId, DocumentStore, Filter};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Builds a registry holding the built-in models and `models`.
///
/// # Errors
///
/// Returns `Registry` errors from [`RegistryBuilder::build`](crate::RegistryBuilder::build).
pub fn registry(models: impl IntoIterator<Item = Model>, config: EngineConfig) -> EngineResult<Registry> {
    Registry::builder()
        .config(config)
        .models(base::models())
        .models(models)
        .build()
}

/// Declares indexes, ensures the root user exists and returns a root
/// environment.
pub fn start(registry: Registry, store: Arc<dyn DocumentStore>) -> EngineResult<Environment> {
    registry.ensure_indexes(store.as_ref())?;
    let env = Environment::root(Arc::new(registry), store);
    ensure_root_user(&env)?;
    info!(models = env.registry().len(), "engine started");
    Ok(env)
}

/// Creates the root user document if it is missing.
pub fn ensure_root_user(env: &Environment) -> EngineResult<DocumentId> {
    let root = env.sudo();
    if root.find_ids_raw(USER, &Filter::ids_document(&[ROOT_ID]))?.is_empty() {
        root.model(USER)?.create(json!({
            "_id": ROOT_ID.to_value(),
            "name": ROOT_NAME,
            "email": ROOT_NAME,
        }))?;
        info!("root user created");
    }
    Ok(ROOT_ID)
}
