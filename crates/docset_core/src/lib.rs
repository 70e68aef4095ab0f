//! # docset core
//!
//! Document-recordset engine for docset.
//!
//! This crate provides:
//! - [`Field`] and [`Model`] declarations, and a [`Registry`] that
//!   synthesizes junction models for many-to-many relations
//! - [`Environment`]: actor, context, transaction and write cache for one
//!   operation
//! - [`Recordset`]: lazily-evaluated sets of documents with `search`,
//!   `browse`, `read`, `create`, `write` and `unlink`
//! - access control through ACL and DLS rules ([`security`])
//! - bulk import with external identifiers ([`Recordset::load`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use docset_core::{bootstrap, EngineConfig, Field, Model};
//! use docset_store::MemoryStore;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let person = Model::builder("res.person")
//!     .field("name", Field::char().required())
//!     .field("age", Field::integer())
//!     .build();
//! let registry = bootstrap::registry([person], EngineConfig::default())?;
//! let root = bootstrap::start(registry, Arc::new(MemoryStore::new()))?;
//!
//! let people = root.model("res.person")?;
//! people.create(json!({"name": "Ann"}))?;
//! let rows = people.search(json!({"name": "Ann"}))?.read(&["name", "age"])?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod base;
pub mod bootstrap;
mod cache;
mod config;
mod environment;
mod error;
mod field;
mod import;
mod model;
mod recordset;
mod registry;
pub mod security;
mod value;

pub use cache::{CacheEntry, CacheOp, WriteCache};
pub use config::{EngineConfig, DEFAULT_CHAR_LENGTH, DEFAULT_IMPORT_ERROR_CAP};
pub use environment::{Context, Environment, ROOT_ID, UID_KEY};
pub use error::{EngineError, EngineResult};
pub use field::{datetime_value, Field, FieldKind, OnDelete, DEFAULT_REPRESENT};
pub use import::{ImportError, LoadOutcome, GENERATED_XID_PREFIX, XID_COLUMN};
pub use model::{Model, ModelBuilder, SetterFn};
pub use recordset::{FieldValue, Mapped, Recordset, RecordsetIter, X2ManyOp};
pub use registry::{DeletionConstraint, Registry, RegistryBuilder};
pub use security::Operation;
pub use value::{id_from_value, ids_from_value};
