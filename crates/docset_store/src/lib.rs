//! # docset store
//!
//! The document store boundary used by the docset engine.
//!
//! This crate provides:
//! - [`DocumentStore`]: the trait the engine talks to
//! - [`MemoryStore`]: an in-memory implementation with sessions, unique
//!   indexes and optional snapshot persistence
//! - [`Filter`]: parsed filter documents (`$in`, `$or`, `$and`, `$regex`,
//!   `$expr` and the comparison operators)
//! - [`DocumentId`]: 128-bit document identifiers
//!
//! ## Example
//!
//! ```rust,ignore
//! use docset_store::{DocumentStore, Filter, MemoryStore, WriteOp};
//! use serde_json::json;
//!
//! let store = MemoryStore::new();
//! let filter = Filter::parse(&json!({"name": {"$in": ["Ann", "Bob"]}}))?;
//! let people = store.find(None, "res.person", &filter)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collection;
mod config;
mod document;
mod error;
mod filter;
mod id;
mod index;
mod memory;
mod op;
mod session;
#[cfg(feature = "std")]
mod snapshot;
mod store;

pub use collection::{Catalog, CollectionData};
pub use config::StoreConfig;
pub use document::{compare_values, document_id, lookup_path, values_equal, Document, ID_FIELD};
pub use error::{StoreError, StoreResult};
pub use filter::Filter;
pub use id::DocumentId;
pub use index::IndexSpec;
pub use memory::MemoryStore;
pub use op::WriteOp;
pub use session::{Savepoint, Session, SessionState};
#[cfg(feature = "std")]
pub use snapshot::DataDir;
pub use store::DocumentStore;
