//! # docset testkit
//!
//! Test utilities for docset.
//!
//! This crate provides:
//! - [`TestEngine`]: a started engine over a memory or file-backed store,
//!   with a small set of sample models
//! - helpers to declare users, groups, ACL and DLS rules
//! - property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docset_testkit::prelude::*;
//!
//! #[test]
//! fn creates_people() {
//!     with_engine(|env| {
//!         let people = env.model(PERSON).unwrap();
//!         people.create(json!({"name": "Ann"})).unwrap();
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use serde_json::json;
}

pub use fixtures::*;
pub use generators::*;

/// Installs a test subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
