//! The document store boundary.

use crate::document::{document_id, Document};
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::id::DocumentId;
use crate::index::IndexSpec;
use crate::op::WriteOp;
use crate::session::Session;
use std::fmt;

/// Abstraction over a document-oriented store.
///
/// Collections are created implicitly by the first write. Every read and
/// write optionally runs inside a [`Session`]; without one it sees and
/// changes committed state directly.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; one store is shared by every
/// environment in the process.
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Returns the documents of `collection` matching `filter`, in
    /// insertion order.
    fn find(
        &self,
        session: Option<&Session>,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>>;

    /// Counts the documents of `collection` matching `filter`.
    fn count(
        &self,
        session: Option<&Session>,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<usize> {
        Ok(self.find(session, collection, filter)?.len())
    }

    /// Returns the identifiers of matching documents, in insertion order.
    fn find_ids(
        &self,
        session: Option<&Session>,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Vec<DocumentId>> {
        self.find(session, collection, filter)?
            .iter()
            .map(document_id)
            .collect()
    }

    /// Applies a batch of writes atomically.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` when a unique index is violated. On error
    /// nothing from the batch is visible.
    fn apply(&self, session: Option<&Session>, ops: &[WriteOp]) -> StoreResult<()>;

    /// Declares a unique index. Declaring the same index twice is a no-op.
    fn ensure_index(&self, spec: IndexSpec) -> StoreResult<()>;

    /// Opens a new session.
    fn begin(&self) -> StoreResult<Session>;

    /// Commits a session, making its writes visible.
    fn commit(&self, session: &Session) -> StoreResult<()>;

    /// Aborts a session, discarding its writes.
    fn abort(&self, session: &Session) -> StoreResult<()>;
}
