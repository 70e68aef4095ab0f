//! Write operations.

use crate::document::Document;
use crate::id::DocumentId;

/// A single mutation applied by [`DocumentStore::apply`](crate::DocumentStore::apply).
///
/// A batch of operations is applied all-or-nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert new documents. Each must carry an `_id`.
    Insert {
        /// Target collection.
        collection: String,
        /// Documents to insert.
        documents: Vec<Document>,
    },
    /// Set fields on existing documents. Unknown ids are ignored.
    Update {
        /// Target collection.
        collection: String,
        /// Documents to update.
        ids: Vec<DocumentId>,
        /// Fields to overwrite.
        set: Document,
    },
    /// Delete documents. Unknown ids are ignored.
    Delete {
        /// Target collection.
        collection: String,
        /// Documents to delete.
        ids: Vec<DocumentId>,
    },
}

impl WriteOp {
    /// Returns the collection this operation targets.
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Insert { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. } => collection,
        }
    }
}
