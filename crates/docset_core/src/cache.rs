//! Write cache.
//!
//! Mutations are queued here and reach the store in one atomic batch when
//! the environment flushes. A `Create` entry carries its pre-assigned
//! identifier so that references queued after it can point at the new
//! document before it exists in the store.

use docset_store::{Document, DocumentId, WriteOp};
use std::collections::HashSet;

/// Kind of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOp {
    /// Insert a new document.
    Create,
    /// Overwrite fields of existing documents.
    Write,
    /// Delete documents.
    Delete,
}

/// A queued mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Mutation kind.
    pub op: CacheOp,
    /// Target collection.
    pub collection: String,
    /// Target documents; the new document's id for `Create`.
    pub ids: Vec<DocumentId>,
    /// Full document for `Create`, changed fields for `Write`.
    pub payload: Document,
}

impl CacheEntry {
    /// A create entry. `payload` must already carry `_id`.
    pub fn create(collection: impl Into<String>, id: DocumentId, payload: Document) -> Self {
        Self {
            op: CacheOp::Create,
            collection: collection.into(),
            ids: vec![id],
            payload,
        }
    }

    /// A write entry.
    pub fn write(collection: impl Into<String>, ids: Vec<DocumentId>, payload: Document) -> Self {
        Self {
            op: CacheOp::Write,
            collection: collection.into(),
            ids,
            payload,
        }
    }

    /// A delete entry.
    pub fn delete(collection: impl Into<String>, ids: Vec<DocumentId>) -> Self {
        Self {
            op: CacheOp::Delete,
            collection: collection.into(),
            ids,
            payload: Document::new(),
        }
    }
}

/// Queue of pending mutations for one environment.
#[derive(Debug, Default)]
pub struct WriteCache {
    entries: Vec<CacheEntry>,
}

impl WriteCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a mutation.
    pub fn enqueue(&mut self, entry: CacheEntry) {
        self.entries.push(entry);
    }

    /// Returns the queued entries in order.
    #[must_use]
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Returns the number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discards every queued entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Identifiers created in `collection` and not deleted afterwards.
    #[must_use]
    pub fn pending_ids(&self, collection: &str) -> HashSet<DocumentId> {
        let mut ids = HashSet::new();
        for entry in self.entries.iter().filter(|e| e.collection == collection) {
            match entry.op {
                CacheOp::Create => ids.extend(entry.ids.iter().copied()),
                CacheOp::Delete => {
                    for id in &entry.ids {
                        ids.remove(id);
                    }
                }
                CacheOp::Write => {}
            }
        }
        ids
    }

    /// Returns true if `id` is pending creation in `collection`.
    #[must_use]
    pub fn is_pending(&self, collection: &str, id: DocumentId) -> bool {
        self.pending_ids(collection).contains(&id)
    }

    /// Drains the queue into store operations, preserving order.
    ///
    /// Consecutive creates in the same collection become one insert.
    /// The cache is empty afterwards whatever the store does with the
    /// batch.
    pub fn take_ops(&mut self) -> Vec<WriteOp> {
        let mut ops: Vec<WriteOp> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            match entry.op {
                CacheOp::Create => {
                    if let Some(WriteOp::Insert {
                        collection,
                        documents,
                    }) = ops.last_mut()
                    {
                        if *collection == entry.collection {
                            documents.push(entry.payload);
                            continue;
                        }
                    }
                    ops.push(WriteOp::Insert {
                        collection: entry.collection,
                        documents: vec![entry.payload],
                    });
                }
                CacheOp::Write => ops.push(WriteOp::Update {
                    collection: entry.collection,
                    ids: entry.ids,
                    set: entry.payload,
                }),
                CacheOp::Delete => ops.push(WriteOp::Delete {
                    collection: entry.collection,
                    ids: entry.ids,
                }),
            }
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(id: DocumentId) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".into(), id.to_value());
        doc
    }

    #[test]
    fn pending_ids_track_creates_and_deletes() {
        let mut cache = WriteCache::new();
        let (a, b) = (DocumentId::new(), DocumentId::new());
        cache.enqueue(CacheEntry::create("c", a, payload(a)));
        cache.enqueue(CacheEntry::create("c", b, payload(b)));
        cache.enqueue(CacheEntry::delete("c", vec![b]));
        assert!(cache.is_pending("c", a));
        assert!(!cache.is_pending("c", b));
        assert!(!cache.is_pending("other", a));
    }

    #[test]
    fn consecutive_creates_are_merged() {
        let mut cache = WriteCache::new();
        let ids: Vec<_> = (0..3).map(|_| DocumentId::new()).collect();
        cache.enqueue(CacheEntry::create("c", ids[0], payload(ids[0])));
        cache.enqueue(CacheEntry::create("c", ids[1], payload(ids[1])));
        cache.enqueue(CacheEntry::write(
            "c",
            vec![ids[0]],
            json!({"n": 1}).as_object().cloned().unwrap(),
        ));
        cache.enqueue(CacheEntry::create("c", ids[2], payload(ids[2])));

        let ops = cache.take_ops();
        assert!(cache.is_empty());
        assert_eq!(ops.len(), 3);
        match &ops[0] {
            WriteOp::Insert { documents, .. } => assert_eq!(documents.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(ops[1], WriteOp::Update { .. }));
        assert!(matches!(ops[2], WriteOp::Insert { .. }));
    }

    #[test]
    fn clear_discards_everything() {
        let mut cache = WriteCache::new();
        cache.enqueue(CacheEntry::delete("c", vec![DocumentId::new()]));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.take_ops().is_empty());
    }
}
