//! Collection storage and atomic batch application.

use crate::document::{document_id, Document, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::filter::Filter;
use crate::id::DocumentId;
use crate::index::IndexSpec;
use crate::op::WriteOp;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Documents of one collection, kept in insertion order.
#[derive(Debug, Clone, Default)]
pub struct CollectionData {
    /// Insertion sequence to document.
    docs: BTreeMap<u64, Document>,
    /// Document id to insertion sequence.
    positions: HashMap<DocumentId, u64>,
    /// Next insertion sequence.
    next_seq: u64,
}

impl CollectionData {
    /// Returns the number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Returns true if the collection holds no documents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Iterates documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.docs.values()
    }

    /// Returns the documents matching a filter, in insertion order.
    #[must_use]
    pub fn find(&self, filter: &Filter) -> Vec<Document> {
        self.iter().filter(|d| filter.matches(d)).cloned().collect()
    }

    /// Counts the documents matching a filter.
    #[must_use]
    pub fn count(&self, filter: &Filter) -> usize {
        self.iter().filter(|d| filter.matches(d)).count()
    }

    pub(crate) fn insert(&mut self, collection: &str, doc: Document) -> StoreResult<()> {
        let id = document_id(&doc)?;
        if self.positions.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                index: ID_FIELD.to_string(),
                key: id.to_string(),
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.positions.insert(id, seq);
        self.docs.insert(seq, doc);
        Ok(())
    }

    fn update(&mut self, ids: &[DocumentId], set: &Document) -> StoreResult<()> {
        if set.contains_key(ID_FIELD) {
            return Err(StoreError::invalid_document("_id cannot be updated"));
        }
        for id in ids {
            let Some(seq) = self.positions.get(id) else {
                continue;
            };
            if let Some(doc) = self.docs.get_mut(seq) {
                for (field, value) in set {
                    doc.insert(field.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, ids: &[DocumentId]) {
        for id in ids {
            if let Some(seq) = self.positions.remove(id) {
                self.docs.remove(&seq);
            }
        }
    }

    fn check_unique(&self, spec: &IndexSpec) -> StoreResult<()> {
        let mut seen = HashSet::with_capacity(self.docs.len());
        for doc in self.docs.values() {
            if let Some(key) = spec.key_of(doc) {
                if !seen.insert(key.clone()) {
                    return Err(StoreError::DuplicateKey {
                        collection: spec.collection.clone(),
                        index: spec.name.clone(),
                        key,
                    });
                }
            }
        }
        Ok(())
    }
}

/// All collections plus the unique indexes declared over them.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub(crate) collections: HashMap<String, CollectionData>,
    pub(crate) indexes: Vec<IndexSpec>,
}

impl Catalog {
    /// Returns a collection, if it has ever been written.
    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&CollectionData> {
        self.collections.get(name)
    }

    /// Returns the declared indexes.
    #[must_use]
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Declares a unique index, validating existing documents against it.
    ///
    /// Declaring an index that already exists is a no-op.
    pub fn add_index(&mut self, spec: IndexSpec) -> StoreResult<()> {
        if self.indexes.contains(&spec) {
            return Ok(());
        }
        if let Some(data) = self.collections.get(&spec.collection) {
            data.check_unique(&spec)?;
        }
        self.indexes.push(spec);
        Ok(())
    }

    /// Applies a batch atomically.
    ///
    /// # Errors
    ///
    /// On any error no collection is modified.
    pub fn apply(&mut self, ops: &[WriteOp]) -> StoreResult<()> {
        apply_ops(&mut self.collections, &self.indexes, ops, |_| None)
    }
}

/// Applies `ops` to `target`, atomically.
///
/// Touched collections are copied into a staging area, mutated there,
/// checked against their unique indexes and only then swapped in.
/// `seed` provides the starting contents of a collection missing from
/// `target`.
pub(crate) fn apply_ops<F>(
    target: &mut HashMap<String, CollectionData>,
    indexes: &[IndexSpec],
    ops: &[WriteOp],
    seed: F,
) -> StoreResult<()>
where
    F: Fn(&str) -> Option<CollectionData>,
{
    let mut staged: HashMap<String, CollectionData> = HashMap::new();
    for op in ops {
        let name = op.collection();
        if !staged.contains_key(name) {
            let data = target
                .get(name)
                .cloned()
                .or_else(|| seed(name))
                .unwrap_or_default();
            staged.insert(name.to_string(), data);
        }
        let data = staged.entry(name.to_string()).or_default();
        match op {
            WriteOp::Insert {
                collection,
                documents,
            } => {
                for doc in documents {
                    data.insert(collection, doc.clone())?;
                }
            }
            WriteOp::Update { ids, set, .. } => data.update(ids, set)?,
            WriteOp::Delete { ids, .. } => data.delete(ids),
        }
    }
    for spec in indexes {
        if let Some(data) = staged.get(&spec.collection) {
            data.check_unique(spec)?;
        }
    }
    target.extend(staged);
    Ok(())
}
