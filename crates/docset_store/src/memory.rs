//! In-memory document store with optional snapshot persistence.

use crate::collection::{apply_ops, Catalog};
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::StoreResult;
use crate::filter::Filter;
use crate::index::IndexSpec;
use crate::op::WriteOp;
use crate::session::{Session, SessionState};
use crate::store::DocumentStore;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[cfg(feature = "std")]
use crate::snapshot::DataDir;
#[cfg(feature = "std")]
use std::path::Path;

/// A document store that keeps every collection in memory.
///
/// Opened with [`MemoryStore::open`], committed state is also written to
/// a snapshot in a locked data directory after every successful write,
/// so it survives restarts.
///
/// # Example
///
/// ```rust,ignore
/// use docset_store::{DocumentStore, Filter, MemoryStore};
///
/// let store = MemoryStore::new();
/// let session = store.begin()?;
/// store.apply(Some(&session), &ops)?;
/// store.commit(&session)?;
/// let docs = store.find(None, "base.user", &Filter::all())?;
/// ```
#[derive(Debug)]
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    next_session: AtomicU64,
    config: StoreConfig,
    #[cfg(feature = "std")]
    dir: Option<DataDir>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, non-persistent store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            catalog: RwLock::new(Catalog::default()),
            next_session: AtomicU64::new(1),
            config: StoreConfig::default(),
            #[cfg(feature = "std")]
            dir: None,
        }
    }

    /// Opens a persistent store in `path`, loading the last snapshot.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another process has the directory open, and
    /// `Corrupted` if the snapshot fails its checksum.
    #[cfg(feature = "std")]
    pub fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let dir = DataDir::open(path, config.create_if_missing)?;
        let catalog = dir.load()?.unwrap_or_default();
        info!(
            path = %path.display(),
            collections = catalog.collections.len(),
            "opened document store"
        );
        Ok(Self {
            catalog: RwLock::new(catalog),
            next_session: AtomicU64::new(1),
            config,
            dir: Some(dir),
        })
    }

    /// Returns the names of every collection that has been written.
    #[must_use]
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.catalog.read().collections.keys().cloned().collect();
        names.sort();
        names
    }

    #[cfg(feature = "std")]
    fn persist(&self, catalog: &Catalog) -> StoreResult<()> {
        if let Some(dir) = &self.dir {
            dir.save(catalog, self.config.sync_on_commit)?;
            debug!(path = %dir.path().display(), "snapshot saved");
        }
        Ok(())
    }

    #[cfg(not(feature = "std"))]
    fn persist(&self, _catalog: &Catalog) -> StoreResult<()> {
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn find(
        &self,
        session: Option<&Session>,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<Vec<Document>> {
        if let Some(session) = session {
            let inner = session.lock();
            inner.ensure_active()?;
            if let Some(data) = inner.overlay.get(collection) {
                return Ok(data.find(filter));
            }
        }
        let catalog = self.catalog.read();
        Ok(catalog
            .collection(collection)
            .map(|data| data.find(filter))
            .unwrap_or_default())
    }

    fn count(
        &self,
        session: Option<&Session>,
        collection: &str,
        filter: &Filter,
    ) -> StoreResult<usize> {
        if let Some(session) = session {
            let inner = session.lock();
            inner.ensure_active()?;
            if let Some(data) = inner.overlay.get(collection) {
                return Ok(data.count(filter));
            }
        }
        let catalog = self.catalog.read();
        Ok(catalog
            .collection(collection)
            .map_or(0, |data| data.count(filter)))
    }

    fn apply(&self, session: Option<&Session>, ops: &[WriteOp]) -> StoreResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        match session {
            Some(session) => {
                let mut inner = session.lock();
                inner.ensure_active()?;
                let committed = self.catalog.read();
                apply_ops(&mut inner.overlay, &committed.indexes, ops, |name| {
                    committed.collections.get(name).cloned()
                })?;
                inner.log.extend_from_slice(ops);
                Ok(())
            }
            None => {
                let mut catalog = self.catalog.write();
                catalog.apply(ops)?;
                self.persist(&catalog)
            }
        }
    }

    fn ensure_index(&self, spec: IndexSpec) -> StoreResult<()> {
        let mut catalog = self.catalog.write();
        let before = catalog.indexes.len();
        catalog.add_index(spec)?;
        if catalog.indexes.len() != before {
            self.persist(&catalog)?;
        }
        Ok(())
    }

    fn begin(&self) -> StoreResult<Session> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, "session opened");
        Ok(Session::new(id))
    }

    fn commit(&self, session: &Session) -> StoreResult<()> {
        let mut inner = session.lock();
        inner.ensure_active()?;
        let log = std::mem::take(&mut inner.log);
        let result = {
            let mut catalog = self.catalog.write();
            catalog
                .apply(&log)
                .and_then(|()| if log.is_empty() { Ok(()) } else { self.persist(&catalog) })
        };
        match result {
            Ok(()) => {
                inner.mark(SessionState::Committed);
                debug!(session = inner.id(), writes = log.len(), "session committed");
                Ok(())
            }
            Err(e) => {
                inner.mark(SessionState::Aborted);
                warn!(error = %e, "session commit failed, aborted");
                Err(e)
            }
        }
    }

    fn abort(&self, session: &Session) -> StoreResult<()> {
        let mut inner = session.lock();
        inner.ensure_active()?;
        let discarded = inner.log.len();
        inner.mark(SessionState::Aborted);
        debug!(session = inner.id(), writes = discarded, "session aborted");
        Ok(())
    }
}
