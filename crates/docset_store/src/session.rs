//! Store sessions (transactions).

use crate::collection::CollectionData;
use crate::error::{StoreError, StoreResult};
use crate::op::WriteOp;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// State of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session is active and accepts operations.
    Active,
    /// Session has been committed.
    Committed,
    /// Session has been aborted.
    Aborted,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

/// A handle onto an open store transaction.
///
/// Writes applied through a session are visible to reads issued through
/// the same session and invisible to everyone else until commit. The
/// handle is cheap to clone; clones refer to the same transaction.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<SessionInner>>,
}

pub(crate) struct SessionInner {
    id: u64,
    state: SessionState,
    /// Private copies of every collection this session has written.
    pub(crate) overlay: HashMap<String, CollectionData>,
    /// Operations to replay on commit.
    pub(crate) log: Vec<WriteOp>,
}

impl SessionInner {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn ensure_active(&self) -> StoreResult<()> {
        match self.state {
            SessionState::Active => Ok(()),
            state => Err(StoreError::SessionClosed {
                id: self.id,
                state: state.name(),
            }),
        }
    }

    pub(crate) fn mark(&mut self, state: SessionState) {
        self.state = state;
        self.overlay.clear();
        self.log.clear();
    }
}

impl Session {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                id,
                state: SessionState::Active,
                overlay: HashMap::new(),
                log: Vec::new(),
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock()
    }

    /// Returns the session number.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.lock().id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Checks if the session is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Returns the number of operations staged for commit.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.lock().log.len()
    }

    /// Returns true if both handles refer to the same transaction.
    #[must_use]
    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// The state of a session at one point, restorable with
/// [`Session::rollback_to`].
#[derive(Debug, Clone)]
pub struct Savepoint {
    session: u64,
    overlay: HashMap<String, CollectionData>,
    log_len: usize,
}

impl Session {
    /// Captures the session's uncommitted state.
    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        let inner = self.inner.lock();
        Savepoint {
            session: inner.id,
            overlay: inner.overlay.clone(),
            log_len: inner.log.len(),
        }
    }

    /// Discards every write applied since `savepoint` was taken.
    ///
    /// # Errors
    ///
    /// Returns `SessionClosed` once the session is committed or aborted,
    /// and `ForeignSavepoint` for a savepoint of another session.
    pub fn rollback_to(&self, savepoint: Savepoint) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_active()?;
        if savepoint.session != inner.id {
            return Err(StoreError::ForeignSavepoint {
                savepoint: savepoint.session,
                session: inner.id,
            });
        }
        inner.overlay = savepoint.overlay;
        inner.log.truncate(savepoint.log_len);
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("writes", &inner.log.len())
            .finish()
    }
}
