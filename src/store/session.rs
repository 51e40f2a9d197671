//! Git-backed persistence session.
//!
//! A session's transaction lives on its own `tx/{id}` branch. Every write is
//! a commit on that branch; committing publishes the branch tip to `main`,
//! rolling back just deletes the branch.

use std::fmt;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::storage::{BranchName, CollectionName, CommitId, Document, DocumentKey, GitRepository};
use crate::store::GitStore;
use crate::transaction::{StoreSession, TransactionError, TransactionResult};

/// Branch bookkeeping of an open transaction.
#[derive(Debug, Clone)]
struct ActiveTransaction {
    branch: BranchName,
    /// `main` when the transaction began.
    base: CommitId,
    /// Latest commit on the transaction branch.
    tip: CommitId,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Active(ActiveTransaction),
    Committed,
    RolledBack,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Active(_) => "active",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled back",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A session opened by [`GitStore`].
///
/// Lifecycle: idle, then active after `begin`, then committed or rolled
/// back, then closed. Document operations need an active transaction and see
/// `main` as of `begin` plus the session's own writes.
pub struct GitSession {
    id: String,
    store: GitStore,
    state: Mutex<SessionState>,
}

impl GitSession {
    pub(crate) fn new(id: String, store: GitStore) -> Self {
        Self {
            id,
            store,
            state: Mutex::new(SessionState::Idle),
        }
    }

    fn repo(&self) -> &GitRepository {
        &self.store.inner.repo
    }

    /// Current lifecycle state, e.g. `"active"`.
    pub fn state_name(&self) -> String {
        self.state.lock().to_string()
    }

    /// Commit `main` pointed at when the transaction began.
    pub fn base_commit(&self) -> Option<CommitId> {
        match &*self.state.lock() {
            SessionState::Active(tx) => Some(tx.base),
            _ => None,
        }
    }

    fn unusable(&self, state: &SessionState) -> TransactionError {
        match state {
            SessionState::Closed => TransactionError::SessionClosed(self.id.clone()),
            other => TransactionError::not_active(&self.id, other),
        }
    }

    fn with_active<T>(
        &self,
        f: impl FnOnce(&mut ActiveTransaction) -> TransactionResult<T>,
    ) -> TransactionResult<T> {
        let mut state = self.state.lock();
        match &mut *state {
            SessionState::Active(tx) => f(tx),
            other => Err(self.unusable(other)),
        }
    }

    // ==================== Document Operations ====================

    pub fn read(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> TransactionResult<Option<Document>> {
        self.with_active(|tx| Ok(self.repo().read_document(collection, key, tx.tip)?))
    }

    pub fn scan(&self, collection: &CollectionName) -> TransactionResult<Vec<Document>> {
        self.with_active(|tx| Ok(self.repo().scan_collection(collection, tx.tip)?))
    }

    pub fn insert(&self, collection: &CollectionName, document: &Document) -> TransactionResult<()> {
        self.with_active(|tx| {
            let commit = self
                .repo()
                .insert_document(collection, document, tx.tip, &self.id)?;
            self.advance(tx, commit)
        })
    }

    pub fn update(&self, collection: &CollectionName, document: &Document) -> TransactionResult<()> {
        self.with_active(|tx| {
            let commit = self
                .repo()
                .update_document(collection, document, tx.tip, &self.id)?;
            self.advance(tx, commit)
        })
    }

    pub fn delete(&self, collection: &CollectionName, key: &DocumentKey) -> TransactionResult<()> {
        self.with_active(|tx| {
            let commit = self
                .repo()
                .delete_document(collection, key, tx.tip, &self.id)?;
            self.advance(tx, commit)
        })
    }

    fn advance(&self, tx: &mut ActiveTransaction, commit: CommitId) -> TransactionResult<()> {
        self.repo().update_branch(&tx.branch, commit)?;
        tx.tip = commit;
        Ok(())
    }

    /// Publish the transaction tip to `main`.
    ///
    /// Caller holds the store's commit lock.
    fn publish(&self, tx: &ActiveTransaction) -> TransactionResult<Option<Vec<std::path::PathBuf>>> {
        if tx.tip == tx.base {
            return Ok(None);
        }

        let main = self.repo().head()?;
        if main == tx.base {
            self.repo().fast_forward_main(tx.base, tx.tip)?;
            debug!(session = %self.id, commit = %tx.tip.short(), "fast-forwarded main");
            return Ok(None);
        }

        match self.repo().merge_into_main(main, tx.tip, &self.id)? {
            Ok(merged) => {
                debug!(session = %self.id, commit = %merged.short(), "merged into main");
                Ok(None)
            }
            Err(paths) => Ok(Some(paths)),
        }
    }

    /// Delete the transaction branch once the outcome is settled.
    ///
    /// Failure is logged only: `main` already reflects the outcome, and
    /// `close` or a later sweep removes what is left.
    fn discard_branch(&self, branch: &BranchName) {
        if let Err(e) = self.repo().delete_branch(branch) {
            warn!(session = %self.id, branch = %branch, error = %e, "could not delete transaction branch");
        }
    }
}

impl StoreSession for GitSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn begin(&self) -> TransactionResult<()> {
        let mut state = self.state.lock();
        if !matches!(*state, SessionState::Idle) {
            return Err(self.unusable(&state));
        }

        let base = self.repo().head()?;
        let branch = self.repo().create_transaction_branch(&self.id, base)?;
        debug!(session = %self.id, base = %base.short(), "created transaction branch");

        *state = SessionState::Active(ActiveTransaction {
            branch,
            base,
            tip: base,
        });
        Ok(())
    }

    fn commit(&self) -> TransactionResult<()> {
        let mut state = self.state.lock();
        let tx = match &*state {
            SessionState::Active(tx) => tx.clone(),
            other => return Err(self.unusable(other)),
        };

        let conflicts = {
            let _serialized = self.store.inner.commit_lock.lock();
            self.publish(&tx)?
        };

        if let Some(paths) = conflicts {
            *state = SessionState::RolledBack;
            warn!(session = %self.id, conflicts = paths.len(), "commit conflicted, transaction aborted");
            self.discard_branch(&tx.branch);
            return Err(TransactionError::conflict(paths));
        }

        *state = SessionState::Committed;
        self.discard_branch(&tx.branch);
        Ok(())
    }

    fn rollback(&self) -> TransactionResult<()> {
        let mut state = self.state.lock();
        let tx = match &*state {
            SessionState::Active(tx) => tx.clone(),
            other => return Err(self.unusable(other)),
        };

        *state = SessionState::RolledBack;
        self.repo().delete_branch(&tx.branch)?;
        Ok(())
    }

    fn is_active(&self) -> bool {
        matches!(*self.state.lock(), SessionState::Active(_))
    }

    fn close(&self) -> TransactionResult<()> {
        let mut state = self.state.lock();
        if matches!(*state, SessionState::Closed) {
            return Err(TransactionError::SessionClosed(self.id.clone()));
        }
        *state = SessionState::Closed;
        self.store.unregister(&self.id);

        // Left behind by a failed rollback or an abandoned transaction.
        let branch = BranchName::for_session(&self.id);
        if self.repo().branch_exists(&branch)? {
            debug!(session = %self.id, "deleting leftover transaction branch");
            match self.repo().delete_branch(&branch) {
                Err(e) if !e.is_not_found() => return Err(e.into()),
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for GitSession {
    fn drop(&mut self) {
        if !matches!(*self.state.get_mut(), SessionState::Closed) {
            warn!(session = %self.id, "session dropped without close");
            self.store.unregister(&self.id);
        }
    }
}

impl fmt::Debug for GitSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitSession")
            .field("id", &self.id)
            .field("state", &self.state_name())
            .finish()
    }
}
