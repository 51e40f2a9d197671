//! Transaction manager - demarcates units of work.
//!
//! The TransactionManager wraps caller closures in a transaction. It handles:
//! - Opening and beginning a session when no transaction is running
//! - Joining the running transaction when one is
//! - Commit on success, rollback on failure, close always
//! - Cleanup when a unit of work panics

use std::cell::RefCell;
use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::repository::RepositoryFactory;
use crate::transaction::context::RepositoryContext;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::session::{SessionFactory, StoreSession};

/// Runs units of work inside one transaction per logical call chain.
///
/// The manager value *is* the chain: it holds the active session slot, and
/// any `run_with_*` call made through it while the slot is filled joins the
/// running transaction instead of starting a new one. The slot lives in a
/// `RefCell`, so a manager is `Send` but not `Sync`; use [`detach`] to get a
/// manager for another thread or an independent chain.
///
/// [`detach`]: TransactionManager::detach
pub struct TransactionManager<F, R>
where
    F: SessionFactory,
{
    factory: Arc<F>,
    repositories: Arc<R>,
    slot: RefCell<Option<Arc<F::Session>>>,
}

impl<F, R> TransactionManager<F, R>
where
    F: SessionFactory,
    R: RepositoryFactory<F::Session>,
{
    pub fn new(factory: F, repositories: R) -> Self {
        Self {
            factory: Arc::new(factory),
            repositories: Arc::new(repositories),
            slot: RefCell::new(None),
        }
    }

    /// A manager over the same factories with an empty slot.
    pub fn detach(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            repositories: Arc::clone(&self.repositories),
            slot: RefCell::new(None),
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The session of the running transaction.
    ///
    /// Fails with [`TransactionError::NoActiveSession`] outside a transaction
    /// and never opens one.
    pub fn current_session(&self) -> TransactionResult<Arc<F::Session>> {
        self.slot
            .borrow()
            .as_ref()
            .map(Arc::clone)
            .ok_or(TransactionError::NoActiveSession)
    }

    /// Run `work` against the chain's session.
    ///
    /// The outermost call owns the transaction: it opens and begins a
    /// session, commits when `work` returns `Ok`, rolls back when it returns
    /// `Err` and the session is still active, and always closes the session.
    /// Nested calls on the same manager join that session and leave its
    /// lifecycle to the owner.
    ///
    /// The error from `work` or from commit is returned as is. A failed
    /// rollback is logged and never replaces it, and a failed close is only
    /// returned when everything before it succeeded.
    pub fn run_with_session<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce(&F::Session) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.run_bound(
            |session: &Arc<F::Session>| Arc::clone(session),
            |session: &Arc<F::Session>| work(&**session),
        )
    }

    /// Run `work` with a topic repository bound to the chain's session.
    ///
    /// Same transaction and error rules as [`run_with_session`](Self::run_with_session).
    pub fn run_with_topic_repository<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce(&R::Topics) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.run_bound(|session| self.repositories.topic_repository(session), work)
    }

    /// Run `work` with a study session repository bound to the chain's session.
    ///
    /// Same transaction and error rules as [`run_with_session`](Self::run_with_session).
    pub fn run_with_session_repository<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce(&R::Sessions) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.run_bound(|session| self.repositories.session_repository(session), work)
    }

    /// Run `work` with both repositories bound to one session, so writes
    /// through either commit or roll back together.
    ///
    /// Same transaction and error rules as [`run_with_session`](Self::run_with_session).
    pub fn run_with_repository_context<T, E, W>(&self, work: W) -> Result<T, E>
    where
        W: FnOnce(&RepositoryContext<R::Topics, R::Sessions>) -> Result<T, E>,
        E: From<TransactionError>,
    {
        self.run_bound(
            |session| {
                RepositoryContext::new(
                    self.repositories.topic_repository(session),
                    self.repositories.session_repository(session),
                )
            },
            work,
        )
    }

    /// Run `work` with a capability built by `bind` over the chain's session,
    /// owning the transaction if none is running yet.
    fn run_bound<C, T, E, B, W>(&self, bind: B, work: W) -> Result<T, E>
    where
        B: FnOnce(&Arc<F::Session>) -> C,
        W: FnOnce(&C) -> Result<T, E>,
        E: From<TransactionError>,
    {
        // The borrow must end before `work` runs; nested calls borrow again.
        let joined = self.slot.borrow().as_ref().map(Arc::clone);
        match joined {
            Some(session) => {
                trace!(session = %session.id(), "joining active transaction");
                let capability = bind(&session);
                work(&capability)
            }
            None => self.run_as_owner(bind, work),
        }
    }

    fn run_as_owner<C, T, E, B, W>(&self, bind: B, work: W) -> Result<T, E>
    where
        B: FnOnce(&Arc<F::Session>) -> C,
        W: FnOnce(&C) -> Result<T, E>,
        E: From<TransactionError>,
    {
        let session = Arc::new(self.factory.open_session()?);
        debug!(session = %session.id(), "opened session");

        if let Err(e) = session.begin() {
            warn!(session = %session.id(), error = %e, "begin failed");
            if let Err(close_err) = session.close() {
                error!(session = %session.id(), error = %close_err, "close after failed begin failed");
            }
            return Err(e.into());
        }
        debug!(session = %session.id(), "transaction began");

        *self.slot.borrow_mut() = Some(Arc::clone(&session));
        let owned = OwnedTransaction {
            slot: &self.slot,
            session,
            settled: false,
        };

        let capability = bind(&owned.session);
        let outcome = work(&capability);
        drop(capability);

        let outcome = match outcome {
            Ok(value) => match owned.session.commit() {
                Ok(()) => {
                    debug!(session = %owned.session.id(), "transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    warn!(session = %owned.session.id(), error = %e, "commit failed");
                    Err(E::from(e))
                }
            },
            Err(e) => {
                warn!(session = %owned.session.id(), "unit of work failed");
                Err(e)
            }
        };

        if outcome.is_err() {
            owned.rollback_if_active();
        }

        let session_id = owned.session.id().to_string();
        match (outcome, owned.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(close_err)) => Err(close_err.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                error!(session = %session_id, error = %close_err, "close failed after failed transaction");
                Err(e)
            }
        }
    }
}

impl<F, R> std::fmt::Debug for TransactionManager<F, R>
where
    F: SessionFactory,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = self.slot.borrow().as_ref().map(|s| s.id().to_string());
        f.debug_struct("TransactionManager")
            .field("session", &session)
            .finish()
    }
}

/// The owner's hold on the slot.
///
/// Unless [`OwnedTransaction::close`] ran, dropping it (a panicking unit of
/// work) rolls back if still active, closes the session and clears the slot.
struct OwnedTransaction<'a, S: StoreSession> {
    slot: &'a RefCell<Option<Arc<S>>>,
    session: Arc<S>,
    settled: bool,
}

impl<S: StoreSession> OwnedTransaction<'_, S> {
    fn rollback_if_active(&self) {
        if !self.session.is_active() {
            debug!(session = %self.session.id(), "transaction no longer active, skipping rollback");
            return;
        }
        match self.session.rollback() {
            Ok(()) => warn!(session = %self.session.id(), "transaction rolled back"),
            Err(e) => error!(session = %self.session.id(), error = %e, "rollback failed"),
        }
    }

    fn close(mut self) -> TransactionResult<()> {
        self.settled = true;
        let closed = self.session.close();
        self.slot.borrow_mut().take();
        debug!(session = %self.session.id(), "closed session");
        closed
    }
}

impl<S: StoreSession> Drop for OwnedTransaction<'_, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!(session = %self.session.id(), "unit of work unwound, cleaning up");
        self.rollback_if_active();
        if let Err(e) = self.session.close() {
            error!(session = %self.session.id(), error = %e, "close during unwind failed");
        }
        self.slot.borrow_mut().take();
    }
}
