//! The persistence session seam.
//!
//! The manager drives any store that can hand out sessions with this
//! lifecycle. [`crate::store::GitStore`] is the shipped implementation; the
//! manager tests use recording mocks.

use crate::transaction::error::TransactionResult;

/// One unit of persistence work against a store.
///
/// Lifecycle: `begin`, then exactly one of `commit` or `rollback`, then
/// `close`. All methods take `&self` so a session can be shared by the
/// manager, the repositories bound to it and the caller at once.
pub trait StoreSession {
    /// Stable identifier, used in logs.
    fn id(&self) -> &str;

    fn begin(&self) -> TransactionResult<()>;

    fn commit(&self) -> TransactionResult<()>;

    fn rollback(&self) -> TransactionResult<()>;

    /// True while a transaction is open and can still be rolled back.
    fn is_active(&self) -> bool;

    /// Release the session. Must be called exactly once.
    fn close(&self) -> TransactionResult<()>;
}

/// Produces fresh sessions on demand.
pub trait SessionFactory {
    type Session: StoreSession;

    fn open_session(&self) -> TransactionResult<Self::Session>;
}
