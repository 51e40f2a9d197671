//! Transaction error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors raised by the transaction lifecycle, never by business code.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The current chain holds no session.
    #[error("no active session: not inside a transaction")]
    NoActiveSession,

    /// Operation needs an active transaction but the session is elsewhere in
    /// its lifecycle.
    #[error("session {session} is not active (state: {state})")]
    NotActive { session: String, state: String },

    #[error("session {0} is already closed")]
    SessionClosed(String),

    /// Another transaction changed the same documents first.
    #[error("transaction conflict on paths: {}", paths_display(.paths))]
    Conflict { paths: Vec<PathBuf> },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("internal transaction error: {0}")]
    Internal(String),
}

fn paths_display(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl TransactionError {
    /// Whether running the same unit of work again could succeed.
    ///
    /// Classification only; the manager never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Conflict { .. } => true,
            TransactionError::Storage(e) => e.is_retriable(),
            _ => false,
        }
    }

    pub fn conflict(paths: Vec<PathBuf>) -> Self {
        Self::Conflict { paths }
    }

    pub(crate) fn not_active(session: &str, state: impl std::fmt::Display) -> Self {
        Self::NotActive {
            session: session.to_string(),
            state: state.to_string(),
        }
    }
}
