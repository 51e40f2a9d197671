//! Repository error types.

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError};
use crate::transaction::TransactionError;

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },

    /// A stored document no longer decodes into its record type.
    #[error("corrupted {entity} {id}: {reason}")]
    Corrupted {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("invalid id: {0}")]
    InvalidId(#[from] InvalidNameError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        match self {
            RepositoryError::NotFound { .. } => true,
            RepositoryError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Lifecycle error underneath this one, if any.
    pub fn as_transaction_error(&self) -> Option<&TransactionError> {
        match self {
            RepositoryError::Transaction(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display_and_classification() {
        let err = RepositoryError::NotFound {
            entity: "topic",
            id: "t1".to_string(),
        };
        assert_eq!(err.to_string(), "topic not found: t1");
        assert!(err.is_not_found());
        assert!(err.as_transaction_error().is_none());
    }

    #[test]
    fn test_wraps_transaction_errors() {
        let err: RepositoryError = TransactionError::NoActiveSession.into();
        assert!(matches!(
            err.as_transaction_error(),
            Some(TransactionError::NoActiveSession)
        ));
    }
}
