//! Storage layer error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{CollectionName, DocumentKey, InvalidNameError};

/// Errors raised by the git-backed document store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("document not found: {collection}/{key}")]
    DocumentNotFound {
        collection: CollectionName,
        key: DocumentKey,
    },

    #[error("document already exists: {collection}/{key}")]
    DocumentAlreadyExists {
        collection: CollectionName,
        key: DocumentKey,
    },

    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// A compare-and-swap on a branch lost against another writer.
    #[error("concurrent modification: branch {branch} was updated by another transaction")]
    ConcurrentModification { branch: String },

    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    #[error("unexpected entry type at {path}: expected {expected}")]
    UnexpectedEntryType { path: PathBuf, expected: &'static str },

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    #[error("repository is empty: no commits found")]
    EmptyRepository,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::DocumentNotFound { .. }
                | StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::DocumentAlreadyExists { .. }
                | StorageError::BranchAlreadyExists(_)
                | StorageError::ConcurrentModification { .. }
        )
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
