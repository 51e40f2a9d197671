//! Git-backed document storage.
//!
//! The layers above (store sessions, repositories) go through this API and
//! never touch git2 directly.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │   (documents, collections, branches, publishing to main)    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │    tree     │       │  document   │       │    refs     │
//!  │(collections)│       │   (JSON)    │       │ (branches)  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//!         └─────────────────────┼─────────────────────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │   commit    │
//!                        │  (history)  │
//!                        └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use studydb::storage::{CollectionName, Document, DocumentKey, GitRepository, GitSignature};
//!
//! let repo = GitRepository::open_or_init("./data", GitSignature::default())?;
//! let topics = CollectionName::new("topics")?;
//!
//! let key = DocumentKey::generate();
//! let doc = Document::from_record(key.clone(), &json!({"name": "Ownership"}))?;
//! let tip = repo.insert_document(&topics, &doc, repo.head()?, "manual")?;
//! let stored = repo.read_document(&topics, &key, tip)?;
//! ```

mod commit;
mod document;
mod error;
mod refs;
mod repository;
mod tree;
mod types;

pub use commit::{CommitInfo, CommitMessage};
pub use document::Document;
pub use error::{StorageError, StorageResult};
pub use repository::GitRepository;
pub use types::{
    BlobId, BranchName, CollectionName, CommitId, DocumentKey, DocumentPath, GitSignature,
    InvalidNameError, TreeId,
};
