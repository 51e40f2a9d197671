//! studydb - transactional units of work over a git-backed document store
//!
//! A [`TransactionManager`](transaction::TransactionManager) runs closures
//! inside a transaction: the outermost call opens and begins a session,
//! commits on success, rolls back on failure and always closes; nested calls
//! on the same manager join the running transaction. Topics and study
//! sessions are stored as JSON documents in a git repository, one commit per
//! write on a per-transaction branch that is published to `main` on commit.
//!
//! # Example
//!
//! ```no_run
//! use studydb::config::StoreConfig;
//! use studydb::domain::{Difficulty, Topic};
//! use studydb::repository::{RepositoryError, SessionRepository, TopicRepository};
//! use studydb::store::GitStore;
//!
//! let store = GitStore::open(StoreConfig::new("./study-data")).unwrap();
//! let manager = store.transaction_manager();
//!
//! let topic = Topic::new("Ownership", "moves and borrows", Difficulty::Beginner);
//! manager
//!     .run_with_repository_context(|repos| {
//!         repos.topic_repository().save(&topic)?;
//!         let known = manager.run_with_session_repository(|sessions| sessions.find_all())?;
//!         Ok::<_, RepositoryError>(known.len())
//!     })
//!     .unwrap();
//! ```

pub mod config;
pub mod domain;
pub mod repository;
pub mod storage;
pub mod store;
pub mod transaction;
