//! Transaction management.
//!
//! Units of work run through a [`TransactionManager`]. The first `run_with_*`
//! call on a chain opens a session, begins, and later commits or rolls back
//! and closes it; calls nested inside it join that same session.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │   (active session slot, owner/participant, cleanup)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │   Session   │       │ Repository  │       │ Repository  │
//!  │   Factory   │       │   Factory   │       │   Context   │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use studydb::store::GitStore;
//! use studydb::repository::{RepositoryError, TopicRepository};
//!
//! let store = GitStore::open(StoreConfig::new("./data"))?;
//! let manager = store.transaction_manager();
//!
//! manager.run_with_repository_context(|repos| {
//!     repos.topic_repository().save(&topic)?;
//!     // joins the same transaction
//!     manager.run_with_session_repository(|sessions| sessions.save(&session))?;
//!     Ok::<_, RepositoryError>(())
//! })?;
//! ```

mod context;
mod error;
mod manager;
mod session;

pub use context::RepositoryContext;
pub use error::{TransactionError, TransactionResult};
pub use manager::TransactionManager;
pub use session::{SessionFactory, StoreSession};
