//! Records persisted by the repositories.
//!
//! Plain data carried into and out of units of work. Business rules over
//! them (validation, mastery arithmetic, progress reporting) live with the
//! callers.

mod study_session;
mod topic;

pub use study_session::{StudySession, StudySessionId};
pub use topic::{Difficulty, Topic, TopicId};
