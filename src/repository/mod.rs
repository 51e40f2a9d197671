//! Repository capabilities consumed inside units of work.
//!
//! A capability is bound to one live session when it is built and never
//! re-resolves it. [`RepositoryFactory`] is how the transaction manager
//! builds capabilities over the session it owns or joins.

mod error;
mod git;

use std::sync::Arc;

use chrono::NaiveDate;

use crate::domain::{Difficulty, StudySession, StudySessionId, Topic, TopicId};

pub use error::{RepositoryError, RepositoryResult};
pub use git::{GitRepositories, GitSessionRepository, GitTopicRepository};

pub trait TopicRepository {
    /// Fails with [`RepositoryError::NotFound`] when absent.
    fn find_by_id(&self, id: &TopicId) -> RepositoryResult<Topic>;

    /// Fails with [`RepositoryError::AlreadyExists`] on a duplicate id.
    fn save(&self, topic: &Topic) -> RepositoryResult<()>;

    fn update(&self, topic: &Topic) -> RepositoryResult<()>;

    fn delete(&self, id: &TopicId) -> RepositoryResult<()>;

    fn find_all(&self) -> RepositoryResult<Vec<Topic>>;

    fn find_by_name_description_and_difficulty(
        &self,
        name: &str,
        description: &str,
        difficulty: Difficulty,
    ) -> RepositoryResult<Option<Topic>>;
}

pub trait SessionRepository {
    /// Fails with [`RepositoryError::NotFound`] when absent.
    fn find_by_id(&self, id: &StudySessionId) -> RepositoryResult<StudySession>;

    /// Fails with [`RepositoryError::AlreadyExists`] on a duplicate id.
    fn save(&self, session: &StudySession) -> RepositoryResult<()>;

    fn update(&self, session: &StudySession) -> RepositoryResult<()>;

    fn delete(&self, id: &StudySessionId) -> RepositoryResult<()>;

    fn find_all(&self) -> RepositoryResult<Vec<StudySession>>;

    fn find_by_date_duration_and_note(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
        note: &str,
    ) -> RepositoryResult<Option<StudySession>>;
}

/// Builds capabilities over a live session of type `S`.
pub trait RepositoryFactory<S> {
    type Topics: TopicRepository;
    type Sessions: SessionRepository;

    fn topic_repository(&self, session: &Arc<S>) -> Self::Topics;

    fn session_repository(&self, session: &Arc<S>) -> Self::Sessions;
}
