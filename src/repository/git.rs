//! Repositories over a [`GitSession`].
//!
//! Topics live in the `topics` collection and study sessions in
//! `study_sessions`, one JSON document per record keyed by the record id.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{Difficulty, StudySession, StudySessionId, Topic, TopicId};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::{RepositoryFactory, SessionRepository, TopicRepository};
use crate::storage::{CollectionName, Document, DocumentKey};
use crate::store::GitSession;

const TOPICS: &str = "topics";
const STUDY_SESSIONS: &str = "study_sessions";

/// Typed access to one collection through a session.
struct Collection<T> {
    session: Arc<GitSession>,
    name: &'static str,
    entity: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    fn new(session: &Arc<GitSession>, name: &'static str, entity: &'static str) -> Self {
        Self {
            session: Arc::clone(session),
            name,
            entity,
            _record: PhantomData,
        }
    }

    fn collection(&self) -> RepositoryResult<CollectionName> {
        Ok(CollectionName::new(self.name)?)
    }

    fn not_found(&self, id: &str) -> RepositoryError {
        RepositoryError::NotFound {
            entity: self.entity,
            id: id.to_string(),
        }
    }

    fn decode(&self, document: &Document) -> RepositoryResult<T> {
        document.to_record().map_err(|e| RepositoryError::Corrupted {
            entity: self.entity,
            id: document.key.to_string(),
            reason: e.to_string(),
        })
    }

    fn document(&self, id: &str) -> RepositoryResult<Option<Document>> {
        let key = DocumentKey::new(id)?;
        Ok(self.session.read(&self.collection()?, &key)?)
    }

    fn get(&self, id: &str) -> RepositoryResult<T> {
        let document = self.document(id)?.ok_or_else(|| self.not_found(id))?;
        self.decode(&document)
    }

    fn insert(&self, id: &str, record: &T) -> RepositoryResult<()> {
        if self.document(id)?.is_some() {
            return Err(RepositoryError::AlreadyExists {
                entity: self.entity,
                id: id.to_string(),
            });
        }
        let document = Document::from_record(DocumentKey::new(id)?, record)?;
        Ok(self.session.insert(&self.collection()?, &document)?)
    }

    fn replace(&self, id: &str, record: &T) -> RepositoryResult<()> {
        let existing = self.document(id)?.ok_or_else(|| self.not_found(id))?;
        let document = existing.with_record(record)?;
        Ok(self.session.update(&self.collection()?, &document)?)
    }

    fn remove(&self, id: &str) -> RepositoryResult<()> {
        if self.document(id)?.is_none() {
            return Err(self.not_found(id));
        }
        let key = DocumentKey::new(id)?;
        Ok(self.session.delete(&self.collection()?, &key)?)
    }

    fn all(&self) -> RepositoryResult<Vec<T>> {
        self.session
            .scan(&self.collection()?)?
            .iter()
            .map(|document| self.decode(document))
            .collect()
    }

    fn find(&self, predicate: impl Fn(&T) -> bool) -> RepositoryResult<Option<T>> {
        Ok(self.all()?.into_iter().find(|record| predicate(record)))
    }
}

pub struct GitTopicRepository {
    topics: Collection<Topic>,
}

impl GitTopicRepository {
    pub fn new(session: &Arc<GitSession>) -> Self {
        Self {
            topics: Collection::new(session, TOPICS, "topic"),
        }
    }

    /// The session this repository is bound to.
    pub fn session(&self) -> &Arc<GitSession> {
        &self.topics.session
    }
}

impl TopicRepository for GitTopicRepository {
    fn find_by_id(&self, id: &TopicId) -> RepositoryResult<Topic> {
        self.topics.get(id.as_str())
    }

    fn save(&self, topic: &Topic) -> RepositoryResult<()> {
        self.topics.insert(topic.id.as_str(), topic)
    }

    fn update(&self, topic: &Topic) -> RepositoryResult<()> {
        self.topics.replace(topic.id.as_str(), topic)
    }

    fn delete(&self, id: &TopicId) -> RepositoryResult<()> {
        self.topics.remove(id.as_str())
    }

    fn find_all(&self) -> RepositoryResult<Vec<Topic>> {
        self.topics.all()
    }

    fn find_by_name_description_and_difficulty(
        &self,
        name: &str,
        description: &str,
        difficulty: Difficulty,
    ) -> RepositoryResult<Option<Topic>> {
        self.topics.find(|topic| {
            topic.name == name && topic.description == description && topic.difficulty == difficulty
        })
    }
}

pub struct GitSessionRepository {
    sessions: Collection<StudySession>,
}

impl GitSessionRepository {
    pub fn new(session: &Arc<GitSession>) -> Self {
        Self {
            sessions: Collection::new(session, STUDY_SESSIONS, "study session"),
        }
    }

    pub fn session(&self) -> &Arc<GitSession> {
        &self.sessions.session
    }
}

impl SessionRepository for GitSessionRepository {
    fn find_by_id(&self, id: &StudySessionId) -> RepositoryResult<StudySession> {
        self.sessions.get(id.as_str())
    }

    fn save(&self, session: &StudySession) -> RepositoryResult<()> {
        self.sessions.insert(session.id.as_str(), session)
    }

    fn update(&self, session: &StudySession) -> RepositoryResult<()> {
        self.sessions.replace(session.id.as_str(), session)
    }

    fn delete(&self, id: &StudySessionId) -> RepositoryResult<()> {
        self.sessions.remove(id.as_str())
    }

    fn find_all(&self) -> RepositoryResult<Vec<StudySession>> {
        self.sessions.all()
    }

    fn find_by_date_duration_and_note(
        &self,
        date: NaiveDate,
        duration_minutes: u32,
        note: &str,
    ) -> RepositoryResult<Option<StudySession>> {
        self.sessions.find(|session| {
            session.date == date
                && session.duration_minutes == duration_minutes
                && session.note == note
        })
    }
}

/// Builds the git repositories over a [`GitSession`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRepositories;

impl RepositoryFactory<GitSession> for GitRepositories {
    type Topics = GitTopicRepository;
    type Sessions = GitSessionRepository;

    fn topic_repository(&self, session: &Arc<GitSession>) -> GitTopicRepository {
        GitTopicRepository::new(session)
    }

    fn session_repository(&self, session: &Arc<GitSession>) -> GitSessionRepository {
        GitSessionRepository::new(session)
    }
}
