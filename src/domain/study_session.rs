use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::domain::TopicId;

/// Lower-case ULID identifying a study session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudySessionId(String);

impl StudySessionId {
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StudySessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for StudySessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One sitting spent on one or more topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudySession {
    pub id: StudySessionId,
    pub date: NaiveDate,
    pub duration_minutes: u32,
    pub note: String,
    #[serde(default)]
    pub topic_ids: Vec<TopicId>,
}

impl StudySession {
    pub fn new(date: NaiveDate, duration_minutes: u32, note: impl Into<String>) -> Self {
        Self {
            id: StudySessionId::generate(),
            date,
            duration_minutes,
            note: note.into(),
            topic_ids: Vec::new(),
        }
    }

    pub fn with_topic(mut self, topic: TopicId) -> Self {
        self.topic_ids.push(topic);
        self
    }
}
