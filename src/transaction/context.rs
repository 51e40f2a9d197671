//! Both repository capabilities over one session.

/// Topic and study-session repositories bound to the same session.
///
/// Built once when a unit of work starts; the accessors never re-resolve
/// the session.
#[derive(Debug)]
pub struct RepositoryContext<T, S> {
    topics: T,
    sessions: S,
}

impl<T, S> RepositoryContext<T, S> {
    pub(crate) fn new(topics: T, sessions: S) -> Self {
        Self { topics, sessions }
    }

    pub fn topic_repository(&self) -> &T {
        &self.topics
    }

    pub fn session_repository(&self) -> &S {
        &self.sessions
    }
}
