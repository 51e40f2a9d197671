//! The git-backed session factory.
//!
//! [`GitStore`] owns the repository, hands out [`GitSession`]s and keeps
//! track of which of them are still open, so branches of sessions that died
//! without closing can be swept.

mod session;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::config::StoreConfig;
use crate::repository::GitRepositories;
use crate::storage::{CommitId, CommitInfo, GitRepository, StorageResult};
use crate::transaction::{SessionFactory, TransactionManager, TransactionResult};

pub use session::GitSession;

/// Manager type returned by [`GitStore::transaction_manager`].
pub type GitTransactionManager = TransactionManager<GitStore, GitRepositories>;

/// Handle to an opened store. Cloning is cheap.
#[derive(Clone)]
pub struct GitStore {
    inner: Arc<GitStoreInner>,
}

struct GitStoreInner {
    repo: GitRepository,
    config: StoreConfig,
    /// Serializes publishing to `main`.
    commit_lock: Mutex<()>,
    /// Ids of sessions not yet closed.
    open: RwLock<HashSet<String>>,
}

impl GitStore {
    pub fn open(config: StoreConfig) -> StorageResult<Self> {
        let repo = if config.create_if_missing {
            GitRepository::open_or_init(&config.path, config.signature.clone())?
        } else {
            GitRepository::open(&config.path, config.signature.clone())?
        };

        let store = Self {
            inner: Arc::new(GitStoreInner {
                repo,
                config,
                commit_lock: Mutex::new(()),
                open: RwLock::new(HashSet::new()),
            }),
        };

        if store.inner.config.cleanup_on_open {
            let swept = store.cleanup_abandoned()?;
            if swept > 0 {
                info!(branches = swept, "removed abandoned transaction branches");
            }
        }
        debug!(path = %store.inner.config.path.display(), "store opened");
        Ok(store)
    }

    pub fn repository(&self) -> &GitRepository {
        &self.inner.repo
    }

    /// A manager with an empty slot over this store and the git repositories.
    pub fn transaction_manager(&self) -> GitTransactionManager {
        TransactionManager::new(self.clone(), GitRepositories)
    }

    pub fn open_session_count(&self) -> usize {
        self.inner.open.read().len()
    }

    pub fn open_sessions(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.open.read().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Delete transaction branches whose session is no longer open.
    ///
    /// These are left behind by processes that died mid-transaction or by
    /// sessions dropped without being closed.
    ///
    /// Only this handle's sessions count as open. Running it while another
    /// [`GitStore`] has the same path open deletes that handle's live
    /// branches; its transactions still commit from their recorded tip, but
    /// rollback then fails and is only logged.
    pub fn cleanup_abandoned(&self) -> StorageResult<usize> {
        // Held for the whole sweep so no session can register and branch
        // off in between.
        let open = self.inner.open.read();

        let mut removed = 0;
        for branch in self.inner.repo.list_transaction_branches()? {
            let Some(session_id) = branch.session_id() else {
                continue;
            };
            if open.contains(session_id) {
                continue;
            }
            self.inner.repo.delete_branch(&branch)?;
            debug!(branch = %branch, "deleted abandoned branch");
            removed += 1;
        }
        Ok(removed)
    }

    /// Tip of `main`.
    pub fn head(&self) -> StorageResult<CommitId> {
        self.inner.repo.head()
    }

    /// The latest `limit` commits reachable from `main`, newest first.
    pub fn history(&self, limit: usize) -> StorageResult<Vec<CommitInfo>> {
        self.inner.repo.history(self.head()?, limit)
    }

    fn unregister(&self, session_id: &str) {
        self.inner.open.write().remove(session_id);
    }
}

impl SessionFactory for GitStore {
    type Session = GitSession;

    fn open_session(&self) -> TransactionResult<GitSession> {
        let id = Ulid::new().to_string().to_lowercase();
        self.inner.open.write().insert(id.clone());
        debug!(session = %id, "session registered");
        Ok(GitSession::new(id, self.clone()))
    }
}

impl std::fmt::Debug for GitStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitStore")
            .field("path", &self.inner.config.path)
            .field("open_sessions", &self.open_session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    use tempfile::TempDir;

    use crate::domain::{Difficulty, StudySession, Topic};
    use crate::repository::{RepositoryError, SessionRepository, TopicRepository};
    use crate::storage::{CollectionName, Document, DocumentKey, StorageError};
    use crate::transaction::{StoreSession, TransactionError};

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn setup() -> (TempDir, GitStore) {
        init_tracing();
        let dir = TempDir::new().unwrap();
        let store = GitStore::open(StoreConfig::new(dir.path())).unwrap();
        (dir, store)
    }

    fn topics() -> CollectionName {
        CollectionName::new("topics").unwrap()
    }

    fn doc(key: &str, name: &str) -> Document {
        Document::from_record(DocumentKey::new(key).unwrap(), &serde_json::json!({ "name": name }))
            .unwrap()
    }

    #[test]
    fn test_open_initializes_main() {
        let (_dir, store) = setup();

        let history = store.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, store.head().unwrap());
        assert_eq!(store.open_session_count(), 0);
    }

    #[test]
    fn test_open_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::new(dir.path().join("missing")).create_if_missing(false);

        let result = GitStore::open(config);
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_session_lifecycle() {
        let (_dir, store) = setup();
        let session = store.open_session().unwrap();
        assert_eq!(store.open_sessions(), vec![session.id().to_string()]);
        assert_eq!(session.state_name(), "idle");
        assert!(!session.is_active());

        session.begin().unwrap();
        assert!(session.is_active());
        assert_eq!(session.base_commit(), Some(store.head().unwrap()));
        assert!(matches!(
            session.begin(),
            Err(TransactionError::NotActive { .. })
        ));

        session.rollback().unwrap();
        assert_eq!(session.state_name(), "rolled back");
        assert!(store.repository().list_transaction_branches().unwrap().is_empty());

        session.close().unwrap();
        assert_eq!(store.open_session_count(), 0);
        assert!(matches!(
            session.close(),
            Err(TransactionError::SessionClosed(_))
        ));
    }

    #[test]
    fn test_writes_need_active_transaction() {
        let (_dir, store) = setup();
        let session = store.open_session().unwrap();

        let before = session.insert(&topics(), &doc("t1", "early"));
        assert!(matches!(before, Err(TransactionError::NotActive { ref state, .. }) if state == "idle"));

        session.begin().unwrap();
        session.commit().unwrap();
        let after = session.scan(&topics());
        assert!(matches!(after, Err(TransactionError::NotActive { ref state, .. }) if state == "committed"));
        session.close().unwrap();
    }

    #[test]
    fn test_commit_without_writes_keeps_main() {
        let (_dir, store) = setup();
        let head = store.head().unwrap();

        let session = store.open_session().unwrap();
        session.begin().unwrap();
        session.commit().unwrap();
        session.close().unwrap();

        assert_eq!(store.head().unwrap(), head);
    }

    #[test]
    fn test_concurrent_disjoint_commits_merge() {
        let (_dir, store) = setup();
        let first = store.open_session().unwrap();
        let second = store.open_session().unwrap();
        first.begin().unwrap();
        second.begin().unwrap();

        first.insert(&topics(), &doc("a", "first")).unwrap();
        second.insert(&topics(), &doc("b", "second")).unwrap();
        assert!(second.read(&topics(), &DocumentKey::new("a").unwrap()).unwrap().is_none());

        first.commit().unwrap();
        second.commit().unwrap();
        first.close().unwrap();
        second.close().unwrap();

        let head = store.head().unwrap();
        assert_eq!(store.repository().scan_collection(&topics(), head).unwrap().len(), 2);
        let latest = &store.history(1).unwrap()[0];
        assert!(latest.is_merge());
        assert!(latest.summary().starts_with("[COMMIT] Transaction"));
    }

    #[test]
    fn test_conflicting_commit_aborts() {
        let (_dir, store) = setup();
        let first = store.open_session().unwrap();
        let second = store.open_session().unwrap();
        first.begin().unwrap();
        second.begin().unwrap();

        first.insert(&topics(), &doc("t1", "first")).unwrap();
        second.insert(&topics(), &doc("t1", "second")).unwrap();
        first.commit().unwrap();
        let head = store.head().unwrap();

        let result = second.commit();
        match result {
            Err(TransactionError::Conflict { paths }) => {
                assert_eq!(paths, vec![std::path::PathBuf::from("topics/t1.json")]);
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(!second.is_active());
        assert_eq!(store.head().unwrap(), head);

        first.close().unwrap();
        second.close().unwrap();
        assert!(store.repository().list_transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_failed_composite_leaves_main_untouched() {
        let (_dir, store) = setup();
        let manager = store.transaction_manager();
        let head = store.head().unwrap();
        let borrow_checker = Topic::new("borrowck", "NLL", Difficulty::Advanced);

        let result: Result<(), RepositoryError> = manager.run_with_repository_context(|repos| {
            repos.topic_repository().save(&borrow_checker)?;
            let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();
            repos
                .session_repository()
                .save(&StudySession::new(date, 20, "two-phase borrows"))?;
            // Fails after both writes.
            repos.topic_repository().save(&borrow_checker)
        });

        assert!(matches!(result, Err(RepositoryError::AlreadyExists { .. })));
        assert_eq!(store.head().unwrap(), head);
        assert_eq!(store.open_session_count(), 0);
        assert!(store.repository().list_transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_threads_get_separate_sessions() {
        let (_dir, store) = setup();
        let barrier = Barrier::new(2);

        let ids: Vec<String> = thread::scope(|scope| {
            let handles: Vec<_> = ["iterators", "generics"]
                .into_iter()
                .map(|name| {
                    let store = &store;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        let manager = store.transaction_manager();
                        manager
                            .run_with_topic_repository(|topics| {
                                topics.save(&Topic::new(name, "", Difficulty::Beginner))?;
                                // Both transactions are open at this point.
                                barrier.wait();
                                Ok::<_, RepositoryError>(topics.session().id().to_string())
                            })
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_ne!(ids[0], ids[1]);
        let all = store
            .transaction_manager()
            .run_with_topic_repository(|topics| topics.find_all())
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.open_session_count(), 0);
    }

    #[test]
    fn test_conflict_surfaces_through_manager() {
        let (_dir, store) = setup();
        let manager = store.transaction_manager();
        let shared = Topic::new("shared", "", Difficulty::Beginner);

        let result: Result<(), RepositoryError> = manager.run_with_topic_repository(|topics| {
            topics.save(&shared)?;
            // Another chain commits the same topic first.
            store
                .transaction_manager()
                .run_with_topic_repository(|other| other.save(&shared))?;
            Ok(())
        });

        match result {
            Err(RepositoryError::Transaction(e)) => {
                assert!(matches!(e, TransactionError::Conflict { .. }));
                assert!(e.is_retryable());
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(store.open_session_count(), 0);
    }

    #[test]
    fn test_cleanup_abandoned_branches() {
        let (dir, store) = setup();
        let head = store.head().unwrap();
        store
            .repository()
            .create_transaction_branch("crashed", head)
            .unwrap();

        let live = store.open_session().unwrap();
        live.begin().unwrap();

        let dropped = store.open_session().unwrap();
        dropped.begin().unwrap();
        drop(dropped);

        assert_eq!(store.cleanup_abandoned().unwrap(), 2);
        let remaining = store.repository().list_transaction_branches().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id(), Some(live.id()));

        live.rollback().unwrap();
        live.close().unwrap();

        store
            .repository()
            .create_transaction_branch("crashed-again", head)
            .unwrap();
        drop(store);
        let reopened = GitStore::open(StoreConfig::new(dir.path())).unwrap();
        assert!(reopened
            .repository()
            .list_transaction_branches()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_commit_succeeds_when_branch_already_removed() {
        let (dir, store) = setup();
        let manager = store.transaction_manager();
        let topic = Topic::new("lifetimes", "elision rules", Difficulty::Advanced);

        let result = manager.run_with_topic_repository(|topics| {
            topics.save(&topic)?;
            // A second handle sweeps this transaction's branch as abandoned.
            let second = GitStore::open(StoreConfig::new(dir.path()))?;
            assert!(second.repository().list_transaction_branches()?.is_empty());
            Ok::<_, RepositoryError>(())
        });

        assert!(result.is_ok(), "commit reported {:?}", result);
        let stored = store
            .transaction_manager()
            .run_with_topic_repository(|topics| topics.find_all())
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "lifetimes");
        assert_eq!(store.open_session_count(), 0);
        assert!(store.repository().list_transaction_branches().unwrap().is_empty());
    }

    #[test]
    fn test_repositories_and_session_repository_in_one_transaction() {
        let (_dir, store) = setup();
        let manager = store.transaction_manager();
        let before = store.history(100).unwrap().len();

        manager
            .run_with_repository_context(|repos| {
                let topic = Topic::new("traits", "dyn and impl", Difficulty::Intermediate);
                repos.topic_repository().save(&topic)?;
                let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 3).unwrap();
                let sitting = StudySession::new(date, 50, "object safety").with_topic(topic.id);
                manager.run_with_session_repository(|sessions| sessions.save(&sitting))
            })
            .unwrap();

        // Two document commits fast-forwarded onto main.
        assert_eq!(store.history(100).unwrap().len(), before + 2);
    }
}
