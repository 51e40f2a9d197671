//! Git repository wrapper.
//!
//! The one place that owns a `git2::Repository`. Everything above the storage
//! layer goes through [`GitRepository`], which serializes access behind a
//! mutex so handles can be shared across threads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;

use crate::storage::commit::{self, CommitBuilder, CommitInfo, CommitMessage, MergeOutcome};
use crate::storage::document::{self, Document};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::tree::TreeMutator;
use crate::storage::types::{BranchName, CollectionName, CommitId, DocumentKey, GitSignature};

/// Shared handle to the git repository backing a store.
///
/// Cloning is cheap and yields a handle to the same repository.
#[derive(Clone)]
pub struct GitRepository {
    inner: Arc<GitRepositoryInner>,
}

struct GitRepositoryInner {
    repo: Mutex<Repository>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    pub fn open(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo =
            Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::wrap(repo, path, signature))
    }

    /// Initialize a repository with an empty initial commit on `main`.
    pub fn init(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        let storage = Self::wrap(Repository::init(path)?, path, signature);

        storage.with_repo(|repo| {
            let initial = commit::create_initial_commit(repo, &storage.inner.signature)?;
            RefManager::init_main_branch(repo, initial)
        })?;
        Ok(storage)
    }

    pub fn open_or_init(path: impl AsRef<Path>, signature: GitSignature) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path, signature)
        } else {
            Self::init(path, signature)
        }
    }

    fn wrap(repo: Repository, path: &Path, signature: GitSignature) -> Self {
        Self {
            inner: Arc::new(GitRepositoryInner {
                repo: Mutex::new(repo),
                path: path.to_path_buf(),
                signature,
            }),
        }
    }

    /// Run `f` with exclusive access to the underlying repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.inner.repo.lock();
        f(&repo)
    }

    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(RefManager::head_commit)
    }

    // ==================== Document Reads ====================

    pub fn read_document(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
        at: CommitId,
    ) -> StorageResult<Option<Document>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let Some(blob_id) = tree.document_blob_id(repo, collection, key)? else {
                return Ok(None);
            };
            let bytes = document::read_blob(repo, blob_id)?;
            Ok(Some(document::deserialize_document(&bytes, key)?))
        })
    }

    pub fn list_collections(&self, at: CommitId) -> StorageResult<Vec<CollectionName>> {
        self.with_repo(|repo| Ok(commit::get_tree_at_commit(repo, at)?.list_collections()))
    }

    /// Every document of a collection, in key order.
    pub fn scan_collection(
        &self,
        collection: &CollectionName,
        at: CommitId,
    ) -> StorageResult<Vec<Document>> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let keys = tree.list_documents(repo, collection)?;

            let mut documents = Vec::with_capacity(keys.len());
            for key in keys {
                let blob_id = tree
                    .document_blob_id(repo, collection, &key)?
                    .ok_or_else(|| StorageError::DocumentNotFound {
                        collection: collection.clone(),
                        key: key.clone(),
                    })?;
                let bytes = document::read_blob(repo, blob_id)?;
                documents.push(document::deserialize_document(&bytes, &key)?);
            }
            Ok(documents)
        })
    }

    // ==================== Document Writes ====================
    //
    // Each write produces one commit whose parent is `at` and returns its id.
    // No ref moves; the caller decides which branch to advance.

    pub fn insert_document(
        &self,
        collection: &CollectionName,
        document: &Document,
        at: CommitId,
        session_id: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            if tree.document_exists(repo, collection, &document.key)? {
                return Err(StorageError::DocumentAlreadyExists {
                    collection: collection.clone(),
                    key: document.key.clone(),
                });
            }

            let blob_id = document::write_blob(repo, document)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.upsert_document(collection, &document.key, blob_id)?;

            CommitBuilder::new(repo)
                .tree(mutator.write()?)
                .parent(at)
                .message(CommitMessage::insert(
                    collection.as_str(),
                    document.key.as_str(),
                    session_id,
                ))
                .signature(self.inner.signature.clone())
                .commit()
        })
    }

    pub fn update_document(
        &self,
        collection: &CollectionName,
        document: &Document,
        at: CommitId,
        session_id: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            if !tree.document_exists(repo, collection, &document.key)? {
                return Err(StorageError::DocumentNotFound {
                    collection: collection.clone(),
                    key: document.key.clone(),
                });
            }

            let blob_id = document::write_blob(repo, document)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.upsert_document(collection, &document.key, blob_id)?;

            CommitBuilder::new(repo)
                .tree(mutator.write()?)
                .parent(at)
                .message(CommitMessage::update(
                    collection.as_str(),
                    document.key.as_str(),
                    session_id,
                ))
                .signature(self.inner.signature.clone())
                .commit()
        })
    }

    pub fn delete_document(
        &self,
        collection: &CollectionName,
        key: &DocumentKey,
        at: CommitId,
        session_id: &str,
    ) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            let tree = commit::get_tree_at_commit(repo, at)?;
            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            mutator.delete_document(collection, key)?;

            CommitBuilder::new(repo)
                .tree(mutator.write()?)
                .parent(at)
                .message(CommitMessage::delete(
                    collection.as_str(),
                    key.as_str(),
                    session_id,
                ))
                .signature(self.inner.signature.clone())
                .commit()
        })
    }

    // ==================== Branches ====================

    pub fn create_transaction_branch(
        &self,
        session_id: &str,
        base: CommitId,
    ) -> StorageResult<BranchName> {
        let branch = BranchName::for_session(session_id);
        self.with_repo(|repo| RefManager::create_branch(repo, &branch, base))?;
        Ok(branch)
    }

    pub fn update_branch(&self, branch: &BranchName, target: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::update_branch(repo, branch, target))
    }

    pub fn delete_branch(&self, branch: &BranchName) -> StorageResult<()> {
        self.with_repo(|repo| RefManager::delete_branch(repo, branch))
    }

    pub fn branch_exists(&self, branch: &BranchName) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(RefManager::branch_exists(repo, branch)))
    }

    pub fn list_transaction_branches(&self) -> StorageResult<Vec<BranchName>> {
        self.with_repo(RefManager::list_transaction_branches)
    }

    // ==================== Publishing ====================

    /// Move `main` from `expected_main` to `tx_tip`.
    ///
    /// Fails with [`StorageError::ConcurrentModification`] if `main` has moved.
    pub fn fast_forward_main(&self, expected_main: CommitId, tx_tip: CommitId) -> StorageResult<()> {
        self.with_repo(|repo| {
            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), expected_main, tx_tip)
        })
    }

    /// Merge `tx_tip` into `main_head` and move `main` to the merge commit.
    ///
    /// Conflicting paths come back as `Err(paths)` and leave `main` untouched.
    pub fn merge_into_main(
        &self,
        main_head: CommitId,
        tx_tip: CommitId,
        session_id: &str,
    ) -> StorageResult<Result<CommitId, Vec<PathBuf>>> {
        self.with_repo(|repo| {
            let tree_id = match commit::merge_trees(repo, tx_tip, main_head)? {
                MergeOutcome::Clean(tree_id) => tree_id,
                MergeOutcome::Conflicts(paths) => return Ok(Err(paths)),
            };

            let merged = CommitBuilder::new(repo)
                .tree(tree_id)
                .parent(main_head)
                .parent(tx_tip)
                .message(CommitMessage::transaction_commit(session_id))
                .signature(self.inner.signature.clone())
                .commit()?;

            RefManager::update_branch_if_unchanged(repo, &BranchName::main(), main_head, merged)?;
            Ok(Ok(merged))
        })
    }

    pub fn history(&self, from: CommitId, limit: usize) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| commit::HistoryIterator::new(repo, from)?.take(limit).collect())
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("path", &self.inner.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path(), GitSignature::default()).unwrap();
        (dir, repo)
    }

    fn topics() -> CollectionName {
        CollectionName::new("topics").unwrap()
    }

    fn doc(key: &str, name: &str) -> Document {
        Document::from_record(DocumentKey::new(key).unwrap(), &json!({ "name": name })).unwrap()
    }

    #[test]
    fn test_open_or_init_reopens_same_head() {
        let dir = TempDir::new().unwrap();
        let first = GitRepository::open_or_init(dir.path(), GitSignature::default()).unwrap();
        let head = first.head().unwrap();
        drop(first);

        let second = GitRepository::open_or_init(dir.path(), GitSignature::default()).unwrap();
        assert_eq!(second.head().unwrap(), head);
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::open(dir.path().join("nope"), GitSignature::default());
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_document_crud() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        let key = DocumentKey::new("t1").unwrap();

        let head = repo.insert_document(&topics(), &doc("t1", "Traits"), head, "s1").unwrap();
        let stored = repo.read_document(&topics(), &key, head).unwrap().unwrap();
        assert_eq!(stored.get("name"), Some(&json!("Traits")));

        let updated = stored.with_record(&json!({ "name": "Generics" })).unwrap();
        let head = repo.update_document(&topics(), &updated, head, "s1").unwrap();
        let stored = repo.read_document(&topics(), &key, head).unwrap().unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.get("name"), Some(&json!("Generics")));

        let head = repo.delete_document(&topics(), &key, head, "s1").unwrap();
        assert!(repo.read_document(&topics(), &key, head).unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_and_update_missing() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        let head = repo.insert_document(&topics(), &doc("t1", "a"), head, "s1").unwrap();

        let duplicate = repo.insert_document(&topics(), &doc("t1", "b"), head, "s1");
        assert!(matches!(duplicate, Err(StorageError::DocumentAlreadyExists { .. })));

        let missing = repo.update_document(&topics(), &doc("t2", "b"), head, "s1");
        assert!(matches!(missing, Err(StorageError::DocumentNotFound { .. })));

        let gone = repo.delete_document(&topics(), &DocumentKey::new("t2").unwrap(), head, "s1");
        assert!(matches!(gone, Err(StorageError::DocumentNotFound { .. })));
    }

    #[test]
    fn test_scan_collection_in_key_order() {
        let (_dir, repo) = setup();
        let mut head = repo.head().unwrap();
        for key in ["c", "a", "b"] {
            head = repo.insert_document(&topics(), &doc(key, key), head, "s1").unwrap();
        }

        assert_eq!(repo.list_collections(head).unwrap(), vec![topics()]);
        let keys: Vec<_> = repo
            .scan_collection(&topics(), head)
            .unwrap()
            .into_iter()
            .map(|d| d.key.as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_writes_do_not_move_main() {
        let (_dir, repo) = setup();
        let head = repo.head().unwrap();
        let written = repo.insert_document(&topics(), &doc("t1", "a"), head, "s1").unwrap();

        assert_ne!(written, head);
        assert_eq!(repo.head().unwrap(), head);
    }

    #[test]
    fn test_fast_forward_and_stale_fast_forward() {
        let (_dir, repo) = setup();
        let base = repo.head().unwrap();
        let tip = repo.insert_document(&topics(), &doc("t1", "a"), base, "s1").unwrap();

        repo.fast_forward_main(base, tip).unwrap();
        assert_eq!(repo.head().unwrap(), tip);

        let other = repo.insert_document(&topics(), &doc("t2", "b"), base, "s2").unwrap();
        let stale = repo.fast_forward_main(base, other);
        assert!(matches!(stale, Err(StorageError::ConcurrentModification { .. })));
    }

    #[test]
    fn test_merge_into_main() {
        let (_dir, repo) = setup();
        let base = repo.head().unwrap();
        let first = repo.insert_document(&topics(), &doc("t1", "a"), base, "s1").unwrap();
        let second = repo.insert_document(&topics(), &doc("t2", "b"), base, "s2").unwrap();
        repo.fast_forward_main(base, first).unwrap();

        let merged = repo.merge_into_main(first, second, "s2").unwrap().unwrap();
        assert_eq!(repo.head().unwrap(), merged);
        assert_eq!(repo.scan_collection(&topics(), merged).unwrap().len(), 2);

        let log = repo.history(merged, 1).unwrap();
        assert!(log[0].is_merge());
    }

    #[test]
    fn test_merge_into_main_reports_conflicts() {
        let (_dir, repo) = setup();
        let base = repo.head().unwrap();
        let first = repo.insert_document(&topics(), &doc("t1", "a"), base, "s1").unwrap();
        let second = repo.insert_document(&topics(), &doc("t1", "b"), base, "s2").unwrap();
        repo.fast_forward_main(base, first).unwrap();

        let paths = repo.merge_into_main(first, second, "s2").unwrap().unwrap_err();
        assert_eq!(paths, vec![PathBuf::from("topics/t1.json")]);
        assert_eq!(repo.head().unwrap(), first);
    }
}
