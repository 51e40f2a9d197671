//! Branch and reference management.
//!
//! `main` holds committed state. Each open transaction writes to its own
//! `tx/{session_id}` branch, which is deleted once the transaction ends.

use git2::{BranchType, ErrorCode, Repository};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BranchName, CommitId};

pub struct RefManager;

impl RefManager {
    pub fn resolve_branch(repo: &Repository, branch: &BranchName) -> StorageResult<CommitId> {
        let reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
        Ok(CommitId::new(commit.id()))
    }

    /// Tip of the branch HEAD points at (always `main` for a studydb store).
    pub fn head_commit(repo: &Repository) -> StorageResult<CommitId> {
        let head = repo.head().map_err(|e| match e.code() {
            ErrorCode::UnbornBranch => StorageError::EmptyRepository,
            _ => StorageError::Git(e),
        })?;
        Ok(CommitId::new(head.peel_to_commit()?.id()))
    }

    pub fn branch_exists(repo: &Repository, branch: &BranchName) -> bool {
        repo.find_reference(&branch.as_ref_path()).is_ok()
    }

    pub fn create_branch(
        repo: &Repository,
        branch: &BranchName,
        target: CommitId,
    ) -> StorageResult<()> {
        if Self::branch_exists(repo, branch) {
            return Err(StorageError::BranchAlreadyExists(branch.to_string()));
        }
        let commit = repo.find_commit(target.raw())?;
        repo.branch(branch.as_str(), &commit, false)?;
        Ok(())
    }

    /// Force-move a branch. Prefer [`RefManager::update_branch_if_unchanged`]
    /// for anything shared between sessions.
    pub fn update_branch(
        repo: &Repository,
        branch: &BranchName,
        target: CommitId,
    ) -> StorageResult<()> {
        let mut reference = repo
            .find_reference(&branch.as_ref_path())
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
        reference.set_target(target.raw(), &format!("move {} to {}", branch, target.short()))?;
        Ok(())
    }

    /// Compare-and-swap: move `branch` to `new_target` only if it still
    /// points at `expected`.
    pub fn update_branch_if_unchanged(
        repo: &Repository,
        branch: &BranchName,
        expected: CommitId,
        new_target: CommitId,
    ) -> StorageResult<()> {
        if Self::resolve_branch(repo, branch)? != expected {
            return Err(StorageError::ConcurrentModification {
                branch: branch.to_string(),
            });
        }
        Self::update_branch(repo, branch, new_target)
    }

    pub fn delete_branch(repo: &Repository, branch: &BranchName) -> StorageResult<()> {
        let mut git_branch = repo
            .find_branch(branch.as_str(), BranchType::Local)
            .map_err(|_| StorageError::RefNotFound(branch.to_string()))?;
        git_branch.delete()?;
        Ok(())
    }

    pub fn list_transaction_branches(repo: &Repository) -> StorageResult<Vec<BranchName>> {
        let mut result = Vec::new();
        for entry in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = entry?;
            if let Some(name) = branch.name()? {
                if name.starts_with(BranchName::TX_PREFIX) {
                    if let Ok(name) = BranchName::new(name) {
                        result.push(name);
                    }
                }
            }
        }
        Ok(result)
    }

    /// Create `main` at the initial commit and point HEAD at it.
    pub fn init_main_branch(repo: &Repository, initial_commit: CommitId) -> StorageResult<()> {
        let main = BranchName::main();
        if !Self::branch_exists(repo, &main) {
            Self::create_branch(repo, &main, initial_commit)?;
        }
        repo.set_head(&main.as_ref_path())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::create_initial_tree;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository, CommitId) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();

        let commit_id = {
            let tree_id = create_initial_tree(&repo).unwrap();
            let tree = repo.find_tree(tree_id.raw()).unwrap();
            let sig = git2::Signature::now("Test", "test@test.com").unwrap();
            let oid = repo.commit(None, &sig, &sig, "init", &tree, &[]).unwrap();
            CommitId::new(oid)
        };
        RefManager::init_main_branch(&repo, commit_id).unwrap();

        (dir, repo, commit_id)
    }

    fn child_commit(repo: &Repository, parent: CommitId) -> CommitId {
        let tree_id = create_initial_tree(repo).unwrap();
        let tree = repo.find_tree(tree_id.raw()).unwrap();
        let sig = git2::Signature::now("Test", "test@test.com").unwrap();
        let parent = repo.find_commit(parent.raw()).unwrap();
        let oid = repo
            .commit(None, &sig, &sig, "child", &tree, &[&parent])
            .unwrap();
        CommitId::new(oid)
    }

    #[test]
    fn test_head_follows_main() {
        let (_dir, repo, initial) = setup();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), initial);

        let next = child_commit(&repo, initial);
        RefManager::update_branch(&repo, &BranchName::main(), next).unwrap();
        assert_eq!(RefManager::head_commit(&repo).unwrap(), next);
    }

    #[test]
    fn test_transaction_branch_lifecycle() {
        let (_dir, repo, base) = setup();
        let branch = BranchName::for_session("s1");

        RefManager::create_branch(&repo, &branch, base).unwrap();
        assert!(RefManager::branch_exists(&repo, &branch));
        assert_eq!(RefManager::resolve_branch(&repo, &branch).unwrap(), base);
        assert_eq!(RefManager::list_transaction_branches(&repo).unwrap(), vec![branch.clone()]);

        let duplicate = RefManager::create_branch(&repo, &branch, base);
        assert!(matches!(duplicate, Err(StorageError::BranchAlreadyExists(_))));

        RefManager::delete_branch(&repo, &branch).unwrap();
        assert!(!RefManager::branch_exists(&repo, &branch));
        assert!(RefManager::list_transaction_branches(&repo).unwrap().is_empty());
    }

    #[test]
    fn test_update_branch_if_unchanged() {
        let (_dir, repo, initial) = setup();
        let main = BranchName::main();
        let next = child_commit(&repo, initial);

        RefManager::update_branch_if_unchanged(&repo, &main, initial, next).unwrap();

        let stale = RefManager::update_branch_if_unchanged(&repo, &main, initial, next);
        assert!(matches!(stale, Err(StorageError::ConcurrentModification { .. })));
    }
}
