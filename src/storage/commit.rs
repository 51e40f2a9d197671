//! Commit creation, history and merging.
//!
//! Every document write is one commit on a transaction branch. Committing a
//! transaction moves `main` onto that branch, either by fast-forward or by a
//! merge commit when `main` moved in the meantime.

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Repository, Revwalk, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::TreeHandle;
use crate::storage::types::{CommitId, GitSignature, TreeId};

/// Summary of one commit, as shown by [`crate::store::GitStore::history`].
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: commit.author().name().unwrap_or("unknown").to_string(),
            timestamp,
        }
    }

    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or("")
    }
}

pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    signature: GitSignature,
}

impl<'a> CommitBuilder<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::default(),
        }
    }

    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Write the commit object. No ref is moved.
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.signature.to_git2_signature()?;
        let parents = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = self
            .repo
            .commit(None, &sig, &sig, &self.message, &tree, &parent_refs)?;
        Ok(CommitId::new(oid))
    }
}

pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;
    Ok(TreeHandle::new(commit.tree()?))
}

pub fn create_initial_commit(repo: &Repository, signature: &GitSignature) -> StorageResult<CommitId> {
    let tree_id = crate::storage::tree::create_initial_tree(repo)?;
    CommitBuilder::new(repo)
        .tree(tree_id)
        .message("[studydb] Initialize store")
        .signature(signature.clone())
        .commit()
}

/// Result of merging a transaction tip into `main`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Clean merge; the tree to commit with both tips as parents.
    Clean(TreeId),
    /// Paths changed on both sides.
    Conflicts(Vec<PathBuf>),
}

/// Three-way merge of `ours` (transaction tip) and `theirs` (current main).
pub fn merge_trees(repo: &Repository, ours: CommitId, theirs: CommitId) -> StorageResult<MergeOutcome> {
    let ours = repo.find_commit(ours.raw())?;
    let theirs = repo.find_commit(theirs.raw())?;
    let mut index = repo.merge_commits(&ours, &theirs, None)?;

    if index.has_conflicts() {
        let mut paths = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
            if let Some(entry) = entry {
                paths.push(PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned()));
            }
        }
        paths.sort();
        paths.dedup();
        return Ok(MergeOutcome::Conflicts(paths));
    }

    let tree_oid = index.write_tree_to(repo)?;
    Ok(MergeOutcome::Clean(TreeId::new(tree_oid)))
}

pub struct HistoryIterator<'repo> {
    repo: &'repo Repository,
    revwalk: Revwalk<'repo>,
}

impl<'repo> HistoryIterator<'repo> {
    pub fn new(repo: &'repo Repository, start: CommitId) -> StorageResult<Self> {
        let mut revwalk = repo.revwalk()?;
        revwalk.push(start.raw())?;
        revwalk.set_sorting(Sort::TIME | Sort::TOPOLOGICAL)?;
        Ok(Self { repo, revwalk })
    }
}

impl Iterator for HistoryIterator<'_> {
    type Item = StorageResult<CommitInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let oid = match self.revwalk.next()? {
            Ok(oid) => oid,
            Err(e) => return Some(Err(e.into())),
        };
        Some(
            self.repo
                .find_commit(oid)
                .map(|commit| CommitInfo::from_git2(&commit))
                .map_err(StorageError::from),
        )
    }
}

/// Commit message formats for store writes.
pub struct CommitMessage;

impl CommitMessage {
    pub fn insert(collection: &str, key: &str, session_id: &str) -> String {
        format!("[INSERT] {}/{} tx:{}", collection, key, session_id)
    }

    pub fn update(collection: &str, key: &str, session_id: &str) -> String {
        format!("[UPDATE] {}/{} tx:{}", collection, key, session_id)
    }

    pub fn delete(collection: &str, key: &str, session_id: &str) -> String {
        format!("[DELETE] {}/{} tx:{}", collection, key, session_id)
    }

    pub fn transaction_commit(session_id: &str) -> String {
        format!("[COMMIT] Transaction {} merged to main", session_id)
    }
}
