//! Tree operations for collection management.
//!
//! In git a tree is a directory. Here the root tree holds one directory per
//! collection and each collection directory holds one JSON blob per document.
//! Collection directories appear on first write; a missing directory reads as
//! an empty collection.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Oid, Repository, Tree, TreeBuilder};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, CollectionName, DocumentKey, DocumentPath, TreeId};

/// Read-only view of the tree at one commit.
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    /// Collections present in this tree, skipping `_`-prefixed metadata.
    pub fn list_collections(&self) -> Vec<CollectionName> {
        self.tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| CollectionName::new(entry.name()?).ok())
            .collect()
    }

    fn collection_tree(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
    ) -> StorageResult<Option<Tree<'repo>>> {
        let Some(entry) = self.tree.get_name(collection.as_str()) else {
            return Ok(None);
        };
        if entry.kind() != Some(ObjectType::Tree) {
            return Err(StorageError::UnexpectedEntryType {
                path: collection.as_str().into(),
                expected: "tree (directory)",
            });
        }
        Ok(Some(repo.find_tree(entry.id())?))
    }

    /// Keys of all documents in a collection, in file-name order.
    pub fn list_documents(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
    ) -> StorageResult<Vec<DocumentKey>> {
        let Some(tree) = self.collection_tree(repo, collection)? else {
            return Ok(Vec::new());
        };

        let keys = tree
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Blob))
            .filter_map(|entry| {
                let stem = entry.name()?.strip_suffix(".json")?;
                DocumentKey::new(stem).ok()
            })
            .collect();
        Ok(keys)
    }

    pub fn document_blob_id(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> StorageResult<Option<BlobId>> {
        let Some(tree) = self.collection_tree(repo, collection)? else {
            return Ok(None);
        };

        let result = match tree.get_name(&key.file_name()) {
            Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
                Ok(Some(BlobId::new(entry.id())))
            }
            Some(_) => Err(StorageError::UnexpectedEntryType {
                path: DocumentPath::new(collection.clone(), key.clone()).to_path_buf(),
                expected: "blob (file)",
            }),
            None => Ok(None),
        };
        result
    }

    pub fn document_exists(
        &self,
        repo: &'repo Repository,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> StorageResult<bool> {
        Ok(self.document_blob_id(repo, collection, key)?.is_some())
    }
}

/// Accumulates document changes and writes a new root tree.
///
/// The source tree is never modified.
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root: TreeBuilder<'repo>,
    /// Builders for collections touched so far.
    touched: HashMap<String, TreeBuilder<'repo>>,
    /// Tree ids of collections present in the source tree.
    existing: HashMap<String, Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root = repo.treebuilder(Some(tree.inner()))?;

        let existing = tree
            .inner()
            .iter()
            .filter(|entry| entry.kind() == Some(ObjectType::Tree))
            .filter_map(|entry| Some((entry.name()?.to_string(), entry.id())))
            .collect();

        Ok(Self {
            repo,
            root,
            touched: HashMap::new(),
            existing,
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            root: repo.treebuilder(None)?,
            touched: HashMap::new(),
            existing: HashMap::new(),
        })
    }

    fn collection_builder(&mut self, collection: &str) -> StorageResult<&mut TreeBuilder<'repo>> {
        if !self.touched.contains_key(collection) {
            let builder = match self.existing.get(collection) {
                Some(id) => {
                    let tree = self.repo.find_tree(*id)?;
                    self.repo.treebuilder(Some(&tree))?
                }
                None => self.repo.treebuilder(None)?,
            };
            self.touched.insert(collection.to_string(), builder);
        }
        self.touched
            .get_mut(collection)
            .ok_or_else(|| StorageError::Internal(format!("lost builder for {}", collection)))
    }

    /// Insert or replace a document, creating its collection if needed.
    pub fn upsert_document(
        &mut self,
        collection: &CollectionName,
        key: &DocumentKey,
        blob_id: BlobId,
    ) -> StorageResult<()> {
        let builder = self.collection_builder(collection.as_str())?;
        builder.insert(key.file_name(), blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    pub fn delete_document(
        &mut self,
        collection: &CollectionName,
        key: &DocumentKey,
    ) -> StorageResult<()> {
        let not_found = || StorageError::DocumentNotFound {
            collection: collection.clone(),
            key: key.clone(),
        };

        if !self.touched.contains_key(collection.as_str())
            && !self.existing.contains_key(collection.as_str())
        {
            return Err(not_found());
        }

        let builder = self.collection_builder(collection.as_str())?;
        builder.remove(key.file_name()).map_err(|_| not_found())?;
        Ok(())
    }

    /// Write touched collections, then the root, returning the new root id.
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (collection, builder) in self.touched {
            let tree_id = builder.write()?;
            self.root.insert(collection.as_str(), tree_id, FileMode::Tree.into())?;
        }
        Ok(TreeId::new(self.root.write()?))
    }
}

/// Root tree of a freshly initialized store: no collections yet.
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    TreeMutator::empty(repo)?.write()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn handle(repo: &Repository, id: TreeId) -> TreeHandle<'_> {
        TreeHandle::new(repo.find_tree(id.raw()).unwrap())
    }

    #[test]
    fn test_initial_tree_has_no_collections() {
        let (_dir, repo) = setup();
        let root = create_initial_tree(&repo).unwrap();
        let tree = handle(&repo, root);

        assert!(tree.list_collections().is_empty());
        let topics = CollectionName::new("topics").unwrap();
        assert!(tree.list_documents(&repo, &topics).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_creates_collection() {
        let (_dir, repo) = setup();
        let root = create_initial_tree(&repo).unwrap();
        let topics = CollectionName::new("topics").unwrap();
        let blob = BlobId::new(repo.blob(b"{}").unwrap());

        let tree = handle(&repo, root);
        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        mutator
            .upsert_document(&topics, &DocumentKey::new("b").unwrap(), blob)
            .unwrap();
        mutator
            .upsert_document(&topics, &DocumentKey::new("a").unwrap(), blob)
            .unwrap();
        let root = mutator.write().unwrap();

        let tree = handle(&repo, root);
        assert_eq!(tree.list_collections(), vec![topics.clone()]);
        let keys: Vec<_> = tree
            .list_documents(&repo, &topics)
            .unwrap()
            .into_iter()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_delete_document() {
        let (_dir, repo) = setup();
        let topics = CollectionName::new("topics").unwrap();
        let key = DocumentKey::new("t1").unwrap();
        let blob = BlobId::new(repo.blob(b"{}").unwrap());

        let mut mutator = TreeMutator::empty(&repo).unwrap();
        mutator.upsert_document(&topics, &key, blob).unwrap();
        let root = mutator.write().unwrap();

        let tree = handle(&repo, root);
        assert!(tree.document_exists(&repo, &topics, &key).unwrap());

        let mut mutator = TreeMutator::from_tree(&repo, &tree).unwrap();
        mutator.delete_document(&topics, &key).unwrap();
        let root = mutator.write().unwrap();

        let tree = handle(&repo, root);
        assert!(!tree.document_exists(&repo, &topics, &key).unwrap());
    }

    #[test]
    fn test_delete_missing_document() {
        let (_dir, repo) = setup();
        let topics = CollectionName::new("topics").unwrap();
        let key = DocumentKey::new("ghost").unwrap();

        let mut mutator = TreeMutator::empty(&repo).unwrap();
        let result = mutator.delete_document(&topics, &key);
        assert!(matches!(result, Err(StorageError::DocumentNotFound { .. })));
    }
}
