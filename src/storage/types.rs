//! Type-safe wrappers around git primitives and document addressing.

use std::fmt;
use std::path::PathBuf;

use git2::Oid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A git commit id.
///
/// Kept distinct from [`BlobId`] and [`TreeId`] so one can't be passed where
/// another is expected. The raw `Oid` stays inside the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// Seven-character abbreviation, as `git log --oneline` prints it.
    pub fn short(&self) -> String {
        let mut hex = self.0.to_string();
        hex.truncate(7);
        hex
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A git blob id (one stored document).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

/// A git tree id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

/// A validated collection name (a top-level directory in the tree).
///
/// Valid names are 1-64 characters of ASCII letters, digits, `_` or `-`,
/// starting with a letter. Names starting with `_` are reserved for store
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<(), InvalidNameError> {
        let first = name.chars().next().ok_or(InvalidNameError::Empty)?;

        if name.len() > 64 {
            return Err(InvalidNameError::TooLong(name.len()));
        }
        if !first.is_ascii_alphabetic() {
            return Err(InvalidNameError::InvalidStart(first));
        }
        validate_chars(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated document key.
///
/// Keys become file names, so they follow the same character rules as
/// collection names. Entity ids are ULIDs, which always qualify.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentKey(String);

impl DocumentKey {
    pub fn new(key: impl Into<String>) -> Result<Self, InvalidNameError> {
        let key = key.into();
        if key.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if key.len() > 128 {
            return Err(InvalidNameError::TooLong(key.len()));
        }
        validate_chars(&key)?;
        Ok(Self(key))
    }

    /// Generate a fresh lower-case ULID key.
    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the document inside its collection directory.
    pub(crate) fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }
}

impl TryFrom<String> for DocumentKey {
    type Error = InvalidNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DocumentKey> for String {
    fn from(key: DocumentKey) -> Self {
        key.0
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DocumentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_chars(name: &str) -> Result<(), InvalidNameError> {
    for (position, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' {
            return Err(InvalidNameError::InvalidCharacter { char: c, position });
        }
    }
    Ok(())
}

/// Location of a document: `{collection}/{key}.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    pub collection: CollectionName,
    pub key: DocumentKey,
}

impl DocumentPath {
    pub fn new(collection: CollectionName, key: DocumentKey) -> Self {
        Self { collection, key }
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(self.to_string())
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key.file_name())
    }
}

/// A branch name. Transaction branches live under `tx/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub const MAIN: &'static str = "main";
    pub const TX_PREFIX: &'static str = "tx/";

    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if name.contains("..") || name.ends_with('/') || name.starts_with('/') {
            return Err(InvalidNameError::InvalidPath(name));
        }
        Ok(Self(name))
    }

    pub fn main() -> Self {
        Self(Self::MAIN.to_string())
    }

    /// Branch that accumulates the writes of one session's transaction.
    pub fn for_session(session_id: &str) -> Self {
        Self(format!("{}{}", Self::TX_PREFIX, session_id))
    }

    pub fn is_transaction_branch(&self) -> bool {
        self.0.starts_with(Self::TX_PREFIX)
    }

    /// Session id of a transaction branch.
    pub fn session_id(&self) -> Option<&str> {
        self.0.strip_prefix(Self::TX_PREFIX)
    }

    /// Full ref path, e.g. `refs/heads/main`.
    pub fn as_ref_path(&self) -> String {
        format!("refs/heads/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Author/committer identity written on every commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::new("studydb", "studydb@localhost")
    }
}

/// Rejected collection, key or branch name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidNameError {
    #[error("name cannot be empty")]
    Empty,
    #[error("name too long: {0} characters")]
    TooLong(usize),
    #[error("name cannot start with '{0}'")]
    InvalidStart(char),
    #[error("invalid character '{char}' at position {position}")]
    InvalidCharacter { char: char, position: usize },
    #[error("invalid path: '{0}'")]
    InvalidPath(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_name_valid() {
        assert!(CollectionName::new("topics").is_ok());
        assert!(CollectionName::new("study_sessions").is_ok());
        assert!(CollectionName::new("archive-2024").is_ok());
    }

    #[test]
    fn test_collection_name_invalid() {
        assert_eq!(CollectionName::new(""), Err(InvalidNameError::Empty));
        assert_eq!(
            CollectionName::new("_meta"),
            Err(InvalidNameError::InvalidStart('_'))
        );
        assert_eq!(
            CollectionName::new("9lives"),
            Err(InvalidNameError::InvalidStart('9'))
        );
        assert!(matches!(
            CollectionName::new("topics/../x"),
            Err(InvalidNameError::InvalidCharacter { char: '/', position: 6 })
        ));
        assert!(CollectionName::new("a".repeat(65)).is_err());
    }

    #[test]
    fn test_document_key_generate() {
        let a = DocumentKey::generate();
        let b = DocumentKey::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 26);
        assert_eq!(a.as_str(), a.as_str().to_lowercase());
    }

    #[test]
    fn test_document_key_serde_validates() {
        let key: DocumentKey = serde_json::from_str("\"abc-123\"").unwrap();
        assert_eq!(key.as_str(), "abc-123");

        let bad: Result<DocumentKey, _> = serde_json::from_str("\"a b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_document_path_display() {
        let path = DocumentPath::new(
            CollectionName::new("topics").unwrap(),
            DocumentKey::new("t1").unwrap(),
        );
        assert_eq!(path.to_string(), "topics/t1.json");
        assert_eq!(path.to_path_buf(), PathBuf::from("topics/t1.json"));
    }

    #[test]
    fn test_transaction_branch() {
        let branch = BranchName::for_session("01hx");
        assert!(branch.is_transaction_branch());
        assert_eq!(branch.session_id(), Some("01hx"));
        assert_eq!(branch.as_ref_path(), "refs/heads/tx/01hx");

        let main = BranchName::main();
        assert!(!main.is_transaction_branch());
        assert_eq!(main.session_id(), None);
    }

    #[test]
    fn test_branch_name_rejects_traversal() {
        assert!(BranchName::new("tx/../main").is_err());
        assert!(BranchName::new("/main").is_err());
    }
}
