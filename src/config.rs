//! Store configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::storage::GitSignature;

/// Options for [`crate::store::GitStore::open`].
///
/// Deserializable with every field but `path` optional, so a wiring layer can
/// read it from whatever format it likes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the git repository.
    pub path: PathBuf,
    /// Initialize a repository when none exists at `path`.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
    /// Delete leftover `tx/*` branches from earlier processes when opening.
    ///
    /// Turn this off when another handle may have the same path open, since
    /// its live branches look abandoned from here.
    #[serde(default = "default_true")]
    pub cleanup_on_open: bool,
    /// Author and committer of every commit.
    #[serde(default)]
    pub signature: GitSignature,
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".studydb"),
            create_if_missing: true,
            cleanup_on_open: true,
            signature: GitSignature::default(),
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn cleanup_on_open(mut self, value: bool) -> Self {
        self.cleanup_on_open = value;
        self
    }

    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let config = StoreConfig::new("/tmp/study")
            .create_if_missing(false)
            .signature(GitSignature::new("ada", "ada@example.com"));

        assert_eq!(config.path, PathBuf::from("/tmp/study"));
        assert!(!config.create_if_missing);
        assert!(config.cleanup_on_open);
        assert_eq!(config.signature.name, "ada");
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: StoreConfig = serde_json::from_value(json!({ "path": "data" })).unwrap();
        assert_eq!(config, StoreConfig::new("data"));

        let config: StoreConfig = serde_json::from_value(json!({
            "path": "data",
            "cleanup_on_open": false,
            "signature": { "name": "ci", "email": "ci@localhost" }
        }))
        .unwrap();
        assert!(!config.cleanup_on_open);
        assert_eq!(config.signature, GitSignature::new("ci", "ci@localhost"));
    }
}
