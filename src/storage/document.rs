//! Documents and their JSON blob encoding.
//!
//! Each entity is stored as one JSON file. Store metadata sits next to the
//! entity's own fields under a `_` prefix:
//!
//! ```text
//! {
//!   "_created_at": "2024-03-01T09:00:00+00:00",
//!   "_pk": "01hq3k0d8r5m2e7t9v4w6y1z3a",
//!   "_updated_at": "2024-03-01T09:00:00+00:00",
//!   "_version": 1,
//!   "difficulty": "beginner",
//!   "name": "Ownership"
//! }
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{BlobId, DocumentKey};

/// A stored document: metadata plus the entity body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Must match the file name without `.json`.
    pub key: DocumentKey,
    /// Starts at 1, bumped on every update.
    pub version: u64,
    pub created_at: String,
    pub updated_at: String,
    pub body: BTreeMap<String, Value>,
}

impl Document {
    pub fn new(key: DocumentKey, body: BTreeMap<String, Value>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key,
            version: 1,
            created_at: now.clone(),
            updated_at: now,
            body,
        }
    }

    /// Build a version-1 document from any serializable record.
    ///
    /// The record must serialize to a JSON object with no `_`-prefixed fields.
    pub fn from_record<T: Serialize>(key: DocumentKey, record: &T) -> StorageResult<Self> {
        Ok(Self::new(key, record_body(record)?))
    }

    /// Decode the body back into a typed record.
    pub fn to_record<T: DeserializeOwned>(&self) -> StorageResult<T> {
        let object = self.body.clone().into_iter().collect();
        Ok(serde_json::from_value(Value::Object(object))?)
    }

    /// Next version of this document carrying a new body.
    pub fn with_body(self, body: BTreeMap<String, Value>) -> Self {
        Self {
            key: self.key,
            version: self.version + 1,
            created_at: self.created_at,
            updated_at: chrono::Utc::now().to_rfc3339(),
            body,
        }
    }

    /// Next version of this document carrying a serialized record.
    pub fn with_record<T: Serialize>(self, record: &T) -> StorageResult<Self> {
        let body = record_body(record)?;
        Ok(self.with_body(body))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}

fn record_body<T: Serialize>(record: &T) -> StorageResult<BTreeMap<String, Value>> {
    let body: BTreeMap<String, Value> = match serde_json::to_value(record)? {
        Value::Object(map) => map.into_iter().collect(),
        other => {
            return Err(StorageError::Internal(format!(
                "document body must be a JSON object, got {}",
                other
            )))
        }
    };

    if let Some(field) = body.keys().find(|field| field.starts_with('_')) {
        return Err(StorageError::Internal(format!(
            "field '{}' collides with document metadata",
            field
        )));
    }
    Ok(body)
}

/// On-disk shape. BTreeMap keeps key order stable so equal content hashes equal.
#[derive(Serialize, Deserialize)]
struct DocumentJson {
    #[serde(rename = "_pk")]
    pk: String,
    #[serde(rename = "_version")]
    version: u64,
    #[serde(rename = "_created_at")]
    created_at: String,
    #[serde(rename = "_updated_at")]
    updated_at: String,
    #[serde(flatten)]
    body: BTreeMap<String, Value>,
}

pub fn serialize_document(document: &Document) -> StorageResult<Vec<u8>> {
    let json = DocumentJson {
        pk: document.key.as_str().to_string(),
        version: document.version,
        created_at: document.created_at.clone(),
        updated_at: document.updated_at.clone(),
        body: document.body.clone(),
    };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// Decode a blob, checking its `_pk` against the key it was found under.
pub fn deserialize_document(bytes: &[u8], expected_key: &DocumentKey) -> StorageResult<Document> {
    let json: DocumentJson = serde_json::from_slice(bytes)?;

    if json.pk != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: expected_key.file_name().into(),
            reason: format!(
                "primary key mismatch: file name says '{}' but content has '{}'",
                expected_key, json.pk
            ),
        });
    }

    Ok(Document {
        key: expected_key.clone(),
        version: json.version,
        created_at: json.created_at,
        updated_at: json.updated_at,
        body: json.body,
    })
}

pub fn write_blob(repo: &git2::Repository, document: &Document) -> StorageResult<BlobId> {
    let bytes = serialize_document(document)?;
    Ok(BlobId::new(repo.blob(&bytes)?))
}

pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
