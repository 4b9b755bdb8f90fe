use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Lifecycle status of a document record. Records are soft-deleted only, to
/// preserve audit history.
pub enum DocumentStatus {
    Processing,
    Active,
    Error,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Processing => "processing",
            DocumentStatus::Active => "active",
            DocumentStatus::Error => "error",
            DocumentStatus::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "processing" => Some(DocumentStatus::Processing),
            "active" => Some(DocumentStatus::Active),
            "error" => Some(DocumentStatus::Error),
            "deleted" => Some(DocumentStatus::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Authoritative local record for one uploaded document.
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub content_hash: String,
    pub storage_path: String,
    pub remote_file_id: Option<String>,
    pub status: DocumentStatus,
    pub created_at_unix: u64,
}

#[derive(Debug, Clone)]
/// Creation payload; id, status, and timestamp are assigned by the store.
pub struct NewDocument {
    pub filename: String,
    pub content_hash: String,
    pub storage_path: String,
}

#[derive(Debug, Clone, Default)]
/// Partial update applied as fields become known asynchronously.
pub struct DocumentUpdate {
    pub remote_file_id: Option<String>,
    pub status: Option<DocumentStatus>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document '{id}' not found")]
    NotFound { id: String },
    #[error("content already registered under document '{existing_id}'")]
    DuplicateContent { existing_id: String },
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::Backend(error.to_string())
    }
}

/// Hex-encoded sha256 of the document bytes; the dedup key.
pub fn content_hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[async_trait]
/// Trait contract for the document store of truth.
///
/// Invariant: no two non-deleted records share a `content_hash`; violating
/// creates fail with [`StoreError::DuplicateContent`].
pub trait DocumentStore: Send + Sync {
    async fn create_document(&self, new: NewDocument) -> Result<DocumentRecord, StoreError>;
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError>;
    async fn list_active_documents(&self) -> Result<Vec<DocumentRecord>, StoreError>;
    async fn update_document(
        &self,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<DocumentRecord, StoreError>;
    async fn soft_delete_document(&self, id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_filename_independent() {
        let first = content_hash_hex(b"identical bytes");
        let second = content_hash_hex(b"identical bytes");
        let other = content_hash_hex(b"different bytes");
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            DocumentStatus::Processing,
            DocumentStatus::Active,
            DocumentStatus::Error,
            DocumentStatus::Deleted,
        ] {
            assert_eq!(DocumentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DocumentStatus::parse("archived"), None);
    }
}
