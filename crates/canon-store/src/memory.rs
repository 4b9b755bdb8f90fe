use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use canon_core::unix_seconds;

use crate::documents::{
    DocumentRecord, DocumentStatus, DocumentStore, DocumentUpdate, NewDocument, StoreError,
};
use crate::sessions::{Exchange, SessionRecord, SessionStore};

/// In-memory document store; the single-node default and the test double.
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: RwLock<HashMap<String, DocumentRecord>>,
    counter: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("doc-{}-{count}", unix_seconds())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create_document(&self, new: NewDocument) -> Result<DocumentRecord, StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.values().find(|record| {
            record.status != DocumentStatus::Deleted && record.content_hash == new.content_hash
        }) {
            return Err(StoreError::DuplicateContent {
                existing_id: existing.id.clone(),
            });
        }

        let record = DocumentRecord {
            id: self.next_id(),
            filename: new.filename,
            content_hash: new.content_hash,
            storage_path: new.storage_path,
            remote_file_id: None,
            status: DocumentStatus::Processing,
            created_at_unix: unix_seconds(),
        };
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn list_active_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let mut active: Vec<DocumentRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.status == DocumentStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at_unix.cmp(&b.created_at_unix));
        Ok(active)
    }

    async fn update_document(
        &self,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<DocumentRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        if let Some(remote_file_id) = update.remote_file_id {
            record.remote_file_id = Some(remote_file_id);
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        Ok(record.clone())
    }

    async fn soft_delete_document(&self, id: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(id).ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        record.status = DocumentStatus::Deleted;
        Ok(())
    }
}

struct SessionEntry {
    record: SessionRecord,
    exchanges: Vec<Exchange>,
}

/// In-memory session store.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    counter: AtomicU64,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: persisted exchanges for one session.
    pub async fn exchanges(&self, session_id: &str) -> Vec<Exchange> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.exchanges.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn ensure_session(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<SessionRecord, StoreError> {
        let mut sessions = self.sessions.write().await;
        if let Some(id) = session_id {
            if let Some(entry) = sessions.get(id) {
                return Ok(entry.record.clone());
            }
        }

        let id = match session_id {
            Some(id) => id.to_string(),
            None => {
                let count = self.counter.fetch_add(1, Ordering::Relaxed);
                format!("session-{}-{count}", unix_seconds())
            }
        };
        let record = SessionRecord {
            id: id.clone(),
            user_id: user_id.map(str::to_string),
            thread_id: None,
            created_at_unix: unix_seconds(),
        };
        sessions.insert(
            id,
            SessionEntry {
                record: record.clone(),
                exchanges: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn set_thread_id(&self, session_id: &str, thread_id: &str) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound {
                id: session_id.to_string(),
            })?;
        entry.record.thread_id = Some(thread_id.to_string());
        Ok(())
    }

    async fn append_exchange(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        metadata: Value,
    ) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::NotFound {
                id: session_id.to_string(),
            })?;
        entry.exchanges.push(Exchange {
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            metadata,
            created_at_unix: unix_seconds(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::content_hash_hex;

    fn new_doc(filename: &str, bytes: &[u8]) -> NewDocument {
        NewDocument {
            filename: filename.to_string(),
            content_hash: content_hash_hex(bytes),
            storage_path: format!("store/{filename}"),
        }
    }

    #[tokio::test]
    async fn duplicate_content_is_rejected_until_soft_delete() {
        let store = MemoryDocumentStore::new();
        let first = store
            .create_document(new_doc("policy.pdf", b"bytes"))
            .await
            .expect("first create");

        let error = store
            .create_document(new_doc("renamed.pdf", b"bytes"))
            .await
            .unwrap_err();
        match error {
            StoreError::DuplicateContent { existing_id } => assert_eq!(existing_id, first.id),
            other => panic!("expected duplicate rejection, got {other}"),
        }

        store
            .soft_delete_document(&first.id)
            .await
            .expect("soft delete");
        store
            .create_document(new_doc("renamed.pdf", b"bytes"))
            .await
            .expect("create after delete");
    }

    #[tokio::test]
    async fn soft_delete_preserves_record_and_hides_from_active_list() {
        let store = MemoryDocumentStore::new();
        let record = store
            .create_document(new_doc("report.pdf", b"q3"))
            .await
            .expect("create");
        store
            .update_document(
                &record.id,
                DocumentUpdate {
                    remote_file_id: Some("file_1".to_string()),
                    status: Some(DocumentStatus::Active),
                },
            )
            .await
            .expect("activate");
        assert_eq!(store.list_active_documents().await.expect("list").len(), 1);

        store
            .soft_delete_document(&record.id)
            .await
            .expect("delete");
        assert!(store.list_active_documents().await.expect("list").is_empty());

        let kept = store
            .get_document(&record.id)
            .await
            .expect("get")
            .expect("record kept");
        assert_eq!(kept.status, DocumentStatus::Deleted);
        assert_eq!(kept.remote_file_id.as_deref(), Some("file_1"));
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent_and_mints_ids() {
        let store = MemorySessionStore::new();
        let minted = store
            .ensure_session(None, Some("user-1"))
            .await
            .expect("mint");
        assert!(minted.id.starts_with("session-"));

        let existing = store
            .ensure_session(Some(&minted.id), None)
            .await
            .expect("existing");
        assert_eq!(existing.id, minted.id);
        assert_eq!(existing.user_id.as_deref(), Some("user-1"));

        store
            .set_thread_id(&minted.id, "th_1")
            .await
            .expect("thread");
        store
            .append_exchange(&minted.id, "hi", "hello", serde_json::json!({}))
            .await
            .expect("exchange");
        assert_eq!(store.exchanges(&minted.id).await.len(), 1);
    }
}
