use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use canon_core::unix_seconds;

use crate::documents::{
    DocumentRecord, DocumentStatus, DocumentStore, DocumentUpdate, NewDocument, StoreError,
};

const DOCUMENTS_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    storage_path TEXT NOT NULL,
    remote_file_id TEXT,
    status TEXT NOT NULL,
    created_at_unix INTEGER NOT NULL
)";

/// SQLite-backed document store sharing the memory store's contract.
pub struct SqliteDocumentStore {
    connection: Mutex<Connection>,
    counter: AtomicU64,
}

impl SqliteDocumentStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        connection.execute(DOCUMENTS_SCHEMA, [])?;
        Ok(Self {
            connection: Mutex::new(connection),
            counter: AtomicU64::new(0),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()?;
        connection.execute(DOCUMENTS_SCHEMA, [])?;
        Ok(Self {
            connection: Mutex::new(connection),
            counter: AtomicU64::new(0),
        })
    }

    fn next_id(&self) -> String {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("doc-{}-{count}", unix_seconds())
    }

    fn lock_connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let status_raw: String = row.get(5)?;
    Ok(DocumentRecord {
        id: row.get(0)?,
        filename: row.get(1)?,
        content_hash: row.get(2)?,
        storage_path: row.get(3)?,
        remote_file_id: row.get(4)?,
        status: DocumentStatus::parse(&status_raw).unwrap_or(DocumentStatus::Error),
        created_at_unix: row.get::<_, i64>(6)? as u64,
    })
}

const RECORD_COLUMNS: &str =
    "id, filename, content_hash, storage_path, remote_file_id, status, created_at_unix";

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create_document(&self, new: NewDocument) -> Result<DocumentRecord, StoreError> {
        let connection = self.lock_connection();
        let existing: Option<String> = connection
            .query_row(
                "SELECT id FROM documents WHERE content_hash = ?1 AND status != 'deleted'",
                params![new.content_hash],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = existing {
            return Err(StoreError::DuplicateContent { existing_id });
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
        connection.execute(
            "INSERT INTO documents (id, filename, content_hash, storage_path, remote_file_id, status, created_at_unix)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.filename,
                record.content_hash,
                record.storage_path,
                record.remote_file_id,
                record.status.as_str(),
                record.created_at_unix as i64,
            ],
        )?;
        Ok(record)
    }

    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let connection = self.lock_connection();
        let record = connection
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    async fn list_active_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        let connection = self.lock_connection();
        let mut statement = connection.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM documents WHERE status = 'active' ORDER BY created_at_unix"
        ))?;
        let rows = statement.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    async fn update_document(
        &self,
        id: &str,
        update: DocumentUpdate,
    ) -> Result<DocumentRecord, StoreError> {
        let connection = self.lock_connection();
        if let Some(remote_file_id) = &update.remote_file_id {
            connection.execute(
                "UPDATE documents SET remote_file_id = ?1 WHERE id = ?2",
                params![remote_file_id, id],
            )?;
        }
        if let Some(status) = update.status {
            connection.execute(
                "UPDATE documents SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
        }
        connection
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
                row_to_record,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn soft_delete_document(&self, id: &str) -> Result<(), StoreError> {
        let connection = self.lock_connection();
        let changed = connection.execute(
            "UPDATE documents SET status = 'deleted' WHERE id = ?1",
            params![id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }
}
