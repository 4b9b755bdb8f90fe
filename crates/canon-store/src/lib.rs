//! Local stores of truth consumed by the reconciliation core: authoritative
//! document metadata (content hash, remote file id, soft-delete status) and
//! chat session records.
mod documents;
mod memory;
mod sessions;
mod sqlite;

pub use documents::{
    content_hash_hex, DocumentRecord, DocumentStatus, DocumentStore, DocumentUpdate, NewDocument,
    StoreError,
};
pub use memory::{MemoryDocumentStore, MemorySessionStore};
pub use sessions::{Exchange, SessionRecord, SessionStore};
pub use sqlite::SqliteDocumentStore;
