use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::documents::StoreError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One chat session; `thread_id` is set lazily once the platform thread
/// exists.
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at_unix: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A persisted user/assistant message pair.
pub struct Exchange {
    pub user_text: String,
    pub assistant_text: String,
    pub metadata: Value,
    pub created_at_unix: u64,
}

#[async_trait]
/// Trait contract for the chat session store.
pub trait SessionStore: Send + Sync {
    /// Returns the existing session or creates one; a `None` id asks the
    /// store to mint a fresh session id.
    async fn ensure_session(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<SessionRecord, StoreError>;

    async fn set_thread_id(&self, session_id: &str, thread_id: &str) -> Result<(), StoreError>;

    async fn append_exchange(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        metadata: Value,
    ) -> Result<(), StoreError>;
}
