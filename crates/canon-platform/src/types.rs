use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Kinds of remote resources the reconciler manages.
pub enum ResourceKind {
    Assistant,
    VectorStore,
    File,
    Thread,
    Run,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ResourceKind::Assistant => "assistant",
            ResourceKind::VectorStore => "vector_store",
            ResourceKind::File => "file",
            ResourceKind::Thread => "thread",
            ResourceKind::Run => "run",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Remote assistant as reported by the platform.
pub struct Assistant {
    pub id: String,
    pub name: Option<String>,
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub vector_store_ids: Vec<String>,
    pub created_at: u64,
}

impl Assistant {
    pub fn has_vector_store(&self) -> bool {
        !self.vector_store_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Remote vector store as reported by the platform.
pub struct VectorStore {
    pub id: String,
    pub name: Option<String>,
    #[serde(default)]
    pub file_count: u64,
    #[serde(default)]
    pub usage_bytes: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Uploaded file object owned by the platform.
pub struct PlatformFile {
    pub id: String,
    pub filename: String,
    pub bytes: u64,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Tool declarations attached to an assistant.
pub enum ToolSpec {
    FileSearch,
    Function { function: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Creation payload for a new assistant.
pub struct AssistantSpec {
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub tools: Vec<ToolSpec>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Partial update payload for an existing assistant.
pub struct AssistantUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_store_ids: Option<Vec<String>>,
}

impl AssistantUpdate {
    pub fn attach_vector_store(vector_store_id: impl Into<String>) -> Self {
        Self {
            instructions: None,
            vector_store_ids: Some(vec![vector_store_id.into()]),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Result of one completed conversation turn.
pub struct ConversationTurn {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Error)]
/// Failure taxonomy for remote platform calls.
///
/// `NotFound` triggers recreation by the reconciler; `Unavailable` is retried
/// and then escalates the circuit breaker, never recreation; `Validation`
/// surfaces to the caller unretried.
pub enum PlatformError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("{kind} '{id}' not found")]
    NotFound { kind: ResourceKind, id: String },
    #[error("platform unavailable (status {status}): {body}")]
    Unavailable { status: u16, body: String },
    #[error("validation rejected (status {status}): {body}")]
    Validation { status: u16, body: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("run {run_id} exceeded wait budget after {waited_ms}ms")]
    RunTimedOut { run_id: String, waited_ms: u64 },
}

impl PlatformError {
    /// True for transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Unavailable { .. } => true,
            PlatformError::Http(inner) => {
                inner.is_timeout() || inner.is_connect() || inner.is_request() || inner.is_body()
            }
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
    }
}

#[async_trait]
/// Trait contract for the remote assistant platform.
///
/// Every method maps to one remote call; retry and circuit-breaking wrap the
/// implementation, not the trait.
pub trait PlatformClient: Send + Sync {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant, PlatformError>;
    async fn get_assistant(&self, id: &str) -> Result<Assistant, PlatformError>;
    async fn update_assistant(
        &self,
        id: &str,
        update: &AssistantUpdate,
    ) -> Result<Assistant, PlatformError>;
    async fn delete_assistant(&self, id: &str) -> Result<(), PlatformError>;
    async fn list_assistants(&self) -> Result<Vec<Assistant>, PlatformError>;

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore, PlatformError>;
    async fn get_vector_store(&self, id: &str) -> Result<VectorStore, PlatformError>;
    async fn delete_vector_store(&self, id: &str) -> Result<(), PlatformError>;
    async fn list_vector_stores(&self) -> Result<Vec<VectorStore>, PlatformError>;

    async fn attach_file(&self, vector_store_id: &str, file_id: &str)
        -> Result<(), PlatformError>;
    async fn detach_file(&self, vector_store_id: &str, file_id: &str)
        -> Result<(), PlatformError>;
    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
    ) -> Result<Vec<String>, PlatformError>;

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<PlatformFile, PlatformError>;
    async fn delete_file(&self, id: &str) -> Result<(), PlatformError>;
    async fn list_files(&self) -> Result<Vec<PlatformFile>, PlatformError>;

    async fn create_thread(&self) -> Result<String, PlatformError>;
    async fn run_conversation_turn(
        &self,
        thread_id: &str,
        assistant_id: &str,
        message: &str,
    ) -> Result<ConversationTurn, PlatformError>;
}
