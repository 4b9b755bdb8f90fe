use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::retry::{parse_retry_after_ms, retry_delay_ms, should_retry_status, DEFAULT_MAX_ATTEMPTS};
use crate::types::{
    Assistant, AssistantSpec, AssistantUpdate, ConversationTurn, PlatformClient, PlatformError,
    PlatformFile, ResourceKind, ToolSpec, VectorStore,
};

const ASSISTANTS_BETA_HEADER: &str = "assistants=v2";
const LIST_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
/// Connection and retry settings for [`HttpPlatformClient`].
pub struct PlatformClientConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
    pub max_attempts: usize,
    pub retry_jitter: bool,
    /// Number of run-status polls before the turn is cancelled upstream.
    pub run_poll_budget: usize,
    pub run_poll_interval_ms: u64,
}

impl PlatformClientConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            request_timeout_ms: 30_000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_jitter: true,
            run_poll_budget: 50,
            run_poll_interval_ms: 1_000,
        }
    }
}

/// Reqwest-backed client for an assistants-style platform API.
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: reqwest::Client,
    config: PlatformClientConfig,
}

#[derive(Debug, Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct WireAssistant {
    id: String,
    name: Option<String>,
    model: String,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    tool_resources: Option<WireToolResources>,
    created_at: u64,
}

#[derive(Debug, Deserialize)]
struct WireToolResources {
    #[serde(default)]
    file_search: Option<WireFileSearchResources>,
}

#[derive(Debug, Deserialize)]
struct WireFileSearchResources {
    #[serde(default)]
    vector_store_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireVectorStore {
    id: String,
    name: Option<String>,
    #[serde(default)]
    file_counts: Option<WireFileCounts>,
    #[serde(default)]
    usage_bytes: u64,
    created_at: u64,
}

#[derive(Debug, Deserialize)]
struct WireFileCounts {
    #[serde(default)]
    total: u64,
}

#[derive(Debug, Deserialize)]
struct WireFile {
    id: String,
    filename: String,
    #[serde(default)]
    bytes: u64,
    created_at: u64,
}

#[derive(Debug, Deserialize)]
struct WireVectorStoreFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireThread {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireRun {
    id: String,
    status: String,
    #[serde(default)]
    usage: Option<WireRunUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct WireRunUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireThreadMessage {
    #[serde(default)]
    content: Vec<WireMessageContent>,
}

#[derive(Debug, Deserialize)]
struct WireMessageContent {
    #[serde(default)]
    text: Option<WireMessageText>,
}

#[derive(Debug, Deserialize)]
struct WireMessageText {
    value: String,
}

impl From<WireAssistant> for Assistant {
    fn from(wire: WireAssistant) -> Self {
        let vector_store_ids = wire
            .tool_resources
            .and_then(|resources| resources.file_search)
            .map(|search| search.vector_store_ids)
            .unwrap_or_default();
        Assistant {
            id: wire.id,
            name: wire.name,
            model: wire.model,
            instructions: wire.instructions,
            vector_store_ids,
            created_at: wire.created_at,
        }
    }
}

impl From<WireVectorStore> for VectorStore {
    fn from(wire: WireVectorStore) -> Self {
        VectorStore {
            id: wire.id,
            name: wire.name,
            file_count: wire.file_counts.map(|counts| counts.total).unwrap_or(0),
            usage_bytes: wire.usage_bytes,
            created_at: wire.created_at,
        }
    }
}

impl From<WireFile> for PlatformFile {
    fn from(wire: WireFile) -> Self {
        PlatformFile {
            id: wire.id,
            filename: wire.filename,
            bytes: wire.bytes,
            created_at: wire.created_at,
        }
    }
}

fn tool_payload(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| match tool {
            ToolSpec::FileSearch => json!({ "type": "file_search" }),
            ToolSpec::Function { function } => json!({ "type": "function", "function": function }),
        })
        .collect()
}

impl HttpPlatformClient {
    pub fn new(config: PlatformClientConfig) -> Result<Self, PlatformError> {
        if config.api_key.trim().is_empty() {
            return Err(PlatformError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                PlatformError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );
        headers.insert(
            "OpenAI-Beta",
            HeaderValue::from_static(ASSISTANTS_BETA_HEADER),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Sends a request with bounded retries for transient failures.
    ///
    /// 404 maps to `NotFound` for the named resource, retryable statuses are
    /// re-attempted with backoff and a Retry-After floor, remaining 4xx map
    /// to `Validation`.
    async fn send_with_retry<BuildFn>(
        &self,
        kind: ResourceKind,
        id: &str,
        build: BuildFn,
    ) -> Result<(StatusCode, String), PlatformError>
    where
        BuildFn: Fn() -> reqwest::RequestBuilder,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            let response = match build().send().await {
                Ok(response) => response,
                Err(error) => {
                    let transport = PlatformError::Http(error);
                    if transport.is_retryable() && attempt + 1 < max_attempts {
                        let delay = retry_delay_ms(attempt, self.config.retry_jitter, None);
                        tracing::debug!(%kind, attempt, delay_ms = delay, "transport error; retrying");
                        sleep(std::time::Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(transport);
                }
            };

            let status = response.status();
            let retry_after_ms = parse_retry_after_ms(response.headers());
            let body = response.text().await.unwrap_or_default();

            if status.is_success() {
                return Ok((status, body));
            }

            if status == StatusCode::NOT_FOUND {
                return Err(PlatformError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            }

            if should_retry_status(status.as_u16()) {
                if attempt + 1 < max_attempts {
                    let delay =
                        retry_delay_ms(attempt, self.config.retry_jitter, retry_after_ms);
                    tracing::debug!(
                        %kind,
                        status = status.as_u16(),
                        attempt,
                        delay_ms = delay,
                        "retryable status; backing off"
                    );
                    sleep(std::time::Duration::from_millis(delay)).await;
                    attempt += 1;
                    continue;
                }
                return Err(PlatformError::Unavailable {
                    status: status.as_u16(),
                    body,
                });
            }

            return Err(PlatformError::Validation {
                status: status.as_u16(),
                body,
            });
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        kind: ResourceKind,
        id: &str,
        path: String,
    ) -> Result<T, PlatformError> {
        let url = self.url(&path);
        let (_, body) = self
            .send_with_retry(kind, id, || self.client.get(url.clone()))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        kind: ResourceKind,
        id: &str,
        path: String,
        payload: Value,
    ) -> Result<T, PlatformError> {
        let url = self.url(&path);
        let (_, body) = self
            .send_with_retry(kind, id, || self.client.post(url.clone()).json(&payload))
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn delete_resource(
        &self,
        kind: ResourceKind,
        id: &str,
        path: String,
    ) -> Result<(), PlatformError> {
        let url = self.url(&path);
        self.send_with_retry(kind, id, || self.client.delete(url.clone()))
            .await?;
        Ok(())
    }

    async fn poll_run(
        &self,
        thread_id: &str,
        run: WireRun,
    ) -> Result<WireRun, PlatformError> {
        let mut run = run;
        let mut polls = 0usize;
        while matches!(
            run.status.as_str(),
            "queued" | "in_progress" | "requires_action"
        ) {
            if polls >= self.config.run_poll_budget {
                let waited_ms =
                    (polls as u64).saturating_mul(self.config.run_poll_interval_ms.max(1));
                self.cancel_run(thread_id, &run.id).await;
                return Err(PlatformError::RunTimedOut {
                    run_id: run.id,
                    waited_ms,
                });
            }
            sleep(std::time::Duration::from_millis(
                self.config.run_poll_interval_ms.max(1),
            ))
            .await;
            polls += 1;
            run = self
                .get_json(
                    ResourceKind::Run,
                    &run.id,
                    format!("threads/{thread_id}/runs/{}", run.id),
                )
                .await?;
        }
        Ok(run)
    }

    /// Best-effort retraction of a run that blew its wait budget.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        let url = self.url(&format!("threads/{thread_id}/runs/{run_id}/cancel"));
        let result = self
            .send_with_retry(ResourceKind::Run, run_id, || self.client.post(url.clone()))
            .await;
        if let Err(error) = result {
            tracing::warn!(run_id, %error, "failed to cancel timed-out run");
        }
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant, PlatformError> {
        let payload = json!({
            "name": spec.name,
            "model": spec.model,
            "instructions": spec.instructions,
            "tools": tool_payload(&spec.tools),
            "temperature": spec.temperature,
        });
        let wire: WireAssistant = self
            .post_json(ResourceKind::Assistant, "new", "assistants".to_string(), payload)
            .await?;
        Ok(wire.into())
    }

    async fn get_assistant(&self, id: &str) -> Result<Assistant, PlatformError> {
        let wire: WireAssistant = self
            .get_json(ResourceKind::Assistant, id, format!("assistants/{id}"))
            .await?;
        Ok(wire.into())
    }

    async fn update_assistant(
        &self,
        id: &str,
        update: &AssistantUpdate,
    ) -> Result<Assistant, PlatformError> {
        let mut payload = serde_json::Map::new();
        if let Some(instructions) = &update.instructions {
            payload.insert("instructions".to_string(), json!(instructions));
        }
        if let Some(vector_store_ids) = &update.vector_store_ids {
            payload.insert(
                "tool_resources".to_string(),
                json!({ "file_search": { "vector_store_ids": vector_store_ids } }),
            );
        }
        let wire: WireAssistant = self
            .post_json(
                ResourceKind::Assistant,
                id,
                format!("assistants/{id}"),
                Value::Object(payload),
            )
            .await?;
        Ok(wire.into())
    }

    async fn delete_assistant(&self, id: &str) -> Result<(), PlatformError> {
        self.delete_resource(ResourceKind::Assistant, id, format!("assistants/{id}"))
            .await
    }

    async fn list_assistants(&self) -> Result<Vec<Assistant>, PlatformError> {
        let envelope: ListEnvelope<WireAssistant> = self
            .get_json(
                ResourceKind::Assistant,
                "all",
                format!("assistants?limit={LIST_PAGE_LIMIT}"),
            )
            .await?;
        Ok(envelope.data.into_iter().map(Assistant::from).collect())
    }

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore, PlatformError> {
        let wire: WireVectorStore = self
            .post_json(
                ResourceKind::VectorStore,
                "new",
                "vector_stores".to_string(),
                json!({ "name": name }),
            )
            .await?;
        Ok(wire.into())
    }

    async fn get_vector_store(&self, id: &str) -> Result<VectorStore, PlatformError> {
        let wire: WireVectorStore = self
            .get_json(ResourceKind::VectorStore, id, format!("vector_stores/{id}"))
            .await?;
        Ok(wire.into())
    }

    async fn delete_vector_store(&self, id: &str) -> Result<(), PlatformError> {
        self.delete_resource(ResourceKind::VectorStore, id, format!("vector_stores/{id}"))
            .await
    }

    async fn list_vector_stores(&self) -> Result<Vec<VectorStore>, PlatformError> {
        let envelope: ListEnvelope<WireVectorStore> = self
            .get_json(
                ResourceKind::VectorStore,
                "all",
                format!("vector_stores?limit={LIST_PAGE_LIMIT}"),
            )
            .await?;
        Ok(envelope.data.into_iter().map(VectorStore::from).collect())
    }

    async fn attach_file(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<(), PlatformError> {
        let _: Value = self
            .post_json(
                ResourceKind::VectorStore,
                vector_store_id,
                format!("vector_stores/{vector_store_id}/files"),
                json!({ "file_id": file_id }),
            )
            .await?;
        Ok(())
    }

    async fn detach_file(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<(), PlatformError> {
        self.delete_resource(
            ResourceKind::File,
            file_id,
            format!("vector_stores/{vector_store_id}/files/{file_id}"),
        )
        .await
    }

    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        let envelope: ListEnvelope<WireVectorStoreFile> = self
            .get_json(
                ResourceKind::VectorStore,
                vector_store_id,
                format!("vector_stores/{vector_store_id}/files?limit={LIST_PAGE_LIMIT}"),
            )
            .await?;
        Ok(envelope.data.into_iter().map(|file| file.id).collect())
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<PlatformFile, PlatformError> {
        let url = self.url("files");
        let filename = filename.to_string();
        let (_, body) = self
            .send_with_retry(ResourceKind::File, &filename, || {
                let part = reqwest::multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone());
                let form = reqwest::multipart::Form::new()
                    .text("purpose", "assistants")
                    .part("file", part);
                self.client.post(url.clone()).multipart(form)
            })
            .await?;
        let wire: WireFile = serde_json::from_str(&body)?;
        Ok(wire.into())
    }

    async fn delete_file(&self, id: &str) -> Result<(), PlatformError> {
        self.delete_resource(ResourceKind::File, id, format!("files/{id}"))
            .await
    }

    async fn list_files(&self) -> Result<Vec<PlatformFile>, PlatformError> {
        let envelope: ListEnvelope<WireFile> = self
            .get_json(
                ResourceKind::File,
                "all",
                "files?purpose=assistants".to_string(),
            )
            .await?;
        Ok(envelope.data.into_iter().map(PlatformFile::from).collect())
    }

    async fn create_thread(&self) -> Result<String, PlatformError> {
        let wire: WireThread = self
            .post_json(
                ResourceKind::Thread,
                "new",
                "threads".to_string(),
                json!({}),
            )
            .await?;
        Ok(wire.id)
    }

    async fn run_conversation_turn(
        &self,
        thread_id: &str,
        assistant_id: &str,
        message: &str,
    ) -> Result<ConversationTurn, PlatformError> {
        // Files are reached through the assistant's vector store; attaching
        // them per-message spawns duplicate untitled stores on the platform.
        let _: Value = self
            .post_json(
                ResourceKind::Thread,
                thread_id,
                format!("threads/{thread_id}/messages"),
                json!({ "role": "user", "content": message }),
            )
            .await?;

        let run: WireRun = self
            .post_json(
                ResourceKind::Run,
                "new",
                format!("threads/{thread_id}/runs"),
                json!({ "assistant_id": assistant_id }),
            )
            .await?;

        let run = self.poll_run(thread_id, run).await?;
        if run.status != "completed" {
            return Err(PlatformError::InvalidResponse(format!(
                "run {} finished with status '{}'",
                run.id, run.status
            )));
        }

        let messages: ListEnvelope<WireThreadMessage> = self
            .get_json(
                ResourceKind::Thread,
                thread_id,
                format!("threads/{thread_id}/messages?order=desc&limit=1"),
            )
            .await?;
        let text = messages
            .data
            .into_iter()
            .next()
            .and_then(|message| {
                message
                    .content
                    .into_iter()
                    .find_map(|block| block.text.map(|text| text.value))
            })
            .ok_or_else(|| {
                PlatformError::InvalidResponse("run completed without assistant text".to_string())
            })?;

        let usage = run.usage.unwrap_or_default();
        Ok(ConversationTurn {
            text,
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
    }
}
