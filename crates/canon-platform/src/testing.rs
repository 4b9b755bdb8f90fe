//! In-memory platform double for tests. Behaves like a tiny assistants
//! backend: resources live in hash maps, ids and creation times are
//! monotonic, and individual calls can be scripted to fail.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{
    Assistant, AssistantSpec, AssistantUpdate, ConversationTurn, PlatformClient, PlatformError,
    PlatformFile, ResourceKind, VectorStore,
};

#[derive(Default)]
struct State {
    assistants: HashMap<String, Assistant>,
    vector_stores: HashMap<String, VectorStore>,
    files: HashMap<String, PlatformFile>,
    memberships: HashMap<String, Vec<String>>,
    next_id: u64,
    clock: u64,
    failures: HashMap<String, VecDeque<PlatformError>>,
    calls: HashMap<String, u64>,
    reply: String,
}

impl State {
    fn next(&mut self, prefix: &str) -> (String, u64) {
        self.next_id += 1;
        self.clock += 1;
        (format!("{prefix}_{}", self.next_id), self.clock)
    }
}

/// Scriptable in-memory [`PlatformClient`].
#[derive(Default)]
pub struct InMemoryPlatform {
    state: Mutex<State>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queues an error for the next invocation of `method`.
    pub fn fail_next(&self, method: &str, error: PlatformError) {
        self.lock()
            .failures
            .entry(method.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn set_reply(&self, text: &str) {
        self.lock().reply = text.to_string();
    }

    pub fn call_count(&self, method: &str) -> u64 {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn assistant_count(&self) -> usize {
        self.lock().assistants.len()
    }

    pub fn vector_store_count(&self) -> usize {
        self.lock().vector_stores.len()
    }

    /// Seeds an assistant directly, bypassing `create_assistant` accounting.
    pub fn seed_assistant(&self, id: &str, vector_store_ids: Vec<String>) {
        let mut state = self.lock();
        state.clock += 1;
        let created_at = state.clock;
        state.assistants.insert(
            id.to_string(),
            Assistant {
                id: id.to_string(),
                name: Some("seeded".to_string()),
                model: "model-x".to_string(),
                instructions: None,
                vector_store_ids,
                created_at,
            },
        );
    }

    pub fn seed_vector_store(&self, id: &str, file_count: u64) {
        let mut state = self.lock();
        state.clock += 1;
        let created_at = state.clock;
        state.vector_stores.insert(
            id.to_string(),
            VectorStore {
                id: id.to_string(),
                name: Some("seeded".to_string()),
                file_count,
                usage_bytes: file_count * 1024,
                created_at,
            },
        );
        state.memberships.entry(id.to_string()).or_default();
    }

    pub fn remove_assistant(&self, id: &str) {
        self.lock().assistants.remove(id);
    }

    pub fn evict_file(&self, vector_store_id: &str, file_id: &str) {
        let mut state = self.lock();
        if let Some(members) = state.memberships.get_mut(vector_store_id) {
            members.retain(|member| member != file_id);
        }
        if let Some(store) = state.vector_stores.get_mut(vector_store_id) {
            store.file_count = store.file_count.saturating_sub(1);
        }
    }

    fn enter(&self, method: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        *state.calls.entry(method.to_string()).or_insert(0) += 1;
        if let Some(queue) = state.failures.get_mut(method) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for InMemoryPlatform {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant, PlatformError> {
        self.enter("create_assistant")?;
        let mut state = self.lock();
        let (id, created_at) = state.next("asst");
        let assistant = Assistant {
            id: id.clone(),
            name: Some(spec.name.clone()),
            model: spec.model.clone(),
            instructions: Some(spec.instructions.clone()),
            vector_store_ids: Vec::new(),
            created_at,
        };
        state.assistants.insert(id, assistant.clone());
        Ok(assistant)
    }

    async fn get_assistant(&self, id: &str) -> Result<Assistant, PlatformError> {
        self.enter("get_assistant")?;
        self.lock()
            .assistants
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::Assistant,
                id: id.to_string(),
            })
    }

    async fn update_assistant(
        &self,
        id: &str,
        update: &AssistantUpdate,
    ) -> Result<Assistant, PlatformError> {
        self.enter("update_assistant")?;
        let mut state = self.lock();
        let assistant = state
            .assistants
            .get_mut(id)
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::Assistant,
                id: id.to_string(),
            })?;
        if let Some(instructions) = &update.instructions {
            assistant.instructions = Some(instructions.clone());
        }
        if let Some(ids) = &update.vector_store_ids {
            assistant.vector_store_ids = ids.clone();
        }
        Ok(assistant.clone())
    }

    async fn delete_assistant(&self, id: &str) -> Result<(), PlatformError> {
        self.enter("delete_assistant")?;
        if self.lock().assistants.remove(id).is_none() {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::Assistant,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_assistants(&self) -> Result<Vec<Assistant>, PlatformError> {
        self.enter("list_assistants")?;
        let mut all: Vec<Assistant> = self.lock().assistants.values().cloned().collect();
        all.sort_by_key(|assistant| assistant.created_at);
        Ok(all)
    }

    async fn create_vector_store(&self, name: &str) -> Result<VectorStore, PlatformError> {
        self.enter("create_vector_store")?;
        let mut state = self.lock();
        let (id, created_at) = state.next("vs");
        let store = VectorStore {
            id: id.clone(),
            name: Some(name.to_string()),
            file_count: 0,
            usage_bytes: 0,
            created_at,
        };
        state.vector_stores.insert(id.clone(), store.clone());
        state.memberships.insert(id, Vec::new());
        Ok(store)
    }

    async fn get_vector_store(&self, id: &str) -> Result<VectorStore, PlatformError> {
        self.enter("get_vector_store")?;
        self.lock()
            .vector_stores
            .get(id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::VectorStore,
                id: id.to_string(),
            })
    }

    async fn delete_vector_store(&self, id: &str) -> Result<(), PlatformError> {
        self.enter("delete_vector_store")?;
        let mut state = self.lock();
        if state.vector_stores.remove(id).is_none() {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::VectorStore,
                id: id.to_string(),
            });
        }
        state.memberships.remove(id);
        Ok(())
    }

    async fn list_vector_stores(&self) -> Result<Vec<VectorStore>, PlatformError> {
        self.enter("list_vector_stores")?;
        let mut all: Vec<VectorStore> = self.lock().vector_stores.values().cloned().collect();
        all.sort_by_key(|store| store.created_at);
        Ok(all)
    }

    async fn attach_file(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<(), PlatformError> {
        self.enter("attach_file")?;
        let mut state = self.lock();
        if !state.vector_stores.contains_key(vector_store_id) {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::VectorStore,
                id: vector_store_id.to_string(),
            });
        }
        let members = state
            .memberships
            .entry(vector_store_id.to_string())
            .or_default();
        if !members.iter().any(|member| member == file_id) {
            members.push(file_id.to_string());
            if let Some(store) = state.vector_stores.get_mut(vector_store_id) {
                store.file_count += 1;
            }
        }
        Ok(())
    }

    async fn detach_file(
        &self,
        vector_store_id: &str,
        file_id: &str,
    ) -> Result<(), PlatformError> {
        self.enter("detach_file")?;
        self.evict_file(vector_store_id, file_id);
        Ok(())
    }

    async fn list_vector_store_files(
        &self,
        vector_store_id: &str,
    ) -> Result<Vec<String>, PlatformError> {
        self.enter("list_vector_store_files")?;
        self.lock()
            .memberships
            .get(vector_store_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound {
                kind: ResourceKind::VectorStore,
                id: vector_store_id.to_string(),
            })
    }

    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<PlatformFile, PlatformError> {
        self.enter("upload_file")?;
        let mut state = self.lock();
        let (id, created_at) = state.next("file");
        let file = PlatformFile {
            id: id.clone(),
            filename: filename.to_string(),
            bytes: bytes.len() as u64,
            created_at,
        };
        state.files.insert(id, file.clone());
        Ok(file)
    }

    async fn delete_file(&self, id: &str) -> Result<(), PlatformError> {
        self.enter("delete_file")?;
        if self.lock().files.remove(id).is_none() {
            return Err(PlatformError::NotFound {
                kind: ResourceKind::File,
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_files(&self) -> Result<Vec<PlatformFile>, PlatformError> {
        self.enter("list_files")?;
        let mut all: Vec<PlatformFile> = self.lock().files.values().cloned().collect();
        all.sort_by_key(|file| file.created_at);
        Ok(all)
    }

    async fn create_thread(&self) -> Result<String, PlatformError> {
        self.enter("create_thread")?;
        let mut state = self.lock();
        let (id, _) = state.next("thread");
        Ok(id)
    }

    async fn run_conversation_turn(
        &self,
        _thread_id: &str,
        _assistant_id: &str,
        message: &str,
    ) -> Result<ConversationTurn, PlatformError> {
        self.enter("run_conversation_turn")?;
        let state = self.lock();
        let text = if state.reply.is_empty() {
            format!("echo: {message}")
        } else {
            state.reply.clone()
        };
        let input_tokens = message.split_whitespace().count() as u64;
        let output_tokens = text.split_whitespace().count() as u64;
        Ok(ConversationTurn {
            text,
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        })
    }
}
