use std::sync::Arc;

use canon_config::{CanonicalConfig, ConfigStore};
use canon_platform::{Assistant, AssistantSpec, AssistantUpdate, PlatformClient, ToolSpec};

use crate::ReconcileError;

#[derive(Debug, Clone)]
/// Creation parameters for the canonical pair.
pub struct ReconcilerSettings {
    pub assistant_name: String,
    pub model: String,
    pub instructions: String,
    pub vector_store_name: String,
    pub temperature: f32,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            assistant_name: "canon-assistant".to_string(),
            model: "gpt-4o".to_string(),
            instructions: "You answer questions using the attached document knowledge base. \
                           Cite the source document when you can."
                .to_string(),
            vector_store_name: "canon-knowledge-base".to_string(),
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// The resolved canonical pair.
pub struct CanonicalIds {
    pub assistant_id: String,
    pub vector_store_id: String,
}

/// Makes the canonical assistant/vector-store pair exist and keeps the
/// config pointing at it.
///
/// `ensure_canonical_resources` is idempotent: a healthy pair is a pure
/// read. Only "not found" falls through to creation; a platform outage
/// surfaces as an error so an unreachable resource is never shadowed by a
/// duplicate. The config file is rewritten on success paths only.
pub struct Reconciler {
    platform: Arc<dyn PlatformClient>,
    config: ConfigStore,
    settings: ReconcilerSettings,
    // Serializes concurrent ensures within this process. The cross-process
    // race stays possible and is repaired by the Auditor.
    serial: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        config: ConfigStore,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            platform,
            config,
            settings,
            serial: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn ensure_canonical_resources(&self) -> Result<CanonicalIds, ReconcileError> {
        let _serial = self.serial.lock().await;
        let config = self.config.load()?;

        if let Some(assistant_id) = config.assistant_id.clone() {
            match self.platform.get_assistant(&assistant_id).await {
                Ok(assistant) => return self.ensure_vector_store(&config, assistant).await,
                Err(error) if error.is_not_found() => {
                    tracing::warn!(
                        assistant_id,
                        "configured assistant no longer resolves; recreating"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        self.create_pair(&config).await
    }

    /// The assistant resolves; make sure a vector store is attached and
    /// recorded.
    async fn ensure_vector_store(
        &self,
        config: &CanonicalConfig,
        assistant: Assistant,
    ) -> Result<CanonicalIds, ReconcileError> {
        if let Some(vector_store_id) = config.vector_store_id.clone() {
            match self.platform.get_vector_store(&vector_store_id).await {
                Ok(store) => {
                    if !assistant.vector_store_ids.contains(&store.id) {
                        tracing::info!(
                            assistant_id = assistant.id,
                            vector_store_id = store.id,
                            "re-attaching configured vector store"
                        );
                        self.platform
                            .update_assistant(
                                &assistant.id,
                                &AssistantUpdate::attach_vector_store(&store.id),
                            )
                            .await?;
                    }
                    return Ok(CanonicalIds {
                        assistant_id: assistant.id,
                        vector_store_id: store.id,
                    });
                }
                Err(error) if error.is_not_found() => {
                    tracing::warn!(
                        vector_store_id,
                        "configured vector store no longer resolves; recreating"
                    );
                }
                Err(error) => return Err(error.into()),
            }
        }

        // Adopt a store the assistant already carries before creating one.
        if let Some(attached) = assistant.vector_store_ids.first() {
            let ids = CanonicalIds {
                assistant_id: assistant.id.clone(),
                vector_store_id: attached.clone(),
            };
            self.persist(config, &ids)?;
            return Ok(ids);
        }

        let store = self
            .platform
            .create_vector_store(&self.settings.vector_store_name)
            .await?;
        self.platform
            .update_assistant(
                &assistant.id,
                &AssistantUpdate::attach_vector_store(&store.id),
            )
            .await?;
        let ids = CanonicalIds {
            assistant_id: assistant.id,
            vector_store_id: store.id,
        };
        self.persist(config, &ids)?;
        tracing::info!(
            assistant_id = ids.assistant_id,
            vector_store_id = ids.vector_store_id,
            "vector store created and attached"
        );
        Ok(ids)
    }

    /// No usable assistant; build the pair from scratch.
    async fn create_pair(&self, config: &CanonicalConfig) -> Result<CanonicalIds, ReconcileError> {
        let spec = AssistantSpec {
            name: self.settings.assistant_name.clone(),
            model: self.settings.model.clone(),
            instructions: self.settings.instructions.clone(),
            tools: vec![ToolSpec::FileSearch],
            temperature: self.settings.temperature,
        };
        let assistant = self.platform.create_assistant(&spec).await?;
        let store = self
            .platform
            .create_vector_store(&self.settings.vector_store_name)
            .await?;
        self.platform
            .update_assistant(
                &assistant.id,
                &AssistantUpdate::attach_vector_store(&store.id),
            )
            .await?;

        let ids = CanonicalIds {
            assistant_id: assistant.id,
            vector_store_id: store.id,
        };
        self.persist(config, &ids)?;
        tracing::info!(
            assistant_id = ids.assistant_id,
            vector_store_id = ids.vector_store_id,
            "canonical pair created"
        );
        Ok(ids)
    }

    fn persist(&self, previous: &CanonicalConfig, ids: &CanonicalIds) -> Result<(), ReconcileError> {
        let updated = previous.with_pair(&ids.assistant_id, Some(ids.vector_store_id.clone()));
        self.config.save(&updated)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use canon_platform::testing::InMemoryPlatform;
    use canon_platform::PlatformError;
    use tempfile::TempDir;

    fn harness() -> (Arc<InMemoryPlatform>, ConfigStore, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let store = ConfigStore::new(dir.path().join("canonical.json"));
        (Arc::new(InMemoryPlatform::new()), store, dir)
    }

    fn reconciler(platform: Arc<InMemoryPlatform>, config: ConfigStore) -> Reconciler {
        Reconciler::new(platform, config, ReconcilerSettings::default())
    }

    #[tokio::test]
    async fn cold_start_creates_pair_and_writes_config() {
        let (platform, config, _dir) = harness();
        let reconciler = reconciler(platform.clone(), config.clone());

        let ids = reconciler
            .ensure_canonical_resources()
            .await
            .expect("ensure");

        assert_eq!(platform.assistant_count(), 1);
        assert_eq!(platform.vector_store_count(), 1);
        let saved = config.load().expect("load");
        assert_eq!(saved.assistant_id.as_deref(), Some(ids.assistant_id.as_str()));
        assert_eq!(
            saved.vector_store_id.as_deref(),
            Some(ids.vector_store_id.as_str())
        );
        assert!(saved.created_at.is_some());
    }

    #[tokio::test]
    async fn healthy_pair_is_a_pure_read() {
        let (platform, config, _dir) = harness();
        let reconciler = reconciler(platform.clone(), config.clone());

        let first = reconciler.ensure_canonical_resources().await.expect("first");
        let second = reconciler
            .ensure_canonical_resources()
            .await
            .expect("second");

        assert_eq!(first, second);
        assert_eq!(platform.call_count("create_assistant"), 1);
        assert_eq!(platform.call_count("create_vector_store"), 1);
        // Second ensure never touched update_assistant either.
        assert_eq!(platform.call_count("update_assistant"), 1);
    }

    #[tokio::test]
    async fn deleted_assistant_heals_into_fresh_pair() {
        let (platform, config, _dir) = harness();
        let reconciler = reconciler(platform.clone(), config.clone());

        let first = reconciler.ensure_canonical_resources().await.expect("first");
        platform.remove_assistant(&first.assistant_id);

        let second = reconciler
            .ensure_canonical_resources()
            .await
            .expect("second");
        assert_ne!(first.assistant_id, second.assistant_id);
        let saved = config.load().expect("load");
        assert_eq!(
            saved.assistant_id.as_deref(),
            Some(second.assistant_id.as_str())
        );
    }

    #[tokio::test]
    async fn unavailable_platform_never_creates_a_duplicate() {
        let (platform, config, _dir) = harness();
        let reconciler = reconciler(platform.clone(), config.clone());

        reconciler.ensure_canonical_resources().await.expect("seed");
        platform.fail_next(
            "get_assistant",
            PlatformError::Unavailable {
                status: 503,
                body: "overloaded".to_string(),
            },
        );

        let result = reconciler.ensure_canonical_resources().await;
        assert!(matches!(
            result,
            Err(ReconcileError::Platform(PlatformError::Unavailable { .. }))
        ));
        assert_eq!(platform.assistant_count(), 1);
        assert_eq!(platform.call_count("create_assistant"), 1);
    }

    #[tokio::test]
    async fn detached_assistant_gets_a_store_created_and_attached() {
        let (platform, config, _dir) = harness();
        platform.seed_assistant("asst_seeded", Vec::new());
        config
            .save(&CanonicalConfig {
                assistant_id: Some("asst_seeded".to_string()),
                ..CanonicalConfig::default()
            })
            .expect("seed config");
        let reconciler = reconciler(platform.clone(), config.clone());

        let ids = reconciler
            .ensure_canonical_resources()
            .await
            .expect("ensure");
        assert_eq!(ids.assistant_id, "asst_seeded");
        assert_eq!(platform.vector_store_count(), 1);
        let assistant = platform
            .get_assistant("asst_seeded")
            .await
            .expect("assistant");
        assert_eq!(assistant.vector_store_ids, vec![ids.vector_store_id.clone()]);
        let saved = config.load().expect("load");
        assert_eq!(
            saved.vector_store_id.as_deref(),
            Some(ids.vector_store_id.as_str())
        );
    }

    #[tokio::test]
    async fn evicted_attachment_is_restored_without_new_resources() {
        let (platform, config, _dir) = harness();
        let reconciler = reconciler(platform.clone(), config.clone());
        let ids = reconciler.ensure_canonical_resources().await.expect("seed");

        // Platform lost the attachment but both resources still exist.
        platform.seed_assistant(&ids.assistant_id, Vec::new());

        let healed = reconciler
            .ensure_canonical_resources()
            .await
            .expect("heal");
        assert_eq!(healed, ids);
        let assistant = platform
            .get_assistant(&ids.assistant_id)
            .await
            .expect("assistant");
        assert_eq!(assistant.vector_store_ids, vec![ids.vector_store_id]);
        assert_eq!(platform.vector_store_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_ensures_in_one_process_build_one_pair() {
        let (platform, config, _dir) = harness();
        let reconciler = Arc::new(reconciler(platform.clone(), config));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move {
                reconciler.ensure_canonical_resources().await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("ensure");
        }

        assert_eq!(platform.assistant_count(), 1);
        assert_eq!(platform.vector_store_count(), 1);
    }
}
