use std::sync::Arc;

use serde::Serialize;

use canon_config::ConfigStore;
use canon_platform::{Assistant, PlatformClient, VectorStore};

use crate::ReconcileError;

#[derive(Debug, Clone, Serialize, PartialEq)]
/// How the persisted config relates to what actually exists remotely.
pub struct ConfigState {
    pub assistant_id: Option<String>,
    pub vector_store_id: Option<String>,
    pub assistant_resolves: bool,
    pub vector_store_resolves: bool,
}

#[derive(Debug, Clone, Serialize)]
/// Snapshot of every remote resource plus the keeper decision.
pub struct AuditReport {
    pub assistants: Vec<Assistant>,
    pub vector_stores: Vec<VectorStore>,
    pub config_state: ConfigState,
    pub keeper_assistant: Option<String>,
    pub keeper_vector_store: Option<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
/// What a cleanup pass did (or would do, when `dry_run`).
pub struct CleanupLog {
    pub deleted_assistants: Vec<String>,
    pub deleted_vector_stores: Vec<String>,
    pub kept_assistant: Option<String>,
    pub kept_vector_store: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
/// Post-cleanup consistency check.
pub struct VerifyReport {
    pub consistent: bool,
    pub assistant_count: usize,
    pub vector_store_count: usize,
    pub issues: Vec<String>,
}

/// Out-of-band consistency sweep over all remote resources.
///
/// The audit is the only place drift from a cold-start race becomes
/// visible, because it lists everything rather than trusting the config.
/// Cleanup is safe while the system is live: document `remote_file_id`s
/// belong to remote files, not to the assistant or store being replaced,
/// and a follow-up file sync re-attaches them.
pub struct Auditor {
    platform: Arc<dyn PlatformClient>,
    config: ConfigStore,
}

impl Auditor {
    pub fn new(platform: Arc<dyn PlatformClient>, config: ConfigStore) -> Self {
        Self { platform, config }
    }

    pub async fn audit(&self) -> Result<AuditReport, ReconcileError> {
        let assistants = self.platform.list_assistants().await?;
        let vector_stores = self.platform.list_vector_stores().await?;
        let config = self.config.load()?;

        let assistant_resolves = match &config.assistant_id {
            Some(id) => assistants.iter().any(|assistant| &assistant.id == id),
            None => false,
        };
        let vector_store_resolves = match &config.vector_store_id {
            Some(id) => vector_stores.iter().any(|store| &store.id == id),
            None => false,
        };
        let config_state = ConfigState {
            assistant_id: config.assistant_id.clone(),
            vector_store_id: config.vector_store_id.clone(),
            assistant_resolves,
            vector_store_resolves,
        };

        let keeper_assistant = select_keeper_assistant(&assistants, &config_state);
        let keeper_vector_store = select_keeper_vector_store(&vector_stores, &config_state);

        let mut recommendations = Vec::new();
        if assistants.len() > 1 {
            recommendations.push(format!(
                "delete {} duplicate assistant(s)",
                assistants.len() - 1
            ));
        }
        if vector_stores.len() > 1 {
            recommendations.push(format!(
                "delete {} duplicate vector store(s)",
                vector_stores.len() - 1
            ));
        }
        if config_state.assistant_id.is_some() && !assistant_resolves {
            recommendations
                .push("config references an assistant that no longer exists".to_string());
        }
        if config_state.vector_store_id.is_some() && !vector_store_resolves {
            recommendations
                .push("config references a vector store that no longer exists".to_string());
        }
        if config_state.assistant_id.is_none() && keeper_assistant.is_some() {
            recommendations.push("config does not record the surviving assistant".to_string());
        }

        tracing::info!(
            assistants = assistants.len(),
            vector_stores = vector_stores.len(),
            recommendations = recommendations.len(),
            "audit complete"
        );
        Ok(AuditReport {
            assistants,
            vector_stores,
            config_state,
            keeper_assistant,
            keeper_vector_store,
            recommendations,
        })
    }

    /// Deletes every non-keeper and rewrites the config to the keepers.
    /// Individual delete failures are logged and skipped so one stubborn
    /// resource cannot wedge the sweep.
    pub async fn cleanup(
        &self,
        report: &AuditReport,
        dry_run: bool,
    ) -> Result<CleanupLog, ReconcileError> {
        let mut log = CleanupLog {
            deleted_assistants: Vec::new(),
            deleted_vector_stores: Vec::new(),
            kept_assistant: report.keeper_assistant.clone(),
            kept_vector_store: report.keeper_vector_store.clone(),
            dry_run,
        };

        for assistant in &report.assistants {
            if Some(&assistant.id) == report.keeper_assistant.as_ref() {
                continue;
            }
            if dry_run {
                log.deleted_assistants.push(assistant.id.clone());
                continue;
            }
            match self.platform.delete_assistant(&assistant.id).await {
                Ok(()) => log.deleted_assistants.push(assistant.id.clone()),
                Err(error) => {
                    tracing::warn!(assistant_id = assistant.id, %error, "delete failed; skipping")
                }
            }
        }

        for store in &report.vector_stores {
            if Some(&store.id) == report.keeper_vector_store.as_ref() {
                continue;
            }
            if dry_run {
                log.deleted_vector_stores.push(store.id.clone());
                continue;
            }
            match self.platform.delete_vector_store(&store.id).await {
                Ok(()) => log.deleted_vector_stores.push(store.id.clone()),
                Err(error) => {
                    tracing::warn!(vector_store_id = store.id, %error, "delete failed; skipping")
                }
            }
        }

        if !dry_run {
            if let Some(keeper) = &report.keeper_assistant {
                let previous = self.config.load()?;
                let mut updated =
                    previous.with_pair(keeper, report.keeper_vector_store.clone());
                updated.mark_cleanup();
                self.config.save(&updated)?;
            }
            tracing::info!(
                deleted_assistants = log.deleted_assistants.len(),
                deleted_vector_stores = log.deleted_vector_stores.len(),
                "cleanup applied"
            );
        }
        Ok(log)
    }

    /// Re-audits and confirms the canonical invariant: exactly one
    /// assistant, at most one vector store, config pointing at them.
    pub async fn verify(&self) -> Result<VerifyReport, ReconcileError> {
        let report = self.audit().await?;
        let mut issues = Vec::new();
        if report.assistants.len() != 1 {
            issues.push(format!(
                "expected exactly 1 assistant, found {}",
                report.assistants.len()
            ));
        }
        if report.vector_stores.len() > 1 {
            issues.push(format!(
                "expected at most 1 vector store, found {}",
                report.vector_stores.len()
            ));
        }
        if report.config_state.assistant_id.is_some() && !report.config_state.assistant_resolves {
            issues.push("config assistant id does not resolve".to_string());
        }
        if report.config_state.vector_store_id.is_some()
            && !report.config_state.vector_store_resolves
        {
            issues.push("config vector store id does not resolve".to_string());
        }
        Ok(VerifyReport {
            consistent: issues.is_empty(),
            assistant_count: report.assistants.len(),
            vector_store_count: report.vector_stores.len(),
            issues,
        })
    }
}

/// Keeper priority: config-referenced id if it resolves, then an assistant
/// with a vector store attached, then the most recently created.
fn select_keeper_assistant(
    assistants: &[Assistant],
    config_state: &ConfigState,
) -> Option<String> {
    if config_state.assistant_resolves {
        return config_state.assistant_id.clone();
    }
    if let Some(attached) = assistants
        .iter()
        .filter(|assistant| assistant.has_vector_store())
        .max_by_key(|assistant| assistant.created_at)
    {
        return Some(attached.id.clone());
    }
    assistants
        .iter()
        .max_by_key(|assistant| assistant.created_at)
        .map(|assistant| assistant.id.clone())
}

/// Keeper priority: config-referenced id if it resolves, then the store
/// with the most files (size breaks ties), then the most recently created.
fn select_keeper_vector_store(
    vector_stores: &[VectorStore],
    config_state: &ConfigState,
) -> Option<String> {
    if config_state.vector_store_resolves {
        return config_state.vector_store_id.clone();
    }
    if let Some(populated) = vector_stores
        .iter()
        .filter(|store| store.file_count > 0)
        .max_by_key(|store| (store.file_count, store.usage_bytes, store.created_at))
    {
        return Some(populated.id.clone());
    }
    vector_stores
        .iter()
        .max_by_key(|store| store.created_at)
        .map(|store| store.id.clone())
}
