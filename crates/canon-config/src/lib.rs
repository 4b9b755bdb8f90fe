//! Persistence for the canonical `{assistant_id, vector_store_id}` pair.
//!
//! The config file is the only durable artifact the reconciliation layer
//! owns. It is written as a whole record with an atomic rename, and only on
//! success paths, so readers always observe a consistent pair (or the
//! previous consistent pair) and a crashed writer never leaves half a pair
//! behind.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use canon_core::replace_file_atomic;

pub const ASSISTANT_ID_ENV: &str = "CANON_ASSISTANT_ID";
pub const VECTOR_STORE_ID_ENV: &str = "CANON_VECTOR_STORE_ID";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// The canonical-resource pointer singleton.
pub struct CanonicalConfig {
    pub assistant_id: Option<String>,
    pub vector_store_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
    #[serde(default)]
    pub last_cleanup: Option<String>,
}

impl CanonicalConfig {
    pub fn has_pair(&self) -> bool {
        self.assistant_id.is_some() && self.vector_store_id.is_some()
    }

    /// New config pointing at a fresh keeper pair, carrying forward the
    /// original creation timestamp.
    pub fn with_pair(
        &self,
        assistant_id: impl Into<String>,
        vector_store_id: Option<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        CanonicalConfig {
            assistant_id: Some(assistant_id.into()),
            vector_store_id,
            created_at: self.created_at.clone().or_else(|| Some(now.clone())),
            last_updated: Some(now),
            last_cleanup: self.last_cleanup.clone(),
        }
    }

    pub fn mark_cleanup(&mut self) {
        self.last_cleanup = Some(Utc::now().to_rfc3339());
    }
}

/// File-backed store for [`CanonicalConfig`].
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config; a missing file yields an empty config. Environment
    /// overrides fill fields the file leaves absent, so a deployment can pin
    /// ids without a seeded file.
    pub fn load(&self) -> Result<CanonicalConfig> {
        let mut config = if self.path.exists() {
            let raw = std::fs::read_to_string(&self.path)
                .with_context(|| format!("failed to read {}", self.path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("malformed config file {}", self.path.display()))?
        } else {
            CanonicalConfig::default()
        };

        if config.assistant_id.is_none() {
            config.assistant_id = non_empty_env_var(ASSISTANT_ID_ENV);
        }
        if config.vector_store_id.is_none() {
            config.vector_store_id = non_empty_env_var(VECTOR_STORE_ID_ENV);
        }
        Ok(config)
    }

    /// Persists the whole record atomically.
    pub fn save(&self, config: &CanonicalConfig) -> Result<()> {
        let serialized =
            serde_json::to_string_pretty(config).context("failed to serialize config")?;
        replace_file_atomic(&self.path, &serialized)?;
        tracing::debug!(path = %self.path.display(), "canonical config saved");
        Ok(())
    }
}

fn non_empty_env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}
