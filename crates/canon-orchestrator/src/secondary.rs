use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use canon_resilience::{CircuitBreaker, CircuitBreakerConfig};

#[derive(Debug, Clone, Serialize, PartialEq)]
/// Result shape of the structured-data service.
pub struct TabularResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl TabularResult {
    /// Plain-text rendering for the chat response body.
    pub fn render(&self) -> String {
        let mut out = self.columns.join(" | ");
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .map(|value| match value {
                    serde_json::Value::String(text) => text.clone(),
                    other => other.to_string(),
                })
                .collect();
            out.push('\n');
            out.push_str(&cells.join(" | "));
        }
        out
    }
}

#[derive(Debug, Error)]
pub enum SecondaryError {
    #[error("secondary service unavailable: {0}")]
    Unavailable(String),
    #[error("secondary service rejected the query: {0}")]
    Rejected(String),
}

#[async_trait]
/// Trait contract for the structured-data query path. Implementations are
/// failure-prone by nature, so callers go through [`GuardedSecondary`].
pub trait SecondaryQueryService: Send + Sync {
    async fn is_applicable(&self, message: &str) -> Result<bool, SecondaryError>;
    async fn execute(&self, message: &str) -> Result<TabularResult, SecondaryError>;
}

/// Circuit-broken wrapper; the data route requires a closed circuit.
pub struct GuardedSecondary {
    service: Arc<dyn SecondaryQueryService>,
    breaker: CircuitBreaker,
}

impl GuardedSecondary {
    pub fn new(service: Arc<dyn SecondaryQueryService>) -> Self {
        Self {
            service,
            breaker: CircuitBreaker::new(
                "secondary-query",
                CircuitBreakerConfig::secondary_service(),
            ),
        }
    }

    pub fn with_breaker(service: Arc<dyn SecondaryQueryService>, breaker: CircuitBreaker) -> Self {
        Self { service, breaker }
    }

    /// Applicability with an open circuit is simply "no": the router falls
    /// through to the document path instead of queueing rejections.
    pub async fn is_applicable(&self, message: &str) -> bool {
        if self.breaker.try_acquire().is_err() {
            tracing::debug!("secondary circuit open; data route disabled");
            return false;
        }
        match self.service.is_applicable(message).await {
            Ok(applicable) => {
                self.breaker.record_success();
                applicable
            }
            Err(error) => {
                tracing::warn!(%error, "secondary applicability probe failed");
                self.breaker.record_failure();
                false
            }
        }
    }

    pub async fn execute(&self, message: &str) -> Result<TabularResult, SecondaryError> {
        self.breaker
            .try_acquire()
            .map_err(|rejected| SecondaryError::Unavailable(rejected.to_string()))?;
        match self.service.execute(message).await {
            Ok(result) => {
                self.breaker.record_success();
                Ok(result)
            }
            Err(error) => {
                self.breaker.record_failure();
                Err(error)
            }
        }
    }
}
