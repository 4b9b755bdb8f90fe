use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::ResponseCache;
use crate::outcome::{ChatOutcome, ChatUsage, ResponseSource};

const DEFAULT_DEGRADED_RESPONSE: &str =
    "I'm currently experiencing technical difficulties. Please try again in a few moments.";

#[derive(Debug, Clone)]
/// Request context shared by every strategy in the chain.
pub struct FallbackContext {
    pub message: String,
    pub session_id: String,
    pub fingerprint: String,
}

#[derive(Debug, Error)]
/// Typed reasons a strategy declines, replacing nested catch-all handlers.
pub enum FallbackError {
    #[error("no cached response for this fingerprint")]
    CacheMiss,
    #[error("no static response matched the message")]
    NoStaticMatch,
    #[error("primary path failed: {0}")]
    Primary(String),
    #[error("strategy failed: {0}")]
    Strategy(String),
}

#[async_trait]
/// One rung of the degradation ladder.
pub trait FallbackStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn attempt(&self, ctx: &FallbackContext) -> Result<ChatOutcome, FallbackError>;
}

/// Replays the last known good response for the same request fingerprint.
pub struct CachedResponseStrategy {
    cache: Arc<ResponseCache>,
}

impl CachedResponseStrategy {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FallbackStrategy for CachedResponseStrategy {
    fn name(&self) -> &'static str {
        "cached_response"
    }

    async fn attempt(&self, ctx: &FallbackContext) -> Result<ChatOutcome, FallbackError> {
        let mut outcome = self.cache.get(&ctx.fingerprint).ok_or(FallbackError::CacheMiss)?;
        outcome.session_id = ctx.session_id.clone();
        outcome.metadata.source = ResponseSource::Cache;
        Ok(outcome)
    }
}

/// Keyword-matched canned responses; the last line of defense with content.
pub struct StaticResponseStrategy {
    responses: Vec<(&'static str, &'static str)>,
}

impl Default for StaticResponseStrategy {
    fn default() -> Self {
        Self {
            responses: vec![
                (
                    "greeting",
                    "Hello! I'm an AI assistant. How can I help you today?",
                ),
                ("hello", "Hello! I'm an AI assistant. How can I help you today?"),
                (
                    "help",
                    "I can help you search through documents and answer questions based on available information.",
                ),
                (
                    "capabilities",
                    "I can search documents, answer questions, and provide information from my knowledge base.",
                ),
            ],
        }
    }
}

impl StaticResponseStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FallbackStrategy for StaticResponseStrategy {
    fn name(&self) -> &'static str {
        "static_response"
    }

    async fn attempt(&self, ctx: &FallbackContext) -> Result<ChatOutcome, FallbackError> {
        let query = ctx.message.to_lowercase();
        let matched = self
            .responses
            .iter()
            .find(|(keyword, _)| query.contains(keyword))
            .map(|(_, response)| *response)
            .ok_or(FallbackError::NoStaticMatch)?;
        Ok(ChatOutcome::new(
            matched,
            ctx.session_id.clone(),
            ChatUsage::default(),
            ResponseSource::Static,
        ))
    }
}

/// Ordered degradation ladder wrapping the primary request path.
///
/// The caller runs the primary (already circuit-guarded) and hands the
/// result in; on failure each strategy is tried in order and a success is
/// tagged with its 1-based level. Exhaustion yields a generic degraded
/// response so the caller always receives a well-formed outcome.
pub struct FallbackChain {
    strategies: Vec<Arc<dyn FallbackStrategy>>,
    cache: Option<Arc<ResponseCache>>,
}

impl FallbackChain {
    pub fn new(strategies: Vec<Arc<dyn FallbackStrategy>>) -> Self {
        Self {
            strategies,
            cache: None,
        }
    }

    /// Standard ladder: cached response, then static responses; successful
    /// primaries are recorded in the cache for later replay.
    pub fn standard(cache: Arc<ResponseCache>) -> Self {
        Self {
            strategies: vec![
                Arc::new(CachedResponseStrategy::new(cache.clone())),
                Arc::new(StaticResponseStrategy::new()),
            ],
            cache: Some(cache),
        }
    }

    pub async fn execute(
        &self,
        primary: Result<ChatOutcome, FallbackError>,
        ctx: &FallbackContext,
    ) -> ChatOutcome {
        match primary {
            Ok(outcome) => {
                if let Some(cache) = &self.cache {
                    cache.put(&ctx.fingerprint, &outcome);
                }
                outcome
            }
            Err(error) => {
                tracing::warn!(%error, "primary path failed; entering fallback chain");
                self.recover(ctx).await
            }
        }
    }

    async fn recover(&self, ctx: &FallbackContext) -> ChatOutcome {
        for (index, strategy) in self.strategies.iter().enumerate() {
            let level = (index + 1) as u32;
            match strategy.attempt(ctx).await {
                Ok(outcome) => {
                    tracing::info!(strategy = strategy.name(), level, "fallback produced response");
                    return outcome.mark_degraded(level);
                }
                Err(error) => {
                    tracing::debug!(strategy = strategy.name(), %error, "fallback declined");
                }
            }
        }

        let exhausted_level = (self.strategies.len() + 1) as u32;
        ChatOutcome::new(
            DEFAULT_DEGRADED_RESPONSE,
            ctx.session_id.clone(),
            ChatUsage::default(),
            ResponseSource::Degraded,
        )
        .mark_degraded(exhausted_level)
    }
}
