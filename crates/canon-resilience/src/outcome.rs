use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Which path produced a response.
pub enum ResponseSource {
    SecondaryQuery,
    DocumentRetrieval,
    Conversation,
    Cache,
    Static,
    Degraded,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
/// Token and cost accounting for one turn.
pub struct ChatUsage {
    pub total_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Response provenance; `degraded` and `fallback_level` let callers and
/// tests distinguish genuine answers from degraded ones.
pub struct OutcomeMetadata {
    pub source: ResponseSource,
    pub degraded: bool,
    pub fallback_level: u32,
}

impl OutcomeMetadata {
    pub fn primary(source: ResponseSource) -> Self {
        Self {
            source,
            degraded: false,
            fallback_level: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// The uniform response shape every strategy returns.
pub struct ChatOutcome {
    pub response: String,
    pub session_id: String,
    pub usage: ChatUsage,
    pub metadata: OutcomeMetadata,
}

impl ChatOutcome {
    pub fn new(
        response: impl Into<String>,
        session_id: impl Into<String>,
        usage: ChatUsage,
        source: ResponseSource,
    ) -> Self {
        Self {
            response: response.into(),
            session_id: session_id.into(),
            usage,
            metadata: OutcomeMetadata::primary(source),
        }
    }

    pub fn mark_degraded(mut self, fallback_level: u32) -> Self {
        self.metadata.degraded = true;
        self.metadata.fallback_level = fallback_level;
        self
    }
}
