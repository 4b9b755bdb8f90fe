use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use canon_core::unix_millis;
use canon_platform::{PlatformClient, PlatformError};
use canon_reconcile::{CanonicalIds, Reconciler};
use canon_resilience::{
    request_fingerprint, ChatOutcome, ChatUsage, CircuitBreaker, CircuitBreakerConfig,
    FallbackChain, FallbackContext, FallbackError, ResponseSource,
};
use canon_store::{DocumentStore, SessionRecord, SessionStore};

use crate::classifier::{Classification, QueryClassifier, QueryType};
use crate::secondary::GuardedSecondary;

// Flat assistant-class pricing per 1k tokens.
const INPUT_RATE_PER_1K: f64 = 0.01;
const OUTPUT_RATE_PER_1K: f64 = 0.03;

#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("request rejected: {0}")]
    Validation(String),
}

/// Which strategy the router picked before any failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Data,
    Document,
    Conversation,
}

enum PrimaryError {
    Validation(String),
    Degradable(String),
}

/// Front door for one chat request.
///
/// Fans out the prerequisites in parallel, routes to exactly one strategy,
/// falls one rung down the ladder on strategy failure, and hands the final
/// failure to the fallback chain so the caller always gets a well-formed
/// outcome. Only validation errors surface as errors.
pub struct RequestOrchestrator {
    platform: Arc<dyn PlatformClient>,
    reconciler: Arc<Reconciler>,
    documents: Arc<dyn DocumentStore>,
    sessions: Arc<dyn SessionStore>,
    classifier: QueryClassifier,
    fallback: FallbackChain,
    platform_breaker: CircuitBreaker,
    secondary: Option<Arc<GuardedSecondary>>,
}

impl RequestOrchestrator {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        reconciler: Arc<Reconciler>,
        documents: Arc<dyn DocumentStore>,
        sessions: Arc<dyn SessionStore>,
        classifier: QueryClassifier,
        fallback: FallbackChain,
    ) -> Self {
        Self {
            platform,
            reconciler,
            documents,
            sessions,
            classifier,
            fallback,
            platform_breaker: CircuitBreaker::new("platform", CircuitBreakerConfig::default()),
            secondary: None,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<GuardedSecondary>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub async fn handle_request(
        &self,
        message: &str,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<ChatOutcome, OrchestrateError> {
        let ctx = FallbackContext {
            message: message.to_string(),
            session_id: String::new(),
            fingerprint: request_fingerprint(message),
        };

        // Prerequisites run in parallel; each tolerates its own failure.
        let (session, resources, (classification, data_applicable), active_documents) = tokio::join!(
            self.session_or_default(session_id, user_id),
            self.resources_or_none(),
            self.classify(message),
            self.documents_or_empty(),
        );
        let ctx = FallbackContext {
            session_id: session.id.clone(),
            ..ctx
        };

        let route = self.pick_route(
            &classification,
            resources.as_ref(),
            data_applicable,
            active_documents,
        );
        tracing::debug!(
            session_id = session.id,
            ?route,
            query_type = ?classification.query_type,
            "request routed"
        );

        let primary = match self
            .run_primary(message, &session, resources.as_ref(), route)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(PrimaryError::Validation(reason)) => {
                return Err(OrchestrateError::Validation(reason))
            }
            Err(PrimaryError::Degradable(reason)) => Err(FallbackError::Primary(reason)),
        };
        Ok(self.fallback.execute(primary, &ctx).await)
    }

    fn pick_route(
        &self,
        classification: &Classification,
        resources: Option<&CanonicalIds>,
        data_applicable: bool,
        active_documents: usize,
    ) -> Route {
        if data_applicable && self.secondary.is_some() {
            return Route::Data;
        }
        if classification.query_type == QueryType::Document
            && resources.is_some()
            && active_documents > 0
        {
            return Route::Document;
        }
        Route::Conversation
    }

    /// Strategy ladder: a failed strategy falls one level down before the
    /// fallback chain is consulted.
    async fn run_primary(
        &self,
        message: &str,
        session: &SessionRecord,
        resources: Option<&CanonicalIds>,
        route: Route,
    ) -> Result<ChatOutcome, PrimaryError> {
        if route == Route::Data {
            if let Some(secondary) = &self.secondary {
                match secondary.execute(message).await {
                    Ok(result) => {
                        let outcome = ChatOutcome::new(
                            result.render(),
                            session.id.clone(),
                            ChatUsage::default(),
                            ResponseSource::SecondaryQuery,
                        );
                        self.persist_exchange(session, message, &outcome).await;
                        return Ok(outcome);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "data strategy failed; trying document retrieval");
                    }
                }
            }
        }

        if matches!(route, Route::Data | Route::Document) {
            if let Some(ids) = resources {
                match self
                    .converse(message, session, ids, ResponseSource::DocumentRetrieval)
                    .await
                {
                    Ok(outcome) => return Ok(outcome),
                    Err(PrimaryError::Validation(reason)) => {
                        return Err(PrimaryError::Validation(reason))
                    }
                    Err(PrimaryError::Degradable(reason)) => {
                        tracing::warn!(reason, "document strategy failed; trying conversation");
                    }
                }
            }
        }

        let ids = resources.ok_or_else(|| {
            PrimaryError::Degradable("canonical resources unavailable".to_string())
        })?;
        self.converse(message, session, ids, ResponseSource::Conversation)
            .await
    }

    async fn converse(
        &self,
        message: &str,
        session: &SessionRecord,
        ids: &CanonicalIds,
        source: ResponseSource,
    ) -> Result<ChatOutcome, PrimaryError> {
        self.platform_breaker
            .try_acquire()
            .map_err(|rejected| PrimaryError::Degradable(rejected.to_string()))?;

        let thread_id = match &session.thread_id {
            Some(existing) => existing.clone(),
            None => {
                let created = self
                    .platform
                    .create_thread()
                    .await
                    .map_err(|error| self.platform_failure(error))?;
                if let Err(error) = self.sessions.set_thread_id(&session.id, &created).await {
                    tracing::warn!(session_id = session.id, %error, "thread id not persisted");
                }
                created
            }
        };

        let turn = self
            .platform
            .run_conversation_turn(&thread_id, &ids.assistant_id, message)
            .await
            .map_err(|error| self.platform_failure(error))?;
        self.platform_breaker.record_success();

        let usage = ChatUsage {
            total_tokens: turn.total_tokens,
            cost_usd: (turn.input_tokens as f64 / 1000.0) * INPUT_RATE_PER_1K
                + (turn.output_tokens as f64 / 1000.0) * OUTPUT_RATE_PER_1K,
        };
        let outcome = ChatOutcome::new(turn.text, session.id.clone(), usage, source);
        self.persist_exchange(session, message, &outcome).await;
        Ok(outcome)
    }

    fn platform_failure(&self, error: PlatformError) -> PrimaryError {
        if error.is_retryable() {
            self.platform_breaker.record_failure();
        } else {
            // A rejected request still proves the platform is reachable,
            // and an admitted half-open probe must report an outcome.
            self.platform_breaker.record_success();
        }
        if let PlatformError::Validation { status, body } = &error {
            return PrimaryError::Validation(format!("status {status}: {body}"));
        }
        PrimaryError::Degradable(error.to_string())
    }

    async fn persist_exchange(&self, session: &SessionRecord, message: &str, outcome: &ChatOutcome) {
        let metadata = json!({
            "source": outcome.metadata.source,
            "total_tokens": outcome.usage.total_tokens,
        });
        if let Err(error) = self
            .sessions
            .append_exchange(&session.id, message, &outcome.response, metadata)
            .await
        {
            tracing::warn!(session_id = session.id, %error, "exchange not persisted");
        }
    }

    async fn session_or_default(
        &self,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> SessionRecord {
        match self.sessions.ensure_session(session_id, user_id).await {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(%error, "session store unavailable; using transient session");
                let now_ms = unix_millis();
                SessionRecord {
                    id: session_id
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("session-{now_ms}-0")),
                    user_id: user_id.map(str::to_string),
                    thread_id: None,
                    created_at_unix: now_ms / 1000,
                }
            }
        }
    }

    async fn resources_or_none(&self) -> Option<CanonicalIds> {
        match self.reconciler.ensure_canonical_resources().await {
            Ok(ids) => Some(ids),
            Err(error) => {
                tracing::warn!(%error, "canonical resources unavailable for this request");
                None
            }
        }
    }

    /// Classification plus the secondary applicability probe; returns the
    /// classification and whether the data route is open.
    async fn classify(&self, message: &str) -> (Classification, bool) {
        let classification = self.classifier.classify(message);
        let applicable = match &self.secondary {
            Some(secondary) => secondary.is_applicable(message).await,
            None => false,
        };
        (classification, applicable)
    }

    async fn documents_or_empty(&self) -> usize {
        match self.documents.list_active_documents().await {
            Ok(records) => records.len(),
            Err(error) => {
                tracing::warn!(%error, "document listing failed; assuming none");
                0
            }
        }
    }
}
