//! End-to-end chat pipeline: registry sync feeding the orchestrator, the
//! degradation ladder, and the cached-response fallback across requests.

use std::sync::Arc;

use canon_config::ConfigStore;
use canon_orchestrator::{QueryClassifier, RequestOrchestrator};
use canon_platform::testing::InMemoryPlatform;
use canon_platform::PlatformError;
use canon_reconcile::{FileSynchronizer, Reconciler, ReconcilerSettings};
use canon_resilience::{FallbackChain, ResponseCache, ResponseSource};
use canon_store::{
    content_hash_hex, DocumentStatus, DocumentStore, DocumentUpdate, MemoryDocumentStore,
    MemorySessionStore, NewDocument,
};
use tempfile::TempDir;

struct Stack {
    platform: Arc<InMemoryPlatform>,
    documents: Arc<MemoryDocumentStore>,
    sessions: Arc<MemorySessionStore>,
    reconciler: Arc<Reconciler>,
    orchestrator: RequestOrchestrator,
    dir: TempDir,
}

fn stack() -> Stack {
    let platform = Arc::new(InMemoryPlatform::new());
    let documents = Arc::new(MemoryDocumentStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    let dir = TempDir::new().expect("tempdir");
    let reconciler = Arc::new(Reconciler::new(
        platform.clone(),
        ConfigStore::new(dir.path().join("canonical.json")),
        ReconcilerSettings::default(),
    ));
    let orchestrator = RequestOrchestrator::new(
        platform.clone(),
        reconciler.clone(),
        documents.clone(),
        sessions.clone(),
        QueryClassifier::new().expect("classifier"),
        FallbackChain::standard(Arc::new(ResponseCache::with_default_ttl())),
    );
    Stack {
        platform,
        documents,
        sessions,
        reconciler,
        orchestrator,
        dir,
    }
}

async fn register_document(stack: &Stack, filename: &str, bytes: &[u8]) -> String {
    let path = stack.dir.path().join(filename);
    std::fs::write(&path, bytes).expect("write");
    let record = stack
        .documents
        .create_document(NewDocument {
            filename: filename.to_string(),
            content_hash: content_hash_hex(bytes),
            storage_path: path.display().to_string(),
        })
        .await
        .expect("create");
    stack
        .documents
        .update_document(
            &record.id,
            DocumentUpdate {
                remote_file_id: None,
                status: Some(DocumentStatus::Active),
            },
        )
        .await
        .expect("activate");
    record.id
}

#[tokio::test]
async fn synced_documents_feed_the_document_route() {
    let stack = stack();
    stack.platform.set_reply("Ten vacation days per year.");
    register_document(&stack, "policy.txt", b"vacation policy text").await;

    let ids = stack
        .reconciler
        .ensure_canonical_resources()
        .await
        .expect("ensure");
    let synchronizer = FileSynchronizer::new(stack.platform.clone(), stack.documents.clone());
    let report = synchronizer
        .sync_files(&ids.vector_store_id)
        .await
        .expect("sync");
    assert_eq!(report.added.len(), 1);

    let outcome = stack
        .orchestrator
        .handle_request("what does the vacation policy say?", None, Some("user-1"))
        .await
        .expect("outcome");
    assert_eq!(outcome.metadata.source, ResponseSource::DocumentRetrieval);
    assert_eq!(outcome.response, "Ten vacation days per year.");
    assert!(!outcome.metadata.degraded);

    let exchanges = stack.sessions.exchanges(&outcome.session_id).await;
    assert_eq!(exchanges.len(), 1);
}

#[tokio::test]
async fn a_session_reuses_its_thread_across_turns() {
    let stack = stack();
    stack.platform.set_reply("hi again");

    let first = stack
        .orchestrator
        .handle_request("hello", None, None)
        .await
        .expect("first");
    let second = stack
        .orchestrator
        .handle_request("hello once more", Some(&first.session_id), None)
        .await
        .expect("second");

    assert_eq!(first.session_id, second.session_id);
    assert_eq!(stack.platform.call_count("create_thread"), 1);
    assert_eq!(stack.sessions.exchanges(&first.session_id).await.len(), 2);
}

#[tokio::test]
async fn outage_after_a_good_answer_replays_it_from_cache() {
    let stack = stack();
    stack.platform.set_reply("The handbook covers onboarding.");
    register_document(&stack, "handbook.txt", b"handbook text").await;
    let ids = stack
        .reconciler
        .ensure_canonical_resources()
        .await
        .expect("ensure");
    FileSynchronizer::new(stack.platform.clone(), stack.documents.clone())
        .sync_files(&ids.vector_store_id)
        .await
        .expect("sync");

    let question = "where is the employee handbook?";
    let good = stack
        .orchestrator
        .handle_request(question, None, None)
        .await
        .expect("good");
    assert!(!good.metadata.degraded);

    stack.platform.fail_next(
        "run_conversation_turn",
        PlatformError::Unavailable {
            status: 503,
            body: "down".to_string(),
        },
    );
    stack.platform.fail_next(
        "run_conversation_turn",
        PlatformError::Unavailable {
            status: 503,
            body: "down".to_string(),
        },
    );
    let degraded = stack
        .orchestrator
        .handle_request(question, None, None)
        .await
        .expect("degraded");
    assert!(degraded.metadata.degraded);
    assert_eq!(degraded.metadata.fallback_level, 1);
    assert_eq!(degraded.metadata.source, ResponseSource::Cache);
    assert_eq!(degraded.response, good.response);
}

#[tokio::test]
async fn total_outage_still_returns_a_well_formed_outcome() {
    let stack = stack();
    for method in ["get_assistant", "create_assistant"] {
        stack.platform.fail_next(
            method,
            PlatformError::Unavailable {
                status: 503,
                body: "down".to_string(),
            },
        );
    }

    let outcome = stack
        .orchestrator
        .handle_request("tell me about quarterly revenue", None, None)
        .await
        .expect("outcome");
    assert!(outcome.metadata.degraded);
    assert_eq!(outcome.metadata.source, ResponseSource::Degraded);
    assert!(!outcome.response.is_empty());
}
