//! Cross-crate scenarios: cold-start races, drift repair, and the
//! audit/cleanup/verify loop against the in-memory platform double.

use std::sync::Arc;

use canon_config::ConfigStore;
use canon_platform::testing::InMemoryPlatform;
use canon_platform::PlatformClient;
use canon_reconcile::{Auditor, FileSynchronizer, Reconciler, ReconcilerSettings};
use canon_store::{
    content_hash_hex, DocumentStatus, DocumentStore, DocumentUpdate, MemoryDocumentStore,
    NewDocument,
};
use tempfile::TempDir;

fn reconciler_for(platform: &Arc<InMemoryPlatform>, dir: &TempDir, name: &str) -> Reconciler {
    Reconciler::new(
        platform.clone(),
        ConfigStore::new(dir.path().join(name)),
        ReconcilerSettings::default(),
    )
}

#[tokio::test]
async fn cold_start_race_is_repaired_by_audit_and_cleanup() {
    let platform = Arc::new(InMemoryPlatform::new());
    let dir = TempDir::new().expect("tempdir");

    // Two processes race on first start: each has its own empty config, so
    // each builds a full pair.
    let first = reconciler_for(&platform, &dir, "config-a.json");
    let second = reconciler_for(&platform, &dir, "config-b.json");
    let (a, b) = tokio::join!(
        first.ensure_canonical_resources(),
        second.ensure_canonical_resources(),
    );
    let a = a.expect("first ensure");
    let b = b.expect("second ensure");
    assert_ne!(a.assistant_id, b.assistant_id);
    assert_eq!(platform.assistant_count(), 2);
    assert_eq!(platform.vector_store_count(), 2);

    // The surviving process audits with its config; drift is visible.
    let config = ConfigStore::new(dir.path().join("config-a.json"));
    let auditor = Auditor::new(platform.clone(), config.clone());
    let report = auditor.audit().await.expect("audit");
    assert_eq!(report.assistants.len(), 2);
    assert_eq!(report.vector_stores.len(), 2);
    assert!(!report.recommendations.is_empty());
    assert_eq!(report.keeper_assistant.as_deref(), Some(a.assistant_id.as_str()));

    let log = auditor.cleanup(&report, false).await.expect("cleanup");
    assert_eq!(log.deleted_assistants, vec![b.assistant_id.clone()]);
    assert_eq!(log.deleted_vector_stores, vec![b.vector_store_id.clone()]);
    assert_eq!(platform.assistant_count(), 1);
    assert_eq!(platform.vector_store_count(), 1);

    let saved = config.load().expect("load");
    assert_eq!(saved.assistant_id.as_deref(), Some(a.assistant_id.as_str()));
    assert_eq!(
        saved.vector_store_id.as_deref(),
        Some(a.vector_store_id.as_str())
    );
    assert!(saved.last_cleanup.is_some());

    let settled = auditor.audit().await.expect("re-audit");
    assert!(settled.recommendations.is_empty());
    let verdict = auditor.verify().await.expect("verify");
    assert!(verdict.consistent, "issues: {:?}", verdict.issues);
}

async fn concurrent_cold_starts_settle_to_one_pair(racers: usize) {
    let platform = Arc::new(InMemoryPlatform::new());
    let dir = TempDir::new().expect("tempdir");

    let mut handles = Vec::new();
    for index in 0..racers {
        let reconciler = Arc::new(reconciler_for(
            &platform,
            &dir,
            &format!("config-{index}.json"),
        ));
        handles.push(tokio::spawn(async move {
            reconciler.ensure_canonical_resources().await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("ensure");
    }
    assert_eq!(platform.assistant_count(), racers);

    let auditor = Auditor::new(
        platform.clone(),
        ConfigStore::new(dir.path().join("config-0.json")),
    );
    let report = auditor.audit().await.expect("audit");
    auditor.cleanup(&report, false).await.expect("cleanup");

    let verdict = auditor.verify().await.expect("verify");
    assert!(verdict.consistent, "issues: {:?}", verdict.issues);
    assert_eq!(verdict.assistant_count, 1);
    assert!(verdict.vector_store_count <= 1);
}

#[tokio::test]
async fn five_concurrent_cold_starts_settle_to_one_pair() {
    concurrent_cold_starts_settle_to_one_pair(5).await;
}

#[tokio::test]
async fn fifty_concurrent_cold_starts_settle_to_one_pair() {
    concurrent_cold_starts_settle_to_one_pair(50).await;
}

#[tokio::test]
async fn dangling_config_self_heals_and_stays_stable() {
    let platform = Arc::new(InMemoryPlatform::new());
    let dir = TempDir::new().expect("tempdir");
    let config = ConfigStore::new(dir.path().join("config.json"));
    config
        .save(&canon_config::CanonicalConfig {
            assistant_id: Some("asst_gone".to_string()),
            vector_store_id: Some("vs_gone".to_string()),
            ..Default::default()
        })
        .expect("seed config");

    let reconciler = Reconciler::new(
        platform.clone(),
        config.clone(),
        ReconcilerSettings::default(),
    );
    let ids = reconciler
        .ensure_canonical_resources()
        .await
        .expect("heal");
    assert_ne!(ids.assistant_id, "asst_gone");
    assert_eq!(platform.assistant_count(), 1);

    let again = reconciler
        .ensure_canonical_resources()
        .await
        .expect("no-op");
    assert_eq!(ids, again);
    assert_eq!(platform.call_count("create_assistant"), 1);
    assert_eq!(platform.call_count("create_vector_store"), 1);
}

#[tokio::test]
async fn cleanup_is_safe_while_documents_are_live() {
    let platform = Arc::new(InMemoryPlatform::new());
    let dir = TempDir::new().expect("tempdir");
    let documents = Arc::new(MemoryDocumentStore::new());

    // Canonical pair plus a racy duplicate pair.
    let keeper = reconciler_for(&platform, &dir, "config.json")
        .ensure_canonical_resources()
        .await
        .expect("keeper");
    reconciler_for(&platform, &dir, "config-dup.json")
        .ensure_canonical_resources()
        .await
        .expect("duplicate");

    // One registered document synced into the keeper store.
    let bytes = b"employee handbook";
    let path = dir.path().join("handbook.txt");
    std::fs::write(&path, bytes).expect("write");
    let record = documents
        .create_document(NewDocument {
            filename: "handbook.txt".to_string(),
            content_hash: content_hash_hex(bytes),
            storage_path: path.display().to_string(),
        })
        .await
        .expect("create");
    documents
        .update_document(
            &record.id,
            DocumentUpdate {
                remote_file_id: None,
                status: Some(DocumentStatus::Active),
            },
        )
        .await
        .expect("activate");
    let synchronizer = FileSynchronizer::new(platform.clone(), documents.clone());
    synchronizer
        .sync_files(&keeper.vector_store_id)
        .await
        .expect("sync");
    let remote_id = documents
        .get_document(&record.id)
        .await
        .expect("get")
        .expect("record")
        .remote_file_id
        .expect("remote id");

    // Cleanup deletes the duplicate pair; the document's remote file id
    // survives because it belongs to the file, not the deleted resources.
    let auditor = Auditor::new(
        platform.clone(),
        ConfigStore::new(dir.path().join("config.json")),
    );
    let report = auditor.audit().await.expect("audit");
    auditor.cleanup(&report, false).await.expect("cleanup");
    assert_eq!(platform.vector_store_count(), 1);

    // A follow-up sweep confirms membership is intact.
    let after = synchronizer
        .sync_files(&keeper.vector_store_id)
        .await
        .expect("re-sync");
    assert_eq!(after.already_present, vec![record.id.clone()]);
    let members = platform
        .list_vector_store_files(&keeper.vector_store_id)
        .await
        .expect("members");
    assert_eq!(members, vec![remote_id]);
}
