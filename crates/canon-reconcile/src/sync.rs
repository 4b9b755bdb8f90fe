use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use canon_platform::PlatformClient;
use canon_store::{DocumentRecord, DocumentStatus, DocumentStore, DocumentUpdate};

use crate::ReconcileError;

#[derive(Debug, Clone, Serialize, PartialEq)]
/// One document the sweep could not repair.
pub struct SyncFailure {
    pub document_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
/// Outcome of one synchronization sweep, by document id.
pub struct SyncReport {
    pub added: Vec<String>,
    pub already_present: Vec<String>,
    pub reused_duplicate: Vec<String>,
    pub failed: Vec<SyncFailure>,
    /// Remote file ids attached to the store that no active record claims.
    /// Reported for operators, never deleted here.
    pub orphan_file_ids: Vec<String>,
}

/// Diffs the document registry against a vector store's actual membership
/// and repairs the remote side.
///
/// Per-document failures are isolated: one unreadable file or failed attach
/// lands in `failed` and the sweep continues. Content-hash duplicates reuse
/// the already-uploaded remote file instead of uploading again.
pub struct FileSynchronizer {
    platform: Arc<dyn PlatformClient>,
    documents: Arc<dyn DocumentStore>,
}

impl FileSynchronizer {
    pub fn new(platform: Arc<dyn PlatformClient>, documents: Arc<dyn DocumentStore>) -> Self {
        Self {
            platform,
            documents,
        }
    }

    pub async fn sync_files(&self, vector_store_id: &str) -> Result<SyncReport, ReconcileError> {
        let records = self.documents.list_active_documents().await?;
        let membership: HashSet<String> = self
            .platform
            .list_vector_store_files(vector_store_id)
            .await?
            .into_iter()
            .collect();

        // Hash -> remote id of already-uploaded content, for dedup reuse.
        let mut uploaded_by_hash: HashMap<String, String> = records
            .iter()
            .filter_map(|record| {
                record
                    .remote_file_id
                    .clone()
                    .map(|id| (record.content_hash.clone(), id))
            })
            .collect();

        let mut report = SyncReport::default();
        for record in &records {
            match self
                .sync_one(record, vector_store_id, &membership, &mut uploaded_by_hash)
                .await
            {
                Ok(outcome) => match outcome {
                    SyncOutcome::Added => report.added.push(record.id.clone()),
                    SyncOutcome::AlreadyPresent => {
                        report.already_present.push(record.id.clone())
                    }
                    SyncOutcome::ReusedDuplicate => {
                        report.reused_duplicate.push(record.id.clone())
                    }
                },
                Err(error) => {
                    tracing::warn!(
                        document_id = record.id,
                        %error,
                        "document sync failed; continuing sweep"
                    );
                    report.failed.push(SyncFailure {
                        document_id: record.id.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        let claimed: HashSet<&str> = records
            .iter()
            .filter_map(|record| record.remote_file_id.as_deref())
            .chain(uploaded_by_hash.values().map(String::as_str))
            .collect();
        for member in &membership {
            if !claimed.contains(member.as_str()) {
                tracing::warn!(file_id = %member, "vector store holds a file no active record claims");
                report.orphan_file_ids.push(member.clone());
            }
        }
        report.orphan_file_ids.sort();

        tracing::info!(
            vector_store_id,
            added = report.added.len(),
            already_present = report.already_present.len(),
            reused = report.reused_duplicate.len(),
            failed = report.failed.len(),
            orphans = report.orphan_file_ids.len(),
            "file sync sweep complete"
        );
        Ok(report)
    }

    async fn sync_one(
        &self,
        record: &DocumentRecord,
        vector_store_id: &str,
        membership: &HashSet<String>,
        uploaded_by_hash: &mut HashMap<String, String>,
    ) -> Result<SyncOutcome, ReconcileError> {
        if let Some(remote_id) = &record.remote_file_id {
            if membership.contains(remote_id) {
                return Ok(SyncOutcome::AlreadyPresent);
            }
            // The platform lost the attachment; put it back.
            self.platform.attach_file(vector_store_id, remote_id).await?;
            return Ok(SyncOutcome::Added);
        }

        if let Some(existing_id) = uploaded_by_hash.get(&record.content_hash).cloned() {
            if !membership.contains(&existing_id) {
                self.platform
                    .attach_file(vector_store_id, &existing_id)
                    .await?;
            }
            self.documents
                .update_document(
                    &record.id,
                    DocumentUpdate {
                        remote_file_id: Some(existing_id),
                        status: Some(DocumentStatus::Active),
                    },
                )
                .await?;
            return Ok(SyncOutcome::ReusedDuplicate);
        }

        let bytes = tokio::fs::read(&record.storage_path)
            .await
            .map_err(|error| {
                ReconcileError::Config(format!(
                    "failed to read {}: {error}",
                    record.storage_path
                ))
            })?;
        let file = self.platform.upload_file(bytes, &record.filename).await?;
        uploaded_by_hash.insert(record.content_hash.clone(), file.id.clone());
        self.documents
            .update_document(
                &record.id,
                DocumentUpdate {
                    remote_file_id: Some(file.id.clone()),
                    status: Some(DocumentStatus::Active),
                },
            )
            .await?;
        self.platform.attach_file(vector_store_id, &file.id).await?;
        Ok(SyncOutcome::Added)
    }
}

enum SyncOutcome {
    Added,
    AlreadyPresent,
    ReusedDuplicate,
}
