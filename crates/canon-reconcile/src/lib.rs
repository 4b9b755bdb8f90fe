//! Reconciliation core: keeps the remote assistant/vector-store pair, the
//! local canonical config, and the document registry mutually consistent.
//!
//! Three cooperating pieces:
//! - [`Reconciler`] makes the canonical pair exist (idempotent ensure).
//! - [`FileSynchronizer`] diffs the document registry against the vector
//!   store's actual membership and repairs it.
//! - [`Auditor`] sweeps *all* remote resources, picks keepers, and deletes
//!   the duplicates a cold-start race can leave behind.
mod audit;
mod reconciler;
mod sync;

use thiserror::Error;

use canon_platform::PlatformError;
use canon_store::StoreError;

pub use audit::{AuditReport, Auditor, CleanupLog, ConfigState, VerifyReport};
pub use reconciler::{CanonicalIds, Reconciler, ReconcilerSettings};
pub use sync::{FileSynchronizer, SyncFailure, SyncReport};

#[derive(Debug, Error)]
/// Failures surfaced by the reconciliation layer.
pub enum ReconcileError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(String),
}

impl From<anyhow::Error> for ReconcileError {
    fn from(error: anyhow::Error) -> Self {
        ReconcileError::Config(format!("{error:#}"))
    }
}
