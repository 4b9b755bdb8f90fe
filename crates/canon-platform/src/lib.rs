//! Remote AI platform surface: resource types, error taxonomy, retry
//! helpers, and the HTTP client used by the reconciliation layer.
mod http;
pub mod retry;
#[cfg(feature = "testing")]
pub mod testing;
mod types;

pub use http::{HttpPlatformClient, PlatformClientConfig};
pub use types::{
    Assistant, AssistantSpec, AssistantUpdate, ConversationTurn, PlatformClient, PlatformError,
    PlatformFile, ResourceKind, ToolSpec, VectorStore,
};
