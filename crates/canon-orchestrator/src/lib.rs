//! Request orchestration: classify the message, fan out the prerequisites,
//! route to exactly one strategy, and degrade gracefully when it fails.
mod classifier;
mod orchestrator;
mod secondary;

pub use classifier::{Classification, QueryClassifier, QueryType};
pub use orchestrator::{OrchestrateError, RequestOrchestrator};
pub use secondary::{GuardedSecondary, SecondaryError, SecondaryQueryService, TabularResult};
