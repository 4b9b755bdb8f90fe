//! Resilience primitives guarding every remote call: per-service circuit
//! breakers, a TTL response cache keyed by request fingerprint, and the
//! fallback chain that degrades gracefully when the primary path fails.
mod breaker;
mod cache;
mod fallback;
mod outcome;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitRejected, CircuitState};
pub use cache::{request_fingerprint, ResponseCache};
pub use fallback::{
    CachedResponseStrategy, FallbackChain, FallbackContext, FallbackError, FallbackStrategy,
    StaticResponseStrategy,
};
pub use outcome::{ChatOutcome, ChatUsage, OutcomeMetadata, ResponseSource};
