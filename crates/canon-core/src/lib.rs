//! Shared primitives for the canon workspace: wall-clock stamps for record
//! and breaker bookkeeping, plus the atomic file replacement backing the
//! canonical-config store and the response-cache spill directory.

pub mod clock;
pub mod persist;

pub use clock::{unix_millis, unix_seconds};
pub use persist::replace_file_atomic;
