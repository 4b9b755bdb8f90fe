use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, the granularity document and session
/// records are stamped with.
pub fn unix_seconds() -> u64 {
    since_epoch().as_secs()
}

/// Milliseconds since the Unix epoch.
///
/// Breaker recovery windows and cache TTLs are sub-minute, so their stamps
/// need more resolution than whole seconds.
pub fn unix_millis() -> u64 {
    let elapsed = since_epoch();
    elapsed
        .as_secs()
        .saturating_mul(1_000)
        .saturating_add(u64::from(elapsed.subsec_millis()))
}

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}
