use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use canon_core::unix_millis;

type ClockFn = Arc<dyn Fn() -> u64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Thresholds for one guarded remote service.
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
        }
    }
}

impl CircuitBreakerConfig {
    /// The secondary query service fails more often and recovers faster.
    pub fn secondary_service() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    failure_count: usize,
    last_failure_unix_ms: Option<u64>,
    state: CircuitState,
    probe_in_flight: bool,
}

#[derive(Debug, Error)]
#[error("circuit '{service}' is open; retry in {retry_in_ms}ms")]
/// Returned instead of attempting a call while the circuit is open.
pub struct CircuitRejected {
    pub service: String,
    pub retry_in_ms: u64,
}

/// Per-service failure counter and closed/open/half-open state machine.
///
/// While open and before the recovery timeout, calls are rejected without
/// touching the failing dependency. The first call after the timeout runs as
/// a half-open probe; its outcome closes or re-opens the circuit.
pub struct CircuitBreaker {
    service: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: ClockFn,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(service, config, Arc::new(unix_millis))
    }

    pub fn with_clock(
        service: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: ClockFn,
    ) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                failure_count: 0,
                last_failure_unix_ms: None,
                state: CircuitState::Closed,
                probe_in_flight: false,
            }),
            clock,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    /// Admission check before a call. Open circuits reject until the
    /// recovery timeout elapses, then admit exactly one half-open probe;
    /// concurrent callers are rejected until that probe's outcome lands.
    pub fn try_acquire(&self) -> Result<(), CircuitRejected> {
        let mut inner = self.lock_inner();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(CircuitRejected {
                        service: self.service.clone(),
                        retry_in_ms: self.config.recovery_timeout_ms,
                    });
                }
                inner.probe_in_flight = true;
                Ok(())
            }
            CircuitState::Open => {
                let now = (self.clock)();
                let last_failure = inner.last_failure_unix_ms.unwrap_or(0);
                let elapsed = now.saturating_sub(last_failure);
                if elapsed >= self.config.recovery_timeout_ms {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    return Ok(());
                }

                Err(CircuitRejected {
                    service: self.service.clone(),
                    retry_in_ms: self.config.recovery_timeout_ms.saturating_sub(elapsed),
                })
            }
        }
    }

    /// Any success closes the circuit and clears the failure count.
    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        inner.failure_count = 0;
        inner.state = CircuitState::Closed;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock_inner();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_unix_ms = Some((self.clock)());
        inner.probe_in_flight = false;

        let opened = match inner.state {
            // A failed half-open probe re-opens immediately.
            CircuitState::HalfOpen => true,
            _ => inner.failure_count >= self.config.failure_threshold.max(1),
        };
        if opened && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            tracing::warn!(
                service = %self.service,
                failures = inner.failure_count,
                "circuit breaker opened"
            );
        } else if opened {
            inner.state = CircuitState::Open;
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn breaker_with_manual_clock(
        config: CircuitBreakerConfig,
    ) -> (CircuitBreaker, Arc<AtomicU64>) {
        let now = Arc::new(AtomicU64::new(1_000_000));
        let clock_now = now.clone();
        let breaker = CircuitBreaker::with_clock(
            "platform",
            config,
            Arc::new(move || clock_now.load(Ordering::Relaxed)),
        );
        (breaker, now)
    }

    #[test]
    fn opens_after_threshold_and_rejects_before_timeout() {
        let config = CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
        };
        let (breaker, now) = breaker_with_manual_clock(config);

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Still inside the recovery window: rejected without a call.
        now.fetch_add(30_000, Ordering::Relaxed);
        let rejected = breaker.try_acquire().unwrap_err();
        assert_eq!(rejected.retry_in_ms, 30_000);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_probe_closes_on_success() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 10_000,
        };
        let (breaker, now) = breaker_with_manual_clock(config);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        now.fetch_add(10_000, Ordering::Relaxed);
        breaker.try_acquire().expect("half-open probe admitted");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        // Fully reset: one new failure does not immediately re-open at
        // threshold 3.
        let (fresh, _) = breaker_with_manual_clock(CircuitBreakerConfig::default());
        fresh.record_failure();
        assert_eq!(fresh.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout_ms: 5_000,
        };
        let (breaker, now) = breaker_with_manual_clock(config);

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        now.fetch_add(5_000, Ordering::Relaxed);
        breaker.try_acquire().expect("probe admitted");
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // The new open window starts at the probe failure.
        let rejected = breaker.try_acquire().unwrap_err();
        assert_eq!(rejected.retry_in_ms, 5_000);
    }

    #[test]
    fn only_one_half_open_probe_is_admitted_at_a_time() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 10_000,
        };
        let (breaker, now) = breaker_with_manual_clock(config);

        breaker.record_failure();
        now.fetch_add(10_000, Ordering::Relaxed);
        breaker.try_acquire().expect("first probe admitted");

        // Outcome still pending: concurrent callers are turned away and
        // never reach the recovering dependency.
        assert!(breaker.try_acquire().is_err());
        assert!(breaker.try_acquire().is_err());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        breaker.try_acquire().expect("closed circuit admits everyone");
        breaker.try_acquire().expect("closed circuit admits everyone");
    }

    #[test]
    fn a_failed_probe_frees_the_slot_for_the_next_window() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout_ms: 5_000,
        };
        let (breaker, now) = breaker_with_manual_clock(config);

        breaker.record_failure();
        now.fetch_add(5_000, Ordering::Relaxed);
        breaker.try_acquire().expect("probe admitted");
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        now.fetch_add(5_000, Ordering::Relaxed);
        breaker.try_acquire().expect("next window admits a fresh probe");
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn success_resets_failure_count_mid_streak() {
        let (breaker, _) = breaker_with_manual_clock(CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout_ms: 60_000,
        });
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
