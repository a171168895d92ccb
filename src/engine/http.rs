// ── Rhythm Engine: Backoff & Circuit-Breaker ───────────────────────────────
//
// Shared retry utilities used by the tier loops and the embedding client.
//
// Features:
//   • Exponential backoff `base * 2^n`, capped
//   • Uniform jitter in `[min, max]` for lock-contention retries
//   • Retryable HTTP status detection (429 + 5xx)
//   • Circuit breaker: N consecutive failures → fail fast for a cooldown

use crate::atoms::types::RecoveryAction;
use log::warn;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// 429 and any 5xx: worth another attempt after a pause.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// `min(base * 2^exponent, cap)`. Exponent is clamped so the product never overflows.
pub fn exponential_delay(base: Duration, exponent: u32, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(exponent.min(20));
    base.saturating_mul(factor).min(cap)
}

/// Uniform random delay in `[min, max]`.
pub fn jittered_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_secs_f64();
    min + Duration::from_secs_f64(span * rand::random::<f64>())
}

/// Delay before retry number `retry` (1-based) as prescribed by `action`.
pub fn recovery_delay(action: &RecoveryAction, retry: u32) -> Duration {
    let base = Duration::try_from_secs_f64(action.backoff_base_seconds).unwrap_or(Duration::ZERO);
    let cap = Duration::try_from_secs_f64(action.backoff_cap_seconds).unwrap_or(base);
    if action.jitter {
        jittered_delay(base, cap)
    } else {
        exponential_delay(base, retry.saturating_sub(1), cap)
    }
}

// ── Circuit Breaker ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls go through.
    Closed,
    /// `threshold` failures in a row; calls are refused until the cooldown ends.
    Open,
    /// Cooldown over; the next call is a probe.
    HalfOpen,
}

/// Shared by every NETWORK retry path. Lock-free: the failure streak and the
/// trip time are plain atomics, so tier tasks and the embedding client can
/// hit it concurrently.
pub struct CircuitBreaker {
    streak: AtomicU32,
    /// Epoch seconds of the trip, 0 while closed.
    opened_at: AtomicU64,
    threshold: u32,
    cooldown_secs: u64,
}

impl CircuitBreaker {
    pub const fn new(threshold: u32, cooldown_secs: u64) -> Self {
        Self {
            streak: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            threshold,
            cooldown_secs,
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.streak.load(Ordering::Relaxed) < self.threshold {
            return CircuitState::Closed;
        }
        let open_for = epoch_secs().saturating_sub(self.opened_at.load(Ordering::Relaxed));
        if open_for < self.cooldown_secs {
            CircuitState::Open
        } else {
            CircuitState::HalfOpen
        }
    }

    /// `Err` with a human-readable reason while the circuit is open.
    pub fn check(&self) -> Result<(), String> {
        if self.state() != CircuitState::Open {
            return Ok(());
        }
        let open_for = epoch_secs().saturating_sub(self.opened_at.load(Ordering::Relaxed));
        Err(format!(
            "network circuit open after {} failures, {}s left",
            self.streak.load(Ordering::Relaxed),
            self.cooldown_secs.saturating_sub(open_for)
        ))
    }

    pub fn record_success(&self) {
        self.streak.store(0, Ordering::Relaxed);
        self.opened_at.store(0, Ordering::Relaxed);
    }

    /// Every failure at or past the threshold restarts the cooldown.
    pub fn record_failure(&self) {
        let streak = self.streak.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if streak < self.threshold {
            return;
        }
        self.opened_at.store(epoch_secs(), Ordering::Relaxed);
        if streak == self.threshold {
            warn!(
                "[circuit-breaker] Open after {} failures in a row, refusing calls for {}s",
                streak, self.cooldown_secs
            );
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Fallback;

    fn action(base: f64, cap: f64, jitter: bool) -> RecoveryAction {
        RecoveryAction {
            action_name: "test".into(),
            max_retries: 5,
            backoff_base_seconds: base,
            backoff_cap_seconds: cap,
            fallback: Fallback::Retry,
            on_exhausted: Fallback::Skip,
            jitter,
            timeout_multiplier: 1.0,
            alert: false,
        }
    }

    #[test]
    fn busy_and_server_errors_are_retryable() {
        for status in [429u16, 500, 502, 503, 599] {
            assert!(is_retryable_status(status), "{}", status);
        }
        for status in [200u16, 201, 400, 401, 404, 422] {
            assert!(!is_retryable_status(status), "{}", status);
        }
    }

    #[test]
    fn exponential_delay_doubles_then_caps() {
        let base = Duration::from_secs(2);
        let cap = Duration::from_secs(60);
        assert_eq!(exponential_delay(base, 0, cap), Duration::from_secs(2));
        assert_eq!(exponential_delay(base, 3, cap), Duration::from_secs(16));
        assert_eq!(exponential_delay(base, 10, cap), cap);
        assert_eq!(exponential_delay(base, u32::MAX, cap), cap);
    }

    #[test]
    fn jitter_stays_in_range() {
        let min = Duration::from_millis(100);
        let max = Duration::from_secs(2);
        for _ in 0..200 {
            let d = jittered_delay(min, max);
            assert!(d >= min && d <= max, "{:?} out of range", d);
        }
        assert_eq!(jittered_delay(max, min), max);
    }

    #[test]
    fn recovery_delay_follows_action() {
        let a = action(2.0, 60.0, false);
        assert_eq!(recovery_delay(&a, 1), Duration::from_secs(2));
        assert_eq!(recovery_delay(&a, 2), Duration::from_secs(4));
        assert_eq!(recovery_delay(&a, 9), Duration::from_secs(60));

        let j = action(0.1, 2.0, true);
        let d = recovery_delay(&j, 7);
        assert!(d >= Duration::from_millis(100) && d <= Duration::from_secs(2));
    }

    #[test]
    fn circuit_breaker_trips_and_recovers() {
        let cb = CircuitBreaker::new(3, 60);
        assert!(cb.check().is_ok());
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.check().is_err());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn circuit_breaker_half_opens_after_cooldown() {
        let cb = CircuitBreaker::new(1, 0);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());
    }
}
