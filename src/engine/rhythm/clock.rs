// ── Rhythm: Wake / Sleep Clock ─────────────────────────────────────────────
//
// Wake state is a pure function of the local hour. The wall clock sits behind
// a trait so the scheduler can run against simulated time in tests.

use crate::atoms::types::WakeState;
use crate::engine::config::WakeWindow;
use chrono::{DateTime, Local, Timelike, Utc};
#[cfg(test)]
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Source of "what time is it" for the scheduler.
pub trait WallClock: Send + Sync {
    /// Local hour of day, 0–23.
    fn current_hour(&self) -> u32;
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
pub struct SystemClock;

impl WallClock for SystemClock {
    fn current_hour(&self) -> u32 {
        Local::now().hour()
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a settable hour whose timestamps follow tokio's clock,
/// so paused-time tests see `now()` advance with `tokio::time::advance`.
#[cfg(test)]
pub(crate) struct FixedHourClock {
    hour: AtomicU32,
    epoch: DateTime<Utc>,
    origin: tokio::time::Instant,
}

#[cfg(test)]
impl FixedHourClock {
    pub fn new(hour: u32) -> Self {
        FixedHourClock {
            hour: AtomicU32::new(hour % 24),
            epoch: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn set_hour(&self, hour: u32) {
        self.hour.store(hour % 24, Ordering::Relaxed);
    }
}

#[cfg(test)]
impl WallClock for FixedHourClock {
    fn current_hour(&self) -> u32 {
        self.hour.load(Ordering::Relaxed)
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now().saturating_duration_since(self.origin);
        self.epoch + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

/// `hour ∈ [start, end)`. When `start > end` the window wraps midnight;
/// `start == end` is an empty window (always asleep).
pub fn is_wake(hour: u32, window: &WakeWindow) -> bool {
    let (start, end) = (window.start_hour, window.end_hour);
    if start <= end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Maps the wall clock onto `WakeState` using a configured window.
#[derive(Clone)]
pub struct WakeSleepClock {
    window: WakeWindow,
    clock: Arc<dyn WallClock>,
}

impl WakeSleepClock {
    pub fn new(window: WakeWindow, clock: Arc<dyn WallClock>) -> Self {
        WakeSleepClock { window, clock }
    }

    /// Recomputed on every call; never cached.
    pub fn state(&self) -> WakeState {
        if is_wake(self.clock.current_hour(), &self.window) {
            WakeState::Wake
        } else {
            WakeState::Sleep
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn window(&self) -> WakeWindow {
        self.window
    }
}
