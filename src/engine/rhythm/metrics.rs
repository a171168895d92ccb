// ── Rhythm: Per-tier Performance Metrics ───────────────────────────────────
//
// One writer per tier (its loop), any number of readers (health, daemon).

use crate::atoms::types::MemoryTier;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Run-state and counters for one tier.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TierMetrics {
    /// Last successful run.
    pub last_run: Option<DateTime<Utc>>,
    /// Last invocation, successful or not.
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_duration_ms: u64,
    /// Mean duration of successful runs.
    pub avg_duration_ms: f64,
    pub consecutive_errors: u32,
    pub total_runs: u64,
    pub total_errors: u64,
    pub last_error: Option<String>,
}

#[derive(Default)]
pub struct PerformanceMetricsRegistry {
    tiers: RwLock<HashMap<MemoryTier, TierMetrics>>,
}

impl PerformanceMetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self, tier: MemoryTier, at: DateTime<Utc>) {
        self.tiers.write().entry(tier).or_default().last_attempt = Some(at);
    }

    /// Success resets the error streak and moves `last_run` forward.
    pub fn record_success(&self, tier: MemoryTier, at: DateTime<Utc>, took: Duration) {
        let mut tiers = self.tiers.write();
        let m = tiers.entry(tier).or_default();
        let ms = took.as_millis() as u64;
        m.total_runs += 1;
        m.avg_duration_ms += (ms as f64 - m.avg_duration_ms) / m.total_runs as f64;
        m.last_duration_ms = ms;
        m.last_run = Some(at);
        m.consecutive_errors = 0;
    }

    /// Returns the new consecutive-error count.
    pub fn record_failure(&self, tier: MemoryTier, at: DateTime<Utc>, error: &str) -> u32 {
        let mut tiers = self.tiers.write();
        let m = tiers.entry(tier).or_default();
        m.last_attempt = Some(at);
        m.consecutive_errors = m.consecutive_errors.saturating_add(1);
        m.total_errors += 1;
        m.last_error = Some(error.to_string());
        m.consecutive_errors
    }

    pub fn snapshot(&self, tier: MemoryTier) -> TierMetrics {
        self.tiers.read().get(&tier).cloned().unwrap_or_default()
    }

    /// All four tiers, including ones that never ran.
    pub fn snapshot_all(&self) -> BTreeMap<MemoryTier, TierMetrics> {
        let tiers = self.tiers.read();
        MemoryTier::ALL
            .iter()
            .map(|t| (*t, tiers.get(t).cloned().unwrap_or_default()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_resets_streak_and_tracks_average() {
        let reg = PerformanceMetricsRegistry::new();
        let t = Utc::now();
        assert_eq!(reg.record_failure(MemoryTier::ShortTerm, t, "boom"), 1);
        assert_eq!(reg.record_failure(MemoryTier::ShortTerm, t, "boom again"), 2);

        reg.record_success(MemoryTier::ShortTerm, t, Duration::from_millis(100));
        reg.record_success(MemoryTier::ShortTerm, t, Duration::from_millis(300));

        let m = reg.snapshot(MemoryTier::ShortTerm);
        assert_eq!(m.consecutive_errors, 0);
        assert_eq!(m.total_errors, 2);
        assert_eq!(m.total_runs, 2);
        assert_eq!(m.last_duration_ms, 300);
        assert!((m.avg_duration_ms - 200.0).abs() < 1e-9);
        assert_eq!(m.last_run, Some(t));
        assert_eq!(m.last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn tiers_are_independent() {
        let reg = PerformanceMetricsRegistry::new();
        reg.record_failure(MemoryTier::Continuous, Utc::now(), "x");
        assert_eq!(reg.snapshot(MemoryTier::LongTerm), TierMetrics::default());

        let all = reg.snapshot_all();
        assert_eq!(all.len(), 4);
        assert_eq!(all[&MemoryTier::Continuous].consecutive_errors, 1);
        assert!(all[&MemoryTier::Consolidation].last_attempt.is_none());
    }
}
