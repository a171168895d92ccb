// ── Rhythm: Health Report ──────────────────────────────────────────────────
//
// Degraded mode is otherwise only visible as stale timestamps and rising
// counters; this folds them into one status per tier and one overall.
//
//   Unhealthy — UNHEALTHY_CONSECUTIVE_ERRORS or more failures in a row
//   Degraded  — no success for STALE_INTERVAL_FACTOR × the current interval,
//               or the network circuit is open
//   Healthy   — everything else (including disabled tiers)

use crate::atoms::constants::{STALE_INTERVAL_FACTOR, UNHEALTHY_CONSECUTIVE_ERRORS};
use crate::atoms::types::{MemoryTier, WakeState};
use crate::engine::config::TierSchedules;
use crate::engine::http::CircuitState;
use crate::engine::recovery::ErrorStats;
use crate::engine::rhythm::metrics::TierMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierHealth {
    pub tier: MemoryTier,
    pub enabled: bool,
    pub status: HealthStatus,
    pub stale: bool,
    pub interval_secs: f64,
    pub last_run: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
    pub total_runs: u64,
    pub total_errors: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub wake_state: WakeState,
    pub generated_at: DateTime<Utc>,
    pub tiers: Vec<TierHealth>,
    pub errors: ErrorStats,
}

/// Build a report from metric snapshots.
///
/// `started_at` is when the loops were launched: a tier that has never
/// succeeded is measured from there. Before `start()` nothing is stale.
pub fn evaluate(
    now: DateTime<Utc>,
    wake_state: WakeState,
    schedules: &TierSchedules,
    metrics: &BTreeMap<MemoryTier, TierMetrics>,
    errors: ErrorStats,
    started_at: Option<DateTime<Utc>>,
) -> HealthReport {
    let tiers: Vec<TierHealth> = MemoryTier::ALL
        .iter()
        .map(|&tier| {
            let schedule = schedules.get(tier);
            let m = metrics.get(&tier).cloned().unwrap_or_default();
            let interval = schedule.interval(wake_state);

            let stale = schedule.enabled
                && m.last_run.or(started_at).is_some_and(|since| {
                    let age = now.signed_duration_since(since).to_std().unwrap_or_default();
                    age > interval.saturating_mul(STALE_INTERVAL_FACTOR)
                });

            let status = if !schedule.enabled {
                HealthStatus::Healthy
            } else if m.consecutive_errors >= UNHEALTHY_CONSECUTIVE_ERRORS {
                HealthStatus::Unhealthy
            } else if stale {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };

            TierHealth {
                tier,
                enabled: schedule.enabled,
                status,
                stale,
                interval_secs: interval.as_secs_f64(),
                last_run: m.last_run,
                consecutive_errors: m.consecutive_errors,
                total_runs: m.total_runs,
                total_errors: m.total_errors,
                last_error: m.last_error,
            }
        })
        .collect();

    let worst = tiers.iter().map(|t| t.status).max().unwrap_or(HealthStatus::Healthy);
    let status = if worst == HealthStatus::Healthy && errors.network_circuit == CircuitState::Open {
        HealthStatus::Degraded
    } else {
        worst
    };

    HealthReport { status, wake_state, generated_at: now, tiers, errors }
}
