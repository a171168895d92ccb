// Rhythm Engine — Tiered Consolidation Scheduler
//
// Drives the memory pipeline on four independent clocks and keeps each tier
// alive through failures.
//
// Module layout:
//   clock.rs     — WallClock trait, wake window, WakeSleepClock
//   transform.rs — TransformationEngine trait + CommandEngine (dbt)
//   metrics.rs   — PerformanceMetricsRegistry (per-tier run-state)
//   health.rs    — HealthReport derived from metrics + error stats
//   scheduler.rs — RhythmScheduler (tier loops, retries, shutdown)

pub mod clock;
pub mod health;
pub mod metrics;
pub mod scheduler;
pub mod transform;

pub use clock::{is_wake, SystemClock, WakeSleepClock, WallClock};
pub use health::{HealthReport, HealthStatus, TierHealth};
pub use metrics::{PerformanceMetricsRegistry, TierMetrics};
pub use scheduler::RhythmScheduler;
pub use transform::{CommandEngine, TransformationEngine};
