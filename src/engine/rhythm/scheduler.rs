// ── Rhythm: Tiered Scheduler ───────────────────────────────────────────────
//
// One tokio task per enabled tier. Each iteration:
//
//   1. read WakeState from the clock and pick the tier's interval
//   2. engine.run(selector) under the tier's timeout
//   3. on failure: classify → RecoveryAction → retry in-iteration or move on
//   4. sleep until iteration_start + interval (no catch-up after an overrun)
//
// Every wait is raced against a `watch` shutdown signal, so `stop()` returns
// within one tick. A manual `run_tier_now` shares the tier's run lock with the
// loop, which keeps invocations of one tier strictly sequential.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{ErrorContext, MemoryTier};
use crate::engine::config::{RhythmConfig, TierSchedules};
use crate::engine::http::recovery_delay;
use crate::engine::recovery::{ErrorClassifier, ErrorLog};
use crate::engine::rhythm::clock::{SystemClock, WakeSleepClock, WallClock};
use crate::engine::rhythm::health::{self, HealthReport};
use crate::engine::rhythm::metrics::PerformanceMetricsRegistry;
use crate::engine::rhythm::transform::TransformationEngine;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How one iteration ended.
enum Outcome {
    Succeeded,
    Failed(EngineError),
    Cancelled,
}

/// State shared by the scheduler handle and its tier tasks.
struct Shared {
    engine: Arc<dyn TransformationEngine>,
    clock: WakeSleepClock,
    tiers: TierSchedules,
    metrics: Arc<PerformanceMetricsRegistry>,
    classifier: Arc<ErrorClassifier>,
    errors: Arc<ErrorLog>,
    run_locks: [tokio::sync::Mutex<()>; 4],
}

pub struct RhythmScheduler {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl RhythmScheduler {
    /// Scheduler on the system clock with its own classifier and error log.
    pub fn new(config: &RhythmConfig, engine: Arc<dyn TransformationEngine>) -> Self {
        Self::with_parts(
            config,
            engine,
            Arc::new(SystemClock),
            Arc::new(ErrorClassifier::new()),
            Arc::new(ErrorLog::new()),
        )
    }

    pub fn with_parts(
        config: &RhythmConfig,
        engine: Arc<dyn TransformationEngine>,
        clock: Arc<dyn WallClock>,
        classifier: Arc<ErrorClassifier>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        RhythmScheduler {
            shared: Arc::new(Shared {
                engine,
                clock: WakeSleepClock::new(config.wake, clock),
                tiers: config.tiers.clone(),
                metrics: Arc::new(PerformanceMetricsRegistry::new()),
                classifier,
                errors,
                run_locks: Default::default(),
            }),
            shutdown,
            handles: Mutex::new(Vec::new()),
            started_at: Mutex::new(None),
        }
    }

    pub fn metrics(&self) -> &Arc<PerformanceMetricsRegistry> {
        &self.shared.metrics
    }

    pub fn errors(&self) -> &Arc<ErrorLog> {
        &self.shared.errors
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Launch one loop per enabled tier. Calling it twice is a no-op.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("[rhythm] start() called while already running");
            return;
        }
        self.shutdown.send_replace(false);
        *self.started_at.lock() = Some(self.shared.clock.now());

        for tier in MemoryTier::ALL {
            let schedule = self.shared.tiers.get(tier);
            if !schedule.enabled {
                info!("[rhythm:{}] Disabled, not starting", tier);
                continue;
            }
            let shared = self.shared.clone();
            let shutdown = self.shutdown.subscribe();
            handles.push(tokio::spawn(tier_loop(shared, tier, shutdown)));
        }
        info!(
            "[rhythm] Started {} tier loop(s), wake window {:02}:00–{:02}:00",
            handles.len(),
            self.shared.clock.window().start_hour,
            self.shared.clock.window().end_hour
        );
    }

    /// Signal every loop and wait for all of them to finish.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let count = handles.len();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("[rhythm] Tier task ended abnormally: {}", e);
            }
        }
        *self.started_at.lock() = None;
        info!("[rhythm] Stopped {} tier loop(s)", count);
    }

    /// Run one iteration of `tier` immediately, with the same retry and
    /// recording path as the loop. Waits for an in-flight loop run to finish.
    pub async fn run_tier_now(&self, tier: MemoryTier) -> EngineResult<()> {
        // Manual runs are not tied to the loops' shutdown signal.
        let (_keep, mut never) = watch::channel(false);
        info!("[rhythm:{}] Manual run requested", tier);
        match self.shared.run_iteration(tier, &mut never).await {
            Outcome::Succeeded => Ok(()),
            Outcome::Failed(e) => Err(e),
            Outcome::Cancelled => Err(EngineError::Other(format!("{} run cancelled", tier))),
        }
    }

    pub fn health(&self) -> HealthReport {
        health::evaluate(
            self.shared.clock.now(),
            self.shared.clock.state(),
            &self.shared.tiers,
            &self.shared.metrics.snapshot_all(),
            self.shared.errors.stats(),
            *self.started_at.lock(),
        )
    }
}

async fn tier_loop(shared: Arc<Shared>, tier: MemoryTier, mut shutdown: watch::Receiver<bool>) {
    let schedule = shared.tiers.get(tier);
    info!("[rhythm:{}] Loop started (selector {})", tier, schedule.selector);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let iteration_start = Instant::now();
        let state = shared.clock.state();
        let interval = schedule.interval(state);

        match shared.run_iteration(tier, &mut shutdown).await {
            Outcome::Cancelled => break,
            Outcome::Succeeded => {}
            Outcome::Failed(e) => warn!("[rhythm:{}] Iteration failed, next in {:?}: {}", tier, interval, e),
        }

        let deadline = iteration_start + interval;
        if Instant::now() >= deadline {
            debug!("[rhythm:{}] Iteration overran its {:?} interval", tier, interval);
        }
        tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            _ = tokio::time::sleep_until(deadline) => {}
        }
    }

    info!("[rhythm:{}] Loop stopped", tier);
}

impl Shared {
    async fn run_iteration(&self, tier: MemoryTier, shutdown: &mut watch::Receiver<bool>) -> Outcome {
        let schedule = self.tiers.get(tier);
        let _guard = self.run_locks[tier_index(tier)].lock().await;
        let mut timeout = schedule.run_timeout();

        loop {
            let started = Instant::now();
            self.metrics.record_attempt(tier, self.clock.now());

            let result = tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return Outcome::Cancelled,
                r = tokio::time::timeout(timeout, self.engine.run(&schedule.selector)) => match r {
                    Ok(r) => r,
                    Err(_) => Err(EngineError::Timeout(format!(
                        "{} run exceeded {:.1}s",
                        tier,
                        timeout.as_secs_f64()
                    ))),
                },
            };

            let err = match result {
                Ok(()) => {
                    self.metrics.record_success(tier, self.clock.now(), started.elapsed());
                    debug!("[rhythm:{}] Run ok in {:?}", tier, started.elapsed());
                    return Outcome::Succeeded;
                }
                Err(e) => e,
            };

            let streak = self.metrics.record_failure(tier, self.clock.now(), &err.to_string());
            let ctx = ErrorContext::for_tier("tier_run", tier)
                .with("selector", schedule.selector.as_str())
                .with("consecutive_errors", streak.to_string());
            let action = self.classifier.handle(&err, &ctx, &self.errors);

            if !(action.should_retry() && streak <= action.max_retries) {
                return Outcome::Failed(err);
            }

            let delay = recovery_delay(&action, streak);
            if action.timeout_multiplier > 1.0 {
                timeout = scale(timeout, action.timeout_multiplier);
            }
            info!(
                "[rhythm:{}] {} — retry {}/{} in {:?}",
                tier, action.action_name, streak, action.max_retries, delay
            );
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => return Outcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn tier_index(tier: MemoryTier) -> usize {
    match tier {
        MemoryTier::Continuous => 0,
        MemoryTier::ShortTerm => 1,
        MemoryTier::Consolidation => 2,
        MemoryTier::LongTerm => 3,
    }
}

fn scale(d: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(d.as_secs_f64() * factor).unwrap_or(d)
}

// ── Tests ──────────────────────────────────────────────────────────────────
