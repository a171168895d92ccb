// ── Rhythm Engine: Error Classification & Recovery Policy ──────────────────
//
// Every failure caught at a boundary (tier iteration, embedding request) is
// turned into an `ErrorRecord` plus a declarative `RecoveryAction`:
//
//   DATABASE   retry w/ backoff (2s, ≤5)          → use cached data
//   DB lock    retry w/ jitter [0.1s, 2s] (≤10)   → skip
//   NETWORK    exponential backoff (≤3)           → circuit open / offline
//   LLM        retry (≤2)                         → use cached embedding
//   TIMEOUT    ×1.5 timeout, retry once           → defer (skip)
//   SECURITY   terminate + alert, never retried
//   other      log only
//
// The classifier itself is stateless. The rolling `ErrorLog` is owned by the
// caller and passed in; it is internally locked so tier tasks share it freely.

use crate::atoms::constants::{
    CIRCUIT_BREAKER_COOLDOWN_SECS, CIRCUIT_BREAKER_THRESHOLD, ERROR_LOG_CAPACITY,
};
use crate::atoms::error::EngineError;
use crate::atoms::types::{
    ErrorContext, ErrorKind, ErrorRecord, Fallback, MemoryTier, RecoveryAction, Severity,
};
use crate::engine::http::{CircuitBreaker, CircuitState};
use log::{error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

// ═════════════════════════════════════════════════════════════════════════════
// Alerting hook
// ═════════════════════════════════════════════════════════════════════════════

/// Receives records that need operator attention (SECURITY).
pub trait AlertSink: Send + Sync {
    fn alert(&self, record: &ErrorRecord);
}

/// Default sink: an `error!` line tagged for log-based alerting.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn alert(&self, record: &ErrorRecord) {
        error!(
            "[recovery:ALERT] {} {} — {} context={:?}",
            record.severity, record.kind, record.message, record.context
        );
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Error log
// ═════════════════════════════════════════════════════════════════════════════

/// Snapshot of the rolling error statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total: u64,
    pub by_kind: BTreeMap<ErrorKind, u64>,
    pub by_severity: BTreeMap<Severity, u64>,
    pub network_circuit: CircuitState,
}

struct LogRing {
    entries: Vec<ErrorRecord>,
    /// Write index (wraps around at capacity).
    head: usize,
    total: u64,
    by_kind: BTreeMap<ErrorKind, u64>,
    by_severity: BTreeMap<Severity, u64>,
}

/// Ring-buffer error log with per-kind / per-severity counters.
/// When full the oldest record is overwritten; counters keep the totals.
pub struct ErrorLog {
    ring: Mutex<LogRing>,
    capacity: usize,
    network_breaker: CircuitBreaker,
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::with_capacity(ERROR_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(LogRing {
                entries: Vec::with_capacity(capacity.min(64)),
                head: 0,
                total: 0,
                by_kind: BTreeMap::new(),
                by_severity: BTreeMap::new(),
            }),
            capacity,
            network_breaker: CircuitBreaker::new(
                CIRCUIT_BREAKER_THRESHOLD,
                CIRCUIT_BREAKER_COOLDOWN_SECS,
            ),
        }
    }

    /// Append a record. When full, overwrites the oldest one.
    pub fn push(&self, record: ErrorRecord) {
        let mut ring = self.ring.lock();
        *ring.by_kind.entry(record.kind).or_insert(0) += 1;
        *ring.by_severity.entry(record.severity).or_insert(0) += 1;
        if ring.entries.len() < self.capacity {
            ring.entries.push(record);
        } else {
            let head = ring.head;
            ring.entries[head] = record;
        }
        ring.head = (ring.head + 1) % self.capacity;
        ring.total += 1;
    }

    /// Recent records, newest first, up to `limit`.
    pub fn recent(&self, limit: usize) -> Vec<ErrorRecord> {
        let ring = self.ring.lock();
        let len = ring.entries.len();
        let count = limit.min(len);
        let mut out = Vec::with_capacity(count);
        // `head` is one past the newest record, both while filling and once wrapped.
        let mut idx = (ring.head + self.capacity - 1) % self.capacity;
        for _ in 0..count {
            out.push(ring.entries[idx].clone());
            idx = (idx + len - 1) % len;
        }
        out
    }

    pub fn stats(&self) -> ErrorStats {
        let ring = self.ring.lock();
        ErrorStats {
            total: ring.total,
            by_kind: ring.by_kind.clone(),
            by_severity: ring.by_severity.clone(),
            network_circuit: self.network_breaker.state(),
        }
    }

    /// Breaker consulted by the NETWORK strategy.
    pub fn network_breaker(&self) -> &CircuitBreaker {
        &self.network_breaker
    }

    /// A successful call to the embedding server closes the breaker.
    /// Tier runs do not report here: a dbt success says nothing about the network.
    pub fn record_success(&self) {
        self.network_breaker.record_success();
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Classifier
// ═════════════════════════════════════════════════════════════════════════════

pub struct ErrorClassifier {
    alert: Arc<dyn AlertSink>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self { alert: Arc::new(LogAlertSink) }
    }

    pub fn with_alert_sink(alert: Arc<dyn AlertSink>) -> Self {
        Self { alert }
    }

    /// Map an arbitrary error to a kind and severity.
    /// Typed inspection first, then message heuristics over the source chain.
    pub fn classify(&self, err: &(dyn StdError + 'static)) -> (ErrorKind, Severity) {
        let kind = classify_by_type(err).unwrap_or_else(|| classify_message(&error_chain(err)));
        (kind, severity_for(kind))
    }

    /// Classify, pick a strategy, record it, and alert when required.
    pub fn handle(
        &self,
        err: &(dyn StdError + 'static),
        ctx: &ErrorContext,
        log: &ErrorLog,
    ) -> RecoveryAction {
        let (kind, severity) = self.classify(err);
        let message = error_chain(err);
        let action = self.policy(kind, &message, ctx, log);

        let record = ErrorRecord {
            kind,
            severity,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
            context: ctx.to_map(),
            recovery_action: action.clone(),
        };

        match severity {
            Severity::Critical | Severity::High => error!(
                "[recovery] {} {} in {} → {} ({})",
                severity, kind, ctx.operation, action.action_name, record.message
            ),
            Severity::Medium => warn!(
                "[recovery] {} {} in {} → {} ({})",
                severity, kind, ctx.operation, action.action_name, record.message
            ),
            Severity::Low => info!(
                "[recovery] {} {} in {} → {} ({})",
                severity, kind, ctx.operation, action.action_name, record.message
            ),
        }

        if action.alert {
            self.alert.alert(&record);
        }
        log.push(record);
        action
    }

    fn policy(&self, kind: ErrorKind, message: &str, ctx: &ErrorContext, log: &ErrorLog) -> RecoveryAction {
        match kind {
            ErrorKind::Database if is_lock_contention(message) => RecoveryAction {
                jitter: true,
                ..action("retry_with_jitter", 10, 0.1, 2.0, Fallback::Retry, Fallback::Skip)
            },
            ErrorKind::Database => {
                action("retry_with_backoff", 5, 2.0, 60.0, Fallback::Retry, Fallback::UseCache)
            }
            ErrorKind::Network => {
                let breaker = log.network_breaker();
                breaker.record_failure();
                if breaker.state() == CircuitState::Open {
                    action("circuit_open", 0, 0.0, 0.0, Fallback::CircuitOpen, Fallback::Skip)
                } else {
                    action(
                        "retry_with_exponential_backoff",
                        3,
                        1.0,
                        30.0,
                        Fallback::Retry,
                        Fallback::Skip,
                    )
                }
            }
            ErrorKind::Llm => action(
                "retry_with_fallback_model",
                2,
                1.0,
                10.0,
                Fallback::Retry,
                Fallback::UseCache,
            ),
            ErrorKind::Timeout => {
                // Working memory has to stay inside its few-second window.
                let (base, cap) = if ctx.tier == Some(MemoryTier::Continuous) {
                    (0.5, 1.0)
                } else {
                    (5.0, 30.0)
                };
                RecoveryAction {
                    timeout_multiplier: 1.5,
                    ..action("increase_timeout_and_retry", 1, base, cap, Fallback::Retry, Fallback::Skip)
                }
            }
            ErrorKind::Security => RecoveryAction {
                alert: true,
                ..action("terminate_and_alert", 0, 0.0, 0.0, Fallback::Terminate, Fallback::Terminate)
            },
            ErrorKind::Memory | ErrorKind::Validation | ErrorKind::Unknown => {
                action("log_only", 0, 0.0, 0.0, Fallback::Skip, Fallback::Skip)
            }
        }
    }
}

fn action(
    name: &str,
    max_retries: u32,
    base: f64,
    cap: f64,
    fallback: Fallback,
    on_exhausted: Fallback,
) -> RecoveryAction {
    RecoveryAction {
        action_name: name.into(),
        max_retries,
        backoff_base_seconds: base,
        backoff_cap_seconds: cap,
        fallback,
        on_exhausted,
        jitter: false,
        timeout_multiplier: 1.0,
        alert: false,
    }
}

fn severity_for(kind: ErrorKind) -> Severity {
    match kind {
        ErrorKind::Security => Severity::Critical,
        ErrorKind::Database | ErrorKind::Memory => Severity::High,
        ErrorKind::Network | ErrorKind::Llm | ErrorKind::Timeout | ErrorKind::Unknown => {
            Severity::Medium
        }
        ErrorKind::Validation => Severity::Low,
    }
}

/// `err: source: source…` joined into one line.
fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let part = s.to_string();
        if !msg.contains(&part) {
            msg.push_str(": ");
            msg.push_str(&part);
        }
        source = s.source();
    }
    msg
}

fn classify_by_type(err: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    if let Some(e) = err.downcast_ref::<EngineError>() {
        return match e {
            EngineError::Security(_) => Some(ErrorKind::Security),
            EngineError::Database(_) => Some(ErrorKind::Database),
            EngineError::Timeout(_) => Some(ErrorKind::Timeout),
            EngineError::Provider { .. } => Some(ErrorKind::Llm),
            EngineError::Validation(_) | EngineError::Serialization(_) => Some(ErrorKind::Validation),
            EngineError::Network(inner) => Some(classify_reqwest(inner)),
            EngineError::Io(inner) => classify_io(inner),
            EngineError::Config(_) | EngineError::Process(_) | EngineError::Other(_) => None,
        };
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return Some(classify_reqwest(e));
    }
    if let Some(e) = err.downcast_ref::<std::io::Error>() {
        return classify_io(e);
    }
    if err.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
        return Some(ErrorKind::Timeout);
    }
    None
}

fn classify_reqwest(e: &reqwest::Error) -> ErrorKind {
    if e.is_timeout() {
        ErrorKind::Timeout
    } else if e.is_decode() {
        ErrorKind::Validation
    } else {
        ErrorKind::Network
    }
}

fn classify_io(e: &std::io::Error) -> Option<ErrorKind> {
    use std::io::ErrorKind as Io;
    match e.kind() {
        Io::PermissionDenied => Some(ErrorKind::Security),
        Io::TimedOut => Some(ErrorKind::Timeout),
        Io::OutOfMemory => Some(ErrorKind::Memory),
        Io::ConnectionRefused
        | Io::ConnectionReset
        | Io::ConnectionAborted
        | Io::NotConnected
        | Io::BrokenPipe => Some(ErrorKind::Network),
        Io::InvalidData | Io::InvalidInput => Some(ErrorKind::Validation),
        _ => None,
    }
}

fn classify_message(message: &str) -> ErrorKind {
    let m = message.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if any(&["permission", "security", "unauthorized", "forbidden", "access denied"]) {
        ErrorKind::Security
    } else if any(&["database", "sql", "duckdb", "postgres", "deadlock"]) {
        ErrorKind::Database
    } else if any(&["timeout", "timed out"]) {
        ErrorKind::Timeout
    } else if any(&["connection", "network", "unreachable", "dns"]) {
        ErrorKind::Network
    } else if any(&["llm", "ollama", "embedding", "model not found", "model server"]) {
        ErrorKind::Llm
    } else if any(&["out of memory", "cannot allocate", "memoryerror"]) {
        ErrorKind::Memory
    } else if any(&["invalid", "validation", "malformed"]) {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}

fn is_lock_contention(message: &str) -> bool {
    let m = message.to_lowercase();
    ["locked", "lock timeout", "deadlock", "could not set lock", "database is busy"]
        .iter()
        .any(|n| m.contains(n))
}

// ── Tests ──────────────────────────────────────────────────────────────────
