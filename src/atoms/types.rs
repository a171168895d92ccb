// ── Rhythm Atoms: Pure Data Types ─────────────────────────────────────────────
// Plain struct/enum definitions shared by the scheduler, the recovery policy
// and the embedding subsystem.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Memory tiers ───────────────────────────────────────────────────────────

/// The four processing stages, each running on its own clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Working-memory refresh (seconds).
    Continuous,
    /// Short-term consolidation (minutes).
    ShortTerm,
    /// Hourly replay.
    Consolidation,
    /// Daily long-term integration.
    LongTerm,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 4] = [
        MemoryTier::Continuous,
        MemoryTier::ShortTerm,
        MemoryTier::Consolidation,
        MemoryTier::LongTerm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Continuous => "continuous",
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::Consolidation => "consolidation",
            MemoryTier::LongTerm => "long_term",
        }
    }

    /// Default selector handed to the transformation engine.
    pub fn default_selector(&self) -> &'static str {
        match self {
            MemoryTier::Continuous => "tag:working_memory",
            MemoryTier::ShortTerm => "tag:short_term",
            MemoryTier::Consolidation => "tag:consolidation",
            MemoryTier::LongTerm => "tag:long_term",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse day/night mode. Never persisted; recomputed every loop iteration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WakeState {
    Wake,
    Sleep,
}

// ── Error taxonomy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Database,
    Network,
    Llm,
    Memory,
    Validation,
    Security,
    Timeout,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "DATABASE",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Llm => "LLM",
            ErrorKind::Memory => "MEMORY",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Security => "SECURITY",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// What the caller should do with a failed operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Fallback {
    Retry,
    UseCache,
    Skip,
    CircuitOpen,
    Terminate,
}

/// Declarative recovery decision produced by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryAction {
    pub action_name: String,
    pub max_retries: u32,
    pub backoff_base_seconds: f64,
    pub backoff_cap_seconds: f64,
    pub fallback: Fallback,
    /// Degraded mode once `max_retries` is spent.
    pub on_exhausted: Fallback,
    /// Uniform delay in `[base, cap]` instead of exponential growth.
    pub jitter: bool,
    /// Factor to apply to the operation's timeout before retrying.
    pub timeout_multiplier: f64,
    /// Operator attention required.
    pub alert: bool,
}

impl RecoveryAction {
    pub fn should_retry(&self) -> bool {
        self.fallback == Fallback::Retry && self.max_retries > 0
    }
}

/// Where a failure happened. Serialized flat into `ErrorRecord::context`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorContext {
    pub operation: String,
    pub tier: Option<MemoryTier>,
    pub extra: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self { operation: operation.into(), ..Default::default() }
    }

    pub fn for_tier(operation: impl Into<String>, tier: MemoryTier) -> Self {
        Self { operation: operation.into(), tier: Some(tier), extra: BTreeMap::new() }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Flatten into the free-form key/value map stored on error records.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extra.clone();
        map.insert("operation".into(), self.operation.clone());
        if let Some(tier) = self.tier {
            map.insert("tier".into(), tier.as_str().into());
        }
        map
    }
}

/// One caught failure, with the decision taken for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    /// RFC-3339 UTC timestamp.
    pub timestamp: String,
    pub context: BTreeMap<String, String>,
    pub recovery_action: RecoveryAction,
}
