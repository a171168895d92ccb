// ── Rhythm Atoms: Constants ────────────────────────────────────────────────
// All named constants for the crate live here.
// Cadences follow the consolidation timing the pipeline was tuned against:
// working memory refreshes every few seconds while awake, short-term every
// five minutes, replay hourly, long-term integration daily.

use std::time::Duration;

// ── Tier cadences ──────────────────────────────────────────────────────────
pub const CONTINUOUS_WAKE_INTERVAL: Duration = Duration::from_secs(5);
pub const CONTINUOUS_SLEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const SHORT_TERM_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const CONSOLIDATION_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const LONG_TERM_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// ── Transformation engine time budgets (per tier) ─────────────────────────
pub const CONTINUOUS_RUN_TIMEOUT: Duration = Duration::from_secs(60);
pub const SHORT_TERM_RUN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const CONSOLIDATION_RUN_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const LONG_TERM_RUN_TIMEOUT: Duration = Duration::from_secs(60 * 60);

// ── Wake window ────────────────────────────────────────────────────────────
/// First hour (inclusive, local time) of the wake window.
pub const WAKE_START_HOUR: u32 = 6;
/// End hour (exclusive) of the wake window.
pub const WAKE_END_HOUR: u32 = 22;

// ── Embedding server ───────────────────────────────────────────────────────
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;

/// Request text is cut to this many characters before hashing or sending.
pub const MAX_EMBEDDING_TEXT_CHARS: usize = 8000;
/// Attempts per `generate` call unless the caller says otherwise.
pub const DEFAULT_EMBEDDING_RETRIES: u32 = 3;
/// Per-attempt HTTP timeout is `BASE + STEP * attempt`.
pub const EMBEDDING_TIMEOUT_BASE_SECS: u64 = 30;
pub const EMBEDDING_TIMEOUT_STEP_SECS: u64 = 10;
/// Vectors with an L2 norm above this are rescaled to unit length.
pub const MAX_EMBEDDING_MAGNITUDE: f64 = 100.0;
/// Standard deviation of the noise used to pad short vectors.
pub const PADDING_NOISE_STD: f64 = 0.01;

// ── Combined embeddings ────────────────────────────────────────────────────
pub const CONTENT_WEIGHT: f64 = 0.6;
pub const SUMMARY_WEIGHT: f64 = 0.3;
pub const CONTEXT_WEIGHT: f64 = 0.1;

// ── Cache ──────────────────────────────────────────────────────────────────
/// Bumped whenever the on-disk entry layout changes; older entries self-heal.
pub const CACHE_FORMAT_VERSION: u32 = 1;
pub const CACHE_FILE_EXT: &str = "json";

// ── Error log ──────────────────────────────────────────────────────────────
pub const ERROR_LOG_CAPACITY: usize = 1000;
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
pub const CIRCUIT_BREAKER_COOLDOWN_SECS: u64 = 60;

// ── Health ─────────────────────────────────────────────────────────────────
/// A tier is stale once its last success is older than this many intervals.
pub const STALE_INTERVAL_FACTOR: u32 = 3;
/// Consecutive failures at which a tier is reported unhealthy.
pub const UNHEALTHY_CONSECUTIVE_ERRORS: u32 = 3;
