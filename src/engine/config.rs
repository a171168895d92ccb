// Rhythm Engine — Configuration
//
// Layered configuration: built-in defaults → optional TOML file (path in
// `RHYTHM_CONFIG`) → environment overrides. Every struct is `#[serde(default)]`
// so a TOML file only needs the keys it changes. Tier tables are read as
// overlays on that tier's own defaults.

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::{MemoryTier, WakeState};
use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RhythmConfig {
    pub embedding: EmbeddingConfig,
    pub wake: WakeWindow,
    pub transform: TransformConfig,
    pub tiers: TierSchedules,
}

/// Embedding server + cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Base URL of the Ollama server (e.g. http://localhost:11434)
    pub base_url: String,
    /// Embedding model name (e.g. "nomic-embed-text")
    pub model: String,
    /// Fixed vector length every returned embedding is repaired to.
    pub dimension: usize,
    pub cache_dir: PathBuf,
    pub max_text_chars: usize,
    pub max_retries: u32,
    pub timeout_base_secs: u64,
    pub timeout_step_secs: u64,
    /// Unit of the `2^attempt` backoff applied after 5xx responses.
    pub backoff_unit_ms: u64,
    pub content_weight: f64,
    pub summary_weight: f64,
    pub context_weight: f64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            base_url: DEFAULT_OLLAMA_URL.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            cache_dir: default_cache_dir(),
            max_text_chars: MAX_EMBEDDING_TEXT_CHARS,
            max_retries: DEFAULT_EMBEDDING_RETRIES,
            timeout_base_secs: EMBEDDING_TIMEOUT_BASE_SECS,
            timeout_step_secs: EMBEDDING_TIMEOUT_STEP_SECS,
            backoff_unit_ms: 1_000,
            content_weight: CONTENT_WEIGHT,
            summary_weight: SUMMARY_WEIGHT,
            context_weight: CONTEXT_WEIGHT,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("openpawz")
        .join("embeddings")
}

/// Local-time hours considered "awake": `[start_hour, end_hour)`.
/// A window with `start_hour > end_hour` wraps past midnight.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WakeWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for WakeWindow {
    fn default() -> Self {
        WakeWindow { start_hour: WAKE_START_HOUR, end_hour: WAKE_END_HOUR }
    }
}

/// How the external transformation pipeline is invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub program: String,
    /// Arguments placed before the tier selector.
    pub args: Vec<String>,
    pub project_dir: Option<PathBuf>,
    pub profiles_dir: Option<PathBuf>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        TransformConfig {
            program: "dbt".into(),
            args: vec!["run".into(), "--select".into()],
            project_dir: None,
            profiles_dir: None,
        }
    }
}

/// Cadence of a single tier. Intervals are in seconds so TOML stays readable.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TierSchedule {
    pub enabled: bool,
    pub selector: String,
    pub wake_interval_secs: f64,
    pub sleep_interval_secs: f64,
    pub run_timeout_secs: f64,
}

impl TierSchedule {
    pub fn for_tier(tier: MemoryTier) -> Self {
        let (wake, sleep, timeout) = match tier {
            MemoryTier::Continuous => {
                (CONTINUOUS_WAKE_INTERVAL, CONTINUOUS_SLEEP_INTERVAL, CONTINUOUS_RUN_TIMEOUT)
            }
            MemoryTier::ShortTerm => (SHORT_TERM_INTERVAL, SHORT_TERM_INTERVAL, SHORT_TERM_RUN_TIMEOUT),
            MemoryTier::Consolidation => {
                (CONSOLIDATION_INTERVAL, CONSOLIDATION_INTERVAL, CONSOLIDATION_RUN_TIMEOUT)
            }
            MemoryTier::LongTerm => (LONG_TERM_INTERVAL, LONG_TERM_INTERVAL, LONG_TERM_RUN_TIMEOUT),
        };
        TierSchedule {
            enabled: true,
            selector: tier.default_selector().into(),
            wake_interval_secs: wake.as_secs_f64(),
            sleep_interval_secs: sleep.as_secs_f64(),
            run_timeout_secs: timeout.as_secs_f64(),
        }
    }

    /// Interval to wait between iteration starts in the given state.
    pub fn interval(&self, state: WakeState) -> Duration {
        let secs = match state {
            WakeState::Wake => self.wake_interval_secs,
            WakeState::Sleep => self.sleep_interval_secs,
        };
        secs_to_duration(secs)
    }

    pub fn run_timeout(&self) -> Duration {
        secs_to_duration(self.run_timeout_secs)
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

/// Keys present in one `[tiers.<name>]` table.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TierOverride {
    enabled: Option<bool>,
    selector: Option<String>,
    wake_interval_secs: Option<f64>,
    sleep_interval_secs: Option<f64>,
    run_timeout_secs: Option<f64>,
}

impl TierOverride {
    fn apply(self, tier: MemoryTier) -> TierSchedule {
        let base = TierSchedule::for_tier(tier);
        TierSchedule {
            enabled: self.enabled.unwrap_or(base.enabled),
            selector: self.selector.unwrap_or(base.selector),
            wake_interval_secs: self.wake_interval_secs.unwrap_or(base.wake_interval_secs),
            sleep_interval_secs: self.sleep_interval_secs.unwrap_or(base.sleep_interval_secs),
            run_timeout_secs: self.run_timeout_secs.unwrap_or(base.run_timeout_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TierOverrides {
    continuous: TierOverride,
    short_term: TierOverride,
    consolidation: TierOverride,
    long_term: TierOverride,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TierSchedules {
    pub continuous: TierSchedule,
    pub short_term: TierSchedule,
    pub consolidation: TierSchedule,
    pub long_term: TierSchedule,
}

impl Default for TierSchedules {
    fn default() -> Self {
        TierSchedules {
            continuous: TierSchedule::for_tier(MemoryTier::Continuous),
            short_term: TierSchedule::for_tier(MemoryTier::ShortTerm),
            consolidation: TierSchedule::for_tier(MemoryTier::Consolidation),
            long_term: TierSchedule::for_tier(MemoryTier::LongTerm),
        }
    }
}

impl<'de> Deserialize<'de> for TierSchedules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let o = TierOverrides::deserialize(deserializer)?;
        Ok(TierSchedules {
            continuous: o.continuous.apply(MemoryTier::Continuous),
            short_term: o.short_term.apply(MemoryTier::ShortTerm),
            consolidation: o.consolidation.apply(MemoryTier::Consolidation),
            long_term: o.long_term.apply(MemoryTier::LongTerm),
        })
    }
}

impl TierSchedules {
    pub fn get(&self, tier: MemoryTier) -> &TierSchedule {
        match tier {
            MemoryTier::Continuous => &self.continuous,
            MemoryTier::ShortTerm => &self.short_term,
            MemoryTier::Consolidation => &self.consolidation,
            MemoryTier::LongTerm => &self.long_term,
        }
    }

    pub fn get_mut(&mut self, tier: MemoryTier) -> &mut TierSchedule {
        match tier {
            MemoryTier::Continuous => &mut self.continuous,
            MemoryTier::ShortTerm => &mut self.short_term,
            MemoryTier::Consolidation => &mut self.consolidation,
            MemoryTier::LongTerm => &mut self.long_term,
        }
    }
}

// ── Loading ────────────────────────────────────────────────────────────────

impl RhythmConfig {
    /// Defaults → `RHYTHM_CONFIG` TOML file (if set) → environment overrides.
    pub fn load() -> EngineResult<Self> {
        let mut config = match std::env::var("RHYTHM_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_toml_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&raw)?;
        info!("[config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> EngineResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply environment-style overrides through `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(url) = get("OLLAMA_URL") {
            self.embedding.base_url = url;
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(dim) = get("EMBEDDING_DIMENSION").and_then(|v| v.parse().ok()) {
            self.embedding.dimension = dim;
        }
        if let Some(dir) = get("EMBEDDING_CACHE_DIR") {
            self.embedding.cache_dir = PathBuf::from(dir);
        }
        if let Some(h) = get("WAKE_START_HOUR").and_then(|v| v.parse().ok()) {
            self.wake.start_hour = h;
        }
        if let Some(h) = get("WAKE_END_HOUR").and_then(|v| v.parse().ok()) {
            self.wake.end_hour = h;
        }
        if let Some(dir) = get("DBT_PROJECT_DIR") {
            self.transform.project_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = get("DBT_PROFILES_DIR") {
            self.transform.profiles_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.embedding.dimension == 0 {
            return Err(EngineError::Config("embedding.dimension must be > 0".into()));
        }
        if self.embedding.base_url.trim().is_empty() {
            return Err(EngineError::Config("embedding.base_url is empty".into()));
        }
        if self.wake.start_hour >= 24 || self.wake.end_hour >= 24 {
            return Err(EngineError::Config(format!(
                "wake hours must be < 24 (got {}..{})",
                self.wake.start_hour, self.wake.end_hour
            )));
        }
        for tier in MemoryTier::ALL {
            let s = self.tiers.get(tier);
            let valid = |v: f64| v.is_finite() && v > 0.0;
            if !valid(s.wake_interval_secs) || !valid(s.sleep_interval_secs) || !valid(s.run_timeout_secs) {
                return Err(EngineError::Config(format!(
                    "tier {} needs positive intervals and timeout",
                    tier
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_reference_cadence() {
        let c = RhythmConfig::default();
        assert_eq!(c.tiers.continuous.interval(WakeState::Wake), Duration::from_secs(5));
        assert_eq!(c.tiers.continuous.interval(WakeState::Sleep), Duration::from_secs(60));
        assert_eq!(c.tiers.short_term.interval(WakeState::Sleep), Duration::from_secs(300));
        assert_eq!(c.tiers.long_term.selector, "tag:long_term");
        assert_eq!(c.embedding.dimension, 768);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            [embedding]
            model = "mxbai-embed-large"
            dimension = 1024

            [tiers.short_term]
            enabled = false
            selector = "tag:stm"
            wake_interval_secs = 120.0
            sleep_interval_secs = 600.0
            run_timeout_secs = 60.0
        "#;
        let c = RhythmConfig::from_toml_str(raw).unwrap();
        assert_eq!(c.embedding.model, "mxbai-embed-large");
        assert_eq!(c.embedding.dimension, 1024);
        assert_eq!(c.embedding.base_url, DEFAULT_OLLAMA_URL);
        assert!(!c.tiers.short_term.enabled);
        assert_eq!(c.tiers.short_term.interval(WakeState::Sleep), Duration::from_secs(600));
        assert_eq!(c.tiers.continuous, TierSchedule::for_tier(MemoryTier::Continuous));
    }

    #[test]
    fn single_key_override_keeps_tier_defaults() {
        let c = RhythmConfig::from_toml_str("[tiers.short_term]\nenabled = false\n").unwrap();
        let stm = &c.tiers.short_term;
        assert!(!stm.enabled);
        assert_eq!(stm.selector, "tag:short_term");
        assert_eq!(stm.interval(WakeState::Wake), Duration::from_secs(300));
        assert_eq!(stm.run_timeout(), TierSchedule::for_tier(MemoryTier::ShortTerm).run_timeout());
        assert_eq!(c.tiers.continuous, TierSchedule::for_tier(MemoryTier::Continuous));

        let c = RhythmConfig::from_toml_str("[tiers.continuous]\nwake_interval_secs = 2.5\n").unwrap();
        assert_eq!(c.tiers.continuous.interval(WakeState::Wake), Duration::from_millis(2_500));
        assert_eq!(c.tiers.continuous.interval(WakeState::Sleep), Duration::from_secs(60));
        assert_eq!(c.tiers.continuous.selector, "tag:working_memory");
        assert!(c.validate().is_ok());
    }

    #[test]
    fn unknown_tier_key_is_config_error() {
        let err = RhythmConfig::from_toml_str("[tiers.short_term]\nenabeld = false\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OLLAMA_URL", "http://gpu-box:11434"),
            ("EMBEDDING_DIMENSION", "384"),
            ("WAKE_START_HOUR", "7"),
            ("EMBEDDING_MODEL", "  "),
        ]
        .into_iter()
        .collect();
        let mut c = RhythmConfig::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.embedding.base_url, "http://gpu-box:11434");
        assert_eq!(c.embedding.dimension, 384);
        assert_eq!(c.wake.start_hour, 7);
        assert_eq!(c.embedding.model, DEFAULT_EMBEDDING_MODEL);
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut c = RhythmConfig::default();
        c.embedding.dimension = 0;
        assert!(c.validate().is_err());

        let mut c = RhythmConfig::default();
        c.wake.end_hour = 24;
        assert!(c.validate().is_err());

        let mut c = RhythmConfig::default();
        c.tiers.get_mut(MemoryTier::LongTerm).wake_interval_secs = 0.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = RhythmConfig::from_toml_str("embedding = 3").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
