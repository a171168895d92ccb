// ── Rhythm Atoms: Error Types ──────────────────────────────────────────────
// One `thiserror` enum for the whole orchestrator.
//
// The variants mirror the recovery taxonomy (DATABASE, NETWORK, LLM, TIMEOUT,
// SECURITY, VALIDATION) so the classifier can decide from the type alone and
// only falls back to reading the message for `Config`, `Process` and `Other`.
// External errors convert through `#[from]` so `?` works at every boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Cache directory, child process spawn, signal handling.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache entry or server payload that is not valid JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure talking to the embedding server.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The transformation pipeline's warehouse rejected a model.
    #[error("Database error: {0}")]
    Database(String),

    /// The embedding server answered, but not with an embedding.
    #[error("Provider error: {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Permission or integrity violation. Never retried.
    #[error("Security error: {0}")]
    Security(String),

    /// Transformation command exited non-zero; carries the output tail.
    #[error("Process error: {0}")]
    Process(String),

    /// A tier run or request exceeded its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Vector shape/finiteness, cache entry layout.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { provider: provider.into(), message: message.into() }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
