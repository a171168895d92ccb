// OpenPawz Rhythm — memory consolidation orchestrator
//
//   atoms/  — constants, data types, the error enum (no I/O)
//   engine/ — config, recovery policy, embeddings, tier scheduler

pub mod atoms;
pub mod engine;

pub use atoms::error::{EngineError, EngineResult};
pub use atoms::types::{ErrorKind, Fallback, MemoryTier, RecoveryAction, Severity, WakeState};
pub use engine::config::RhythmConfig;
pub use engine::memory::{EmbeddingCache, EmbeddingClient};
pub use engine::recovery::{ErrorClassifier, ErrorLog};
pub use engine::rhythm::{CommandEngine, HealthReport, RhythmScheduler, TransformationEngine};
