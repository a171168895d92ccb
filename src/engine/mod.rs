// Rhythm Engine — orchestration runtime
// Schedules the memory transformation tiers, classifies and recovers from
// failures, and produces cached embeddings for the transformation side.

pub mod config;
pub mod http;
pub mod memory;
pub mod recovery;
pub mod rhythm;
