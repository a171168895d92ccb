// Rhythm Engine — Embedding Subsystem
//
// Turns text into fixed-length vectors using a local Ollama server, with a
// content-addressed on-disk cache so repeated text never hits the network.
//
// Module layout:
//   vector.rs    — pure vector math (norm, normalize, combine, cosine, rank)
//   cache.rs     — EmbeddingCache (sha256-keyed JSON files, atomic writes)
//   embedding.rs — EmbeddingClient (HTTP, retries, repair, write-through)

pub mod cache;
pub mod embedding;
pub mod vector;

// Re-export public API at the module level
pub use cache::{cache_key, EmbeddingCache};
pub use embedding::{repair_vector, EmbeddingClient};
pub use vector::{combine, cosine_similarity, l2_norm, normalize, rank_by_similarity};
