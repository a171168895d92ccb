// Rhythm Engine — Embedding Cache
//
// Content-addressed, on-disk cache of embedding vectors.
//
//   key   = sha256(model + ":" + text), lowercase hex
//   file  = <cache_dir>/<key>.json   (versioned JSON, see `CacheEntry`)
//   write = <key>.<uuid>.tmp → rename(<key>.json)
//
// Readers never see a half-written entry: the rename is the only step that
// makes an entry visible. Entries that fail to parse or validate are deleted
// on read and reported as a miss. No locks are taken; concurrent writers to
// the same key race benignly (last rename wins, both payloads are valid).

use crate::atoms::constants::{CACHE_FILE_EXT, CACHE_FORMAT_VERSION};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::memory::vector;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// On-disk layout of one cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    format_version: u32,
    model: String,
    dimension: usize,
    created_at: String,
    vector: Vec<f32>,
}

pub struct EmbeddingCache {
    dir: PathBuf,
    dimension: usize,
}

/// `sha256(model ":" text)` as lowercase hex.
pub fn cache_key(text: &str, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b":");
    hasher.update(text.as_bytes());
    hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

/// Structural check shared by the read and write paths.
pub fn validate_vector(v: &[f32], dimension: usize) -> EngineResult<()> {
    if v.len() != dimension {
        return Err(EngineError::Validation(format!(
            "expected {} dimensions, got {}",
            dimension,
            v.len()
        )));
    }
    if !vector::is_finite(v) {
        return Err(EngineError::Validation("vector contains NaN or Inf".into()));
    }
    Ok(())
}

impl EmbeddingCache {
    /// Open (creating if needed) a cache rooted at `dir` for `dimension`-length vectors.
    pub fn open(dir: impl Into<PathBuf>, dimension: usize) -> EngineResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, dimension })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, CACHE_FILE_EXT))
    }

    /// Cached vector for `(text, model)`, or `None` on a miss.
    /// Corrupt or invalid entries are removed and reported as a miss.
    pub fn get(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let key = cache_key(text, model);
        let path = self.entry_path(&key);

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("[memory:cache] Cannot read {}: {}", &key[..12], e);
                return None;
            }
        };

        match self.decode(&raw, model) {
            Ok(v) => {
                debug!("[memory:cache] Hit {}", &key[..12]);
                Some(v)
            }
            Err(e) => {
                warn!("[memory:cache] Dropping corrupt entry {}: {}", &key[..12], e);
                if let Err(rm) = fs::remove_file(&path) {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("[memory:cache] Failed to remove {}: {}", path.display(), rm);
                    }
                }
                None
            }
        }
    }

    fn decode(&self, raw: &[u8], model: &str) -> EngineResult<Vec<f32>> {
        let entry: CacheEntry = serde_json::from_slice(raw)?;
        if entry.format_version != CACHE_FORMAT_VERSION {
            return Err(EngineError::Validation(format!(
                "format version {} (current {})",
                entry.format_version, CACHE_FORMAT_VERSION
            )));
        }
        if entry.model != model {
            return Err(EngineError::Validation(format!("entry written for model '{}'", entry.model)));
        }
        if entry.dimension != entry.vector.len() {
            return Err(EngineError::Validation("declared dimension does not match vector".into()));
        }
        validate_vector(&entry.vector, self.dimension)?;
        Ok(entry.vector)
    }

    /// Store `vector` for `(text, model)`. Invalid vectors are rejected
    /// without touching the disk.
    pub fn set(&self, text: &str, model: &str, vector: &[f32]) -> EngineResult<()> {
        validate_vector(vector, self.dimension)?;

        let key = cache_key(text, model);
        let entry = CacheEntry {
            format_version: CACHE_FORMAT_VERSION,
            model: model.to_string(),
            dimension: vector.len(),
            created_at: chrono::Utc::now().to_rfc3339(),
            vector: vector.to_vec(),
        };
        let bytes = serde_json::to_vec(&entry)?;

        let tmp = self.dir.join(format!("{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        let result = write_file_synced(&tmp, &bytes).and_then(|_| fs::rename(&tmp, self.entry_path(&key)));
        if let Err(e) = result {
            fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        debug!("[memory:cache] Stored {} ({} dims)", &key[..12], vector.len());
        Ok(())
    }

    /// Number of committed entries (temp files excluded).
    pub fn entry_count(&self) -> EngineResult<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            if is_entry_file(&entry?.path()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove every entry and leftover temp file. Returns how many files were removed.
    pub fn clear(&self) -> EngineResult<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_tmp = path.extension().is_some_and(|e| e == "tmp");
            if is_entry_file(&path) || is_tmp {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_entry_file(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == CACHE_FILE_EXT)
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 4;

    fn cache() -> (tempfile::TempDir, EmbeddingCache) {
        let dir = tempfile::tempdir().unwrap();
        let cache = EmbeddingCache::open(dir.path(), DIM).unwrap();
        (dir, cache)
    }

    #[test]
    fn key_is_sha256_of_model_colon_text() {
        assert_eq!(
            cache_key("hello", "nomic-embed-text"),
            "5c6b0377978d3c4f449765b786cdd85d575c763ffb2fa6ad1779eaa88e0e2fe3"
        );
        assert_ne!(cache_key("a", "b:c"), cache_key("c", "b"));
        assert_ne!(cache_key("hello world", "m"), cache_key("world hello", "m"));
        assert_eq!(cache_key("x", "m"), cache_key("x", "m"));
    }

    #[test]
    fn roundtrip_and_miss() {
        let (_d, cache) = cache();
        assert!(cache.get("hello", "m").is_none());
        cache.set("hello", "m", &[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(cache.get("hello", "m"), Some(vec![0.1, 0.2, 0.3, 0.4]));
        assert!(cache.get("hello", "other-model").is_none());
        assert_eq!(cache.entry_count().unwrap(), 1);
    }

    #[test]
    fn set_rejects_invalid_vectors() {
        let (_d, cache) = cache();
        assert!(cache.set("a", "m", &[1.0, 2.0]).is_err());
        assert!(cache.set("a", "m", &[1.0, f32::NAN, 0.0, 0.0]).is_err());
        assert!(cache.set("a", "m", &[1.0, f32::INFINITY, 0.0, 0.0]).is_err());
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn corrupt_entry_self_heals() {
        let (_d, cache) = cache();
        let path = cache.entry_path(&cache_key("text", "m"));
        fs::write(&path, b"{not json").unwrap();
        assert!(cache.get("text", "m").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn wrong_dimension_entry_self_heals() {
        let (_d, cache) = cache();
        let path = cache.entry_path(&cache_key("text", "m"));
        let entry = CacheEntry {
            format_version: CACHE_FORMAT_VERSION,
            model: "m".into(),
            dimension: 2,
            created_at: String::new(),
            vector: vec![1.0, 2.0],
        };
        fs::write(&path, serde_json::to_vec(&entry).unwrap()).unwrap();
        assert!(cache.get("text", "m").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn old_format_version_self_heals() {
        let (_d, cache) = cache();
        let path = cache.entry_path(&cache_key("text", "m"));
        let raw = r#"{"format_version":0,"model":"m","dimension":4,"created_at":"","vector":[1,2,3,4]}"#;
        fs::write(&path, raw).unwrap();
        assert!(cache.get("text", "m").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let (dir, cache) = cache();
        cache.set("a", "m", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        cache.set("a", "m", &[0.0, 1.0, 0.0, 0.0]).unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(".json"));
        assert_eq!(cache.get("a", "m"), Some(vec![0.0, 1.0, 0.0, 0.0]));
    }

    #[test]
    fn concurrent_writers_to_distinct_and_same_keys() {
        let (_d, cache) = cache();
        let cache = std::sync::Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let v = [i as f32, 1.0, 0.0, 0.0];
                    cache.set(&format!("text-{}", i), "m", &v).unwrap();
                    cache.set("shared", "m", &v).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.entry_count().unwrap(), 9);
        let shared = cache.get("shared", "m").unwrap();
        assert_eq!(shared[1], 1.0);
    }

    #[test]
    fn clear_removes_everything() {
        let (dir, cache) = cache();
        cache.set("a", "m", &[1.0, 0.0, 0.0, 0.0]).unwrap();
        fs::write(dir.path().join("stale.abc.tmp"), b"x").unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.entry_count().unwrap(), 0);
    }
}
