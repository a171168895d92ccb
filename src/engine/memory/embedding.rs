// Rhythm Engine — Embedding Client
//
// Calls the Ollama embedding API to produce vector representations of text,
// with a content-addressed cache in front of it.
//
// `generate()` never fails loudly: every problem is classified and recorded in
// the error log, and the caller gets `None` meaning "no embedding available"
// so it can skip semantic enrichment.

use crate::atoms::constants::{MAX_EMBEDDING_MAGNITUDE, PADDING_NOISE_STD};
use crate::atoms::error::EngineError;
use crate::atoms::types::{ErrorContext, Fallback};
use crate::engine::config::EmbeddingConfig;
use crate::engine::http::is_retryable_status;
use crate::engine::memory::cache::EmbeddingCache;
use crate::engine::memory::vector;
use crate::engine::recovery::{ErrorClassifier, ErrorLog};
use log::{debug, error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Embedding client — Ollama `/api/embeddings` + on-disk cache.
pub struct EmbeddingClient {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    max_text_chars: usize,
    max_retries: u32,
    timeout_base_secs: u64,
    timeout_step_secs: u64,
    backoff_unit: Duration,
    weights: [f64; 3],
    cache: Arc<EmbeddingCache>,
    classifier: Arc<ErrorClassifier>,
    errors: Arc<ErrorLog>,
}

/// Why a single attempt did not produce a vector.
enum AttemptFailure {
    /// 404: the model is not installed. Configuration problem; do not retry.
    ModelNotFound(String),
    /// 5xx / 429: back off before the next attempt.
    ServerBusy(u16, String),
    /// Anything else (bad payload, transport error, other status).
    Failed(EngineError),
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig, cache: Arc<EmbeddingCache>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!("[memory] HTTP client builder failed ({}), using defaults", e);
                Client::new()
            });
        EmbeddingClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            max_text_chars: config.max_text_chars,
            max_retries: config.max_retries,
            timeout_base_secs: config.timeout_base_secs,
            timeout_step_secs: config.timeout_step_secs,
            backoff_unit: Duration::from_millis(config.backoff_unit_ms),
            weights: [config.content_weight, config.summary_weight, config.context_weight],
            cache,
            classifier: Arc::new(ErrorClassifier::new()),
            errors: Arc::new(ErrorLog::new()),
        }
    }

    /// Share a classifier and error log with the rest of the process.
    pub fn with_error_tracking(mut self, classifier: Arc<ErrorClassifier>, errors: Arc<ErrorLog>) -> Self {
        self.classifier = classifier;
        self.errors = errors;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn errors(&self) -> &Arc<ErrorLog> {
        &self.errors
    }

    /// `generate` with the configured model and retry count.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        self.generate(text, &self.model, self.max_retries).await
    }

    /// Embedding for `text` under `model`, from cache or the server.
    ///
    /// Returns a finite vector of exactly `dimension` elements with a
    /// magnitude in `(0, 100]`, or `None` if none could be produced.
    pub async fn generate(&self, text: &str, model: &str, max_retries: u32) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            debug!("[memory] Skipping embedding for empty text");
            return None;
        }
        let text = truncate_chars(text, self.max_text_chars);

        if let Some(hit) = self.cached(text, model).await {
            return Some(hit);
        }

        if let Err(msg) = self.errors.network_breaker().check() {
            warn!("[memory] Embedding server skipped: {}", msg);
            return None;
        }

        let ctx = ErrorContext::new("generate_embedding")
            .with("model", model)
            .with("chars", text.chars().count().to_string());

        for attempt in 0..max_retries {
            let timeout = Duration::from_secs(
                self.timeout_base_secs + self.timeout_step_secs * u64::from(attempt),
            );
            match self.attempt(text, model, timeout).await {
                Ok(vec) => {
                    self.errors.record_success();
                    self.store(text, model, &vec).await;
                    if attempt > 0 {
                        info!("[memory] Embedding succeeded on attempt {}/{}", attempt + 1, max_retries);
                    }
                    return Some(vec);
                }
                Err(AttemptFailure::ModelNotFound(body)) => {
                    let err = EngineError::Config(format!(
                        "embedding model '{}' not found at {} — run `ollama pull {}` ({})",
                        model, self.base_url, model, body
                    ));
                    self.classifier.handle(&err, &ctx, &self.errors);
                    error!("[memory] {}", err);
                    return None;
                }
                Err(AttemptFailure::ServerBusy(status, body)) => {
                    let err = EngineError::provider(
                        "ollama",
                        format!("HTTP {} on attempt {}: {}", status, attempt + 1, body),
                    );
                    self.classifier.handle(&err, &ctx, &self.errors);
                    if attempt + 1 < max_retries {
                        let delay = self.backoff_unit.saturating_mul(2u32.saturating_pow(attempt));
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(AttemptFailure::Failed(err)) => {
                    let action = self.classifier.handle(&err, &ctx, &self.errors);
                    if matches!(action.fallback, Fallback::CircuitOpen | Fallback::Terminate) {
                        warn!("[memory] Giving up on embedding: {}", action.action_name);
                        return None;
                    }
                }
            }
        }

        warn!(
            "[memory] Embedding unavailable after {} attempts (model '{}') — continuing without it",
            max_retries, model
        );
        None
    }

    /// Cache lookup on the blocking pool; a failed task counts as a miss.
    async fn cached(&self, text: &str, model: &str) -> Option<Vec<f32>> {
        let cache = self.cache.clone();
        let (text, model) = (text.to_string(), model.to_string());
        tokio::task::spawn_blocking(move || cache.get(&text, &model))
            .await
            .unwrap_or_else(|e| {
                warn!("[memory] Cache lookup task failed: {}", e);
                None
            })
    }

    async fn store(&self, text: &str, model: &str, vec: &[f32]) {
        let cache = self.cache.clone();
        let (text, model, vec) = (text.to_string(), model.to_string(), vec.to_vec());
        match tokio::task::spawn_blocking(move || cache.set(&text, &model, &vec)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("[memory] Could not cache embedding: {}", e),
            Err(e) => warn!("[memory] Cache write task failed: {}", e),
        }
    }

    /// One POST to `/api/embeddings`, validated and repaired.
    async fn attempt(&self, text: &str, model: &str, timeout: Duration) -> Result<Vec<f32>, AttemptFailure> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = json!({
            "model": model,
            "prompt": text,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AttemptFailure::Failed(e.into()))?;

        let status = resp.status().as_u16();
        if status == 404 {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptFailure::ModelNotFound(body));
        }
        if is_retryable_status(status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptFailure::ServerBusy(status, body));
        }
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(AttemptFailure::Failed(EngineError::provider(
                "ollama",
                format!("unexpected HTTP {}: {}", status, body),
            )));
        }

        let v: Value = resp.json().await.map_err(|e| AttemptFailure::Failed(e.into()))?;
        let raw = parse_embedding(&v).map_err(AttemptFailure::Failed)?;
        repair_vector(raw, self.dimension).map_err(AttemptFailure::Failed)
    }

    /// Embeddings for several texts, one `Option` per input, in order.
    pub async fn generate_batch(&self, texts: &[&str], model: &str) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.generate(text, model, self.max_retries).await);
        }
        let ok = out.iter().filter(|v| v.is_some()).count();
        info!("[memory] Batch embedded {}/{} texts", ok, texts.len());
        out
    }

    /// Weighted fusion of content / summary / context embeddings.
    /// Parts that are absent or fail to embed simply do not contribute.
    pub async fn generate_combined(
        &self,
        content: &str,
        summary: Option<&str>,
        context: Option<&str>,
        model: &str,
    ) -> Option<Vec<f32>> {
        let content_vec = self.generate(content, model, self.max_retries).await;
        let summary_vec = match summary {
            Some(s) => self.generate(s, model, self.max_retries).await,
            None => None,
        };
        let context_vec = match context {
            Some(c) => self.generate(c, model, self.max_retries).await,
            None => None,
        };

        vector::combine(&[
            (content_vec.as_deref(), self.weights[0]),
            (summary_vec.as_deref(), self.weights[1]),
            (context_vec.as_deref(), self.weights[2]),
        ])
    }
}

// ── Validation & repair ────────────────────────────────────────────────

/// Cut `text` to at most `max_chars` characters (never splits a char).
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Extract `embedding` from an Ollama response. Every element must be numeric.
fn parse_embedding(v: &Value) -> Result<Vec<f32>, EngineError> {
    let arr = v["embedding"]
        .as_array()
        .ok_or_else(|| EngineError::Validation("no 'embedding' array in response".into()))?;
    if arr.is_empty() {
        return Err(EngineError::Validation("empty embedding vector".into()));
    }
    arr.iter()
        .map(|x| {
            x.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EngineError::Validation(format!("non-numeric embedding value: {}", x)))
        })
        .collect()
}

/// Bring a server vector to exactly `dimension` finite elements with a sane
/// magnitude: pad short vectors with small Gaussian noise, truncate long
/// ones, reject NaN/Inf and all-zero vectors, rescale magnitudes above 100.
///
/// The padding noise is not reproducible between runs; only the cache makes
/// repeated lookups bit-identical.
pub fn repair_vector(mut v: Vec<f32>, dimension: usize) -> Result<Vec<f32>, EngineError> {
    if v.is_empty() {
        return Err(EngineError::Validation("empty embedding vector".into()));
    }
    if v.len() != dimension {
        warn!("[memory] Embedding has {} dims, expected {} — repairing", v.len(), dimension);
        if v.len() > dimension {
            v.truncate(dimension);
        } else {
            let missing = dimension - v.len();
            v.extend((0..missing).map(|_| (gaussian() * PADDING_NOISE_STD) as f32));
        }
    }
    if !vector::is_finite(&v) {
        return Err(EngineError::Validation("embedding contains NaN or Inf".into()));
    }
    let magnitude = vector::l2_norm(&v);
    if magnitude == 0.0 {
        return Err(EngineError::Validation("embedding has zero magnitude".into()));
    }
    if magnitude > MAX_EMBEDDING_MAGNITUDE {
        warn!("[memory] Embedding magnitude {:.1} exceeds {} — rescaling", magnitude, MAX_EMBEDDING_MAGNITUDE);
        v = vector::normalize(&v);
    }
    Ok(v)
}

/// Standard normal sample (Box–Muller).
fn gaussian() -> f64 {
    let u1 = rand::random::<f64>().max(f64::MIN_POSITIVE);
    let u2 = rand::random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    const DIM: usize = 4;

    fn client_for(url: &str) -> (tempfile::TempDir, EmbeddingClient) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(EmbeddingCache::open(dir.path(), DIM).unwrap());
        let config = EmbeddingConfig {
            base_url: url.to_string(),
            model: "test-embed".into(),
            dimension: DIM,
            cache_dir: dir.path().to_path_buf(),
            timeout_base_secs: 5,
            timeout_step_secs: 1,
            backoff_unit_ms: 1,
            ..Default::default()
        };
        (dir, EmbeddingClient::new(&config, cache))
    }

    async fn mock_embedding(server: &mut Server, body: &str, expect: usize) -> mockito::Mock {
        server
            .mock("POST", "/api/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(expect)
            .create_async()
            .await
    }

    #[tokio::test]
    async fn model_not_found_fails_fast() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .with_status(404)
            .with_body(r#"{"error":"model \"test-embed\" not found"}"#)
            .expect(1)
            .create_async()
            .await;
        let (_d, client) = client_for(&server.url());

        assert!(client.generate("hello", "test-embed", 3).await.is_none());
        mock.assert_async().await;
        assert_eq!(client.errors().stats().total, 1);
    }

    #[tokio::test]
    async fn warm_cache_is_bit_identical_and_skips_server() {
        let mut server = Server::new_async().await;
        let mock = mock_embedding(&mut server, r#"{"embedding":[0.1,0.2,0.3,0.4]}"#, 1).await;
        let (_d, client) = client_for(&server.url());

        let first = client.generate("hello", "test-embed", 3).await.unwrap();
        let second = client.generate("hello", "test-embed", 3).await.unwrap();
        assert_eq!(first, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(
            first.iter().map(|x| x.to_bits()).collect::<Vec<_>>(),
            second.iter().map(|x| x.to_bits()).collect::<Vec<_>>()
        );
        mock.assert_async().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_generates_share_the_cache() {
        let mut server = Server::new_async().await;
        let mock = mock_embedding(&mut server, r#"{"embedding":[0.1,0.2,0.3,0.4]}"#, 3).await;
        let (_d, client) = client_for(&server.url());
        let client = Arc::new(client);

        let tasks: Vec<_> = ["alpha", "beta", "gamma"]
            .into_iter()
            .map(|text| {
                let client = client.clone();
                tokio::spawn(async move { client.generate(text, "test-embed", 3).await })
            })
            .collect();
        for result in futures::future::join_all(tasks).await {
            assert_eq!(result.unwrap().unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        }
        assert_eq!(client.cache.entry_count().unwrap(), 3);

        // Served from disk; the mock expects exactly three hits.
        for text in ["alpha", "beta", "gamma"] {
            assert!(client.generate(text, "test-embed", 3).await.is_some());
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn short_vector_is_padded() {
        let mut server = Server::new_async().await;
        let _m = mock_embedding(&mut server, r#"{"embedding":[0.5,0.5]}"#, 1).await;
        let (_d, client) = client_for(&server.url());

        let v = client.generate("pad me", "test-embed", 3).await.unwrap();
        assert_eq!(v.len(), DIM);
        assert_eq!(&v[..2], &[0.5, 0.5]);
        assert!(v[2..].iter().all(|x| x.is_finite() && x.abs() < 0.1));
    }

    #[tokio::test]
    async fn long_vector_is_truncated() {
        let mut server = Server::new_async().await;
        let _m = mock_embedding(&mut server, r#"{"embedding":[1,2,3,4,5,6]}"#, 1).await;
        let (_d, client) = client_for(&server.url());

        let v = client.generate("cut me", "test-embed", 3).await.unwrap();
        assert_eq!(v, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn oversized_magnitude_is_rescaled() {
        let mut server = Server::new_async().await;
        let _m = mock_embedding(&mut server, r#"{"embedding":[300,400,0,0]}"#, 1).await;
        let (_d, client) = client_for(&server.url());

        let v = client.generate("loud", "test-embed", 3).await.unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6 && (v[1] - 0.8).abs() < 1e-6);
        let m = vector::l2_norm(&v);
        assert!(m > 0.0 && m <= MAX_EMBEDDING_MAGNITUDE);
    }

    #[tokio::test]
    async fn service_unavailable_retries_then_gives_up() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/embeddings")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        let (_d, client) = client_for(&server.url());

        assert!(client.generate("busy", "test-embed", 3).await.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn zero_vector_and_missing_field_are_failed_attempts() {
        let mut server = Server::new_async().await;
        let zero = mock_embedding(&mut server, r#"{"embedding":[0,0,0,0]}"#, 2).await;
        let (_d, client) = client_for(&server.url());
        assert!(client.generate("zero", "test-embed", 2).await.is_none());
        zero.assert_async().await;

        let mut server = Server::new_async().await;
        let missing = mock_embedding(&mut server, r#"{"model":"test-embed"}"#, 3).await;
        let (_d, client) = client_for(&server.url());
        assert!(client.generate("missing", "test-embed", 3).await.is_none());
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn empty_text_never_calls_server() {
        let mut server = Server::new_async().await;
        let mock = mock_embedding(&mut server, r#"{"embedding":[1,0,0,0]}"#, 0).await;
        let (_d, client) = client_for(&server.url());

        assert!(client.generate("", "test-embed", 3).await.is_none());
        assert!(client.generate("   \n\t", "test-embed", 3).await.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_server_degrades_to_none() {
        let (_d, client) = client_for("http://127.0.0.1:1");
        assert!(client.generate("anyone there?", "test-embed", 2).await.is_none());
        assert_eq!(client.errors().stats().total, 2);
    }

    #[tokio::test]
    async fn batch_and_combined() {
        let mut server = Server::new_async().await;
        let _m = mock_embedding(&mut server, r#"{"embedding":[3,4,0,0]}"#, 2).await;
        let (_d, client) = client_for(&server.url());

        let batch = client.generate_batch(&["a", " ", "b"], "test-embed").await;
        assert!(batch[0].is_some() && batch[1].is_none() && batch[2].is_some());

        // Both parts are cached now; the fusion of identical vectors is their normalization.
        let combined = client.generate_combined("a", Some("b"), None, "test-embed").await.unwrap();
        assert!((combined[0] - 0.6).abs() < 1e-6 && (combined[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn repair_rejects_bad_vectors() {
        assert!(repair_vector(vec![], 4).is_err());
        assert!(repair_vector(vec![0.0; 4], 4).is_err());
        assert!(repair_vector(vec![1.0, f32::NAN, 0.0, 0.0], 4).is_err());
        assert!(repair_vector(vec![f32::INFINITY, 1.0], 4).is_err());
    }

    #[test]
    fn repair_always_yields_dimension() {
        for len in [1usize, 3, 4, 5, 900] {
            let v = repair_vector(vec![0.25; len], 768).unwrap();
            assert_eq!(v.len(), 768);
            assert!(vector::is_finite(&v));
            let m = vector::l2_norm(&v);
            assert!(m > 0.0 && m <= MAX_EMBEDDING_MAGNITUDE);
        }
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn parse_rejects_non_numeric() {
        let v: Value = serde_json::from_str(r#"{"embedding":[1.0,"x"]}"#).unwrap();
        assert!(parse_embedding(&v).is_err());
        let v: Value = serde_json::from_str(r#"{"embedding":[]}"#).unwrap();
        assert!(parse_embedding(&v).is_err());
    }
}
