//! Embedding backend abstraction and the embedder gateway.
//!
//! The [`EmbeddingBackend`] trait wraps whatever service turns text into
//! vectors. Concrete implementations:
//! - **[`OllamaBackend`]** — calls a local Ollama instance's `/api/embed`
//!   endpoint.
//! - **[`MockEmbeddingBackend`]** — deterministic hash-seeded vectors; no
//!   network. Used by tests and offline runs.
//!
//! The [`Embedder`] gateway layers three concerns on top of a backend:
//! batching (bounded request sizes), a content-addressed cache keyed by
//! `(model, text hash)`, and retry with exponential backoff via an explicit
//! [`RetryPolicy`]. Input order is preserved across batches and cache hits.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited), 5xx (server error), and network errors → retry
//! - Other HTTP 4xx (client error) → fail immediately
//! - Backoff: base, 2×base, 4×base, ... (shift capped at 2^5)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{ContextError, Result};

/// Error returned by a backend for one batch call. The gateway decides
/// whether to retry based on `retryable`.
#[derive(Debug)]
pub struct BackendError {
    pub retryable: bool,
    pub message: String,
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }
}

/// A service that turns an ordered batch of texts into an ordered batch of
/// vectors. Implementations perform at most one request per call; batching
/// and retry live in the [`Embedder`] gateway.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Model identifier (e.g. `"nomic-embed-text"`).
    fn model(&self) -> &str;
    /// Vector dimensionality produced by this model.
    fn dims(&self) -> usize;
    /// Embed one batch, preserving input order.
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError>;
}

// ============ Ollama backend ============

/// Embedding backend using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL. Requires Ollama to be
/// running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaBackend {
    url: String,
    model: String,
    dims: usize,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ContextError::Config(format!("embedding client: {}", e)))?;
        Ok(Self {
            url: config.url.clone(),
            model: config.model.clone(),
            dims: config.dims,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaBackend {
    fn model(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(format!("{}/api/embed", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                BackendError::transient(format!(
                    "connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        let status = resp.status();
        if status.is_success() {
            let json: serde_json::Value = resp
                .json()
                .await
                .map_err(|e| BackendError::terminal(format!("invalid response body: {}", e)))?;
            return parse_embed_response(&json);
        }

        let body_text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(BackendError::transient(format!(
                "backend error {}: {}",
                status, body_text
            )))
        } else {
            Err(BackendError::terminal(format!(
                "backend error {}: {}",
                status, body_text
            )))
        }
    }
}

/// Extract the `embeddings` array from an `/api/embed` response.
fn parse_embed_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| BackendError::terminal("invalid response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| BackendError::terminal("invalid response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

// ============ Mock backend ============

/// Deterministic embedding backend for tests and offline runs.
///
/// Vectors are seeded from a SHA-256 digest of the text, so identical texts
/// always embed identically and distinct texts almost never collide. Clones
/// share the call counter, so a retained clone can observe how many batch
/// calls reached the backend.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dims: usize,
    calls: Arc<Mutex<u64>>,
}

impl MockEmbeddingBackend {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of batch calls that reached this backend.
    pub fn calls(&self) -> u64 {
        *self.calls.lock().unwrap()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        (0..self.dims)
            .map(|i| {
                let byte = digest[i % digest.len()];
                (byte as f32 / 255.0) - 0.5 + (i as f32 * 1e-3)
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    fn model(&self) -> &str {
        "mock-embed"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
        *self.calls.lock().unwrap() += 1;
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

// ============ Retry policy ============

/// Exponential backoff schedule, a pure function of the attempt count.
///
/// Attempt 1 waits `base`, attempt 2 waits `2 × base`, doubling up to a
/// `2^5` cap on the shift, matching the backend retry discipline used for
/// rate limits and server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(5);
        self.base_delay * (1u32 << shift)
    }
}

// ============ Embedding cache ============

/// Content-addressed embedding cache keyed by `(model, text hash)`.
///
/// Explicitly constructed and explicitly passed; never ambient state.
/// Cache hits bypass the backend entirely.
pub struct EmbeddingCache {
    entries: Mutex<HashMap<String, Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(model: &str, text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        format!("{}:{:x}", model, digest)
    }

    pub fn get(&self, model: &str, text: &str) -> Option<Vec<f32>> {
        self.entries
            .lock()
            .unwrap()
            .get(&Self::key(model, text))
            .cloned()
    }

    pub fn put(&self, model: &str, text: &str, vector: Vec<f32>) {
        self.entries
            .lock()
            .unwrap()
            .insert(Self::key(model, text), vector);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Drop all cached vectors.
    pub fn flush(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============ Embedder gateway ============

/// Gateway in front of an [`EmbeddingBackend`]: batching, caching, retry.
pub struct Embedder {
    backend: Box<dyn EmbeddingBackend>,
    cache: Option<EmbeddingCache>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(backend: Box<dyn EmbeddingBackend>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self {
            backend,
            cache: None,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Attach a content-addressed cache so identical texts are never
    /// re-embedded.
    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn cache(&self) -> Option<&EmbeddingCache> {
        self.cache.as_ref()
    }

    /// Embed an ordered sequence of texts, preserving input order.
    ///
    /// Cache hits are resolved without touching the backend; misses are
    /// grouped into batches of at most `batch_size` texts.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.backend.model().to_string();
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut misses: Vec<usize> = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.as_ref().and_then(|c| c.get(&model, text)) {
                Some(vector) => out[i] = Some(vector),
                None => misses.push(i),
            }
        }

        for batch in misses.chunks(self.batch_size) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.call_with_retry(&batch_texts).await?;
            if vectors.len() != batch_texts.len() {
                return Err(ContextError::Embedding {
                    model: model.clone(),
                    attempts: 1,
                    reason: format!(
                        "backend returned {} vectors for {} texts",
                        vectors.len(),
                        batch_texts.len()
                    ),
                });
            }
            for (&i, vector) in batch.iter().zip(vectors.into_iter()) {
                if let Some(cache) = self.cache.as_ref() {
                    cache.put(&model, &texts[i], vector.clone());
                }
                out[i] = Some(vector);
            }
        }

        // Every slot is filled: cache hits above, batch results here.
        Ok(out.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    /// Embed a single query text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = self.embed(&texts).await?;
        vectors.pop().ok_or_else(|| ContextError::Embedding {
            model: self.backend.model().to_string(),
            attempts: 1,
            reason: "empty embedding response".to_string(),
        })
    }

    async fn call_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut last_err: Option<BackendError> = None;

        for attempt in 0..=self.retry.max_retries() {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }

            match self.backend.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.retryable => {
                    tracing::debug!(attempt, error = %e.message, "retrying embedding batch");
                    last_err = Some(e);
                }
                Err(e) => {
                    return Err(ContextError::Embedding {
                        model: self.backend.model().to_string(),
                        attempts: attempt + 1,
                        reason: e.message,
                    });
                }
            }
        }

        Err(ContextError::Embedding {
            model: self.backend.model().to_string(),
            attempts: self.retry.max_retries() + 1,
            reason: last_err
                .map(|e| e.message)
                .unwrap_or_else(|| "embedding failed after retries".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_embedder(dims: usize, batch_size: usize) -> Embedder {
        Embedder::new(
            Box::new(MockEmbeddingBackend::new(dims)),
            batch_size,
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn preserves_input_order() {
        let embedder = mock_embedder(8, 2);
        let texts: Vec<String> = ["alpha", "beta", "gamma", "delta", "epsilon"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let vectors = embedder.embed(&texts).await.unwrap();
        assert_eq!(vectors.len(), texts.len());

        // A permutation of the input yields the correspondingly permuted
        // vectors.
        let permuted: Vec<String> = vec![
            texts[3].clone(),
            texts[0].clone(),
            texts[4].clone(),
            texts[1].clone(),
            texts[2].clone(),
        ];
        let permuted_vectors = embedder.embed(&permuted).await.unwrap();
        assert_eq!(permuted_vectors[0], vectors[3]);
        assert_eq!(permuted_vectors[1], vectors[0]);
        assert_eq!(permuted_vectors[2], vectors[4]);
        assert_eq!(permuted_vectors[3], vectors[1]);
        assert_eq!(permuted_vectors[4], vectors[2]);
    }

    #[tokio::test]
    async fn cache_hits_bypass_backend() {
        let backend = MockEmbeddingBackend::new(4);
        let probe = backend.clone();
        let embedder = Embedder::new(
            Box::new(backend),
            16,
            RetryPolicy::new(0, Duration::from_millis(1)),
        )
        .with_cache(EmbeddingCache::new());

        let texts = vec!["one".to_string(), "two".to_string()];
        let first = embedder.embed(&texts).await.unwrap();
        assert_eq!(probe.calls(), 1);
        assert_eq!(embedder.cache().unwrap().len(), 2);

        // Re-embedding the same texts must not produce another backend call.
        let second = embedder.embed(&texts).await.unwrap();
        assert_eq!(probe.calls(), 1);
        assert_eq!(second, first);

        // A partial hit only sends the miss to the backend.
        let mixed = vec!["one".to_string(), "three".to_string()];
        let third = embedder.embed(&mixed).await.unwrap();
        assert_eq!(probe.calls(), 2);
        assert_eq!(third[0], first[0]);
        assert_eq!(embedder.cache().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn flush_empties_cache() {
        let embedder = mock_embedder(4, 16).with_cache(EmbeddingCache::new());
        embedder.embed(&["x".to_string()]).await.unwrap();
        assert_eq!(embedder.cache().unwrap().len(), 1);
        embedder.cache().unwrap().flush();
        assert!(embedder.cache().unwrap().is_empty());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Duration::from_secs(32));
        // Shift is capped, later attempts keep the ceiling delay.
        assert_eq!(policy.delay_for(7), Duration::from_secs(32));
        assert_eq!(policy.delay_for(30), Duration::from_secs(32));
    }

    struct FailingBackend {
        retryable: bool,
        attempts: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl EmbeddingBackend for FailingBackend {
        fn model(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(
            &self,
            _texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, BackendError> {
            *self.attempts.lock().unwrap() += 1;
            if self.retryable {
                Err(BackendError::transient("rate limited"))
            } else {
                Err(BackendError::terminal("bad request"))
            }
        }
    }

    #[tokio::test]
    async fn transient_failures_exhaust_retries() {
        let attempts = Arc::new(Mutex::new(0));
        let embedder = Embedder::new(
            Box::new(FailingBackend {
                retryable: true,
                attempts: attempts.clone(),
            }),
            8,
            RetryPolicy::new(3, Duration::from_millis(1)),
        );

        let err = embedder.embed(&["t".to_string()]).await.unwrap_err();
        match err {
            ContextError::Embedding {
                attempts: reported, ..
            } => assert_eq!(reported, 4),
            other => panic!("expected Embedding error, got {:?}", other),
        }
        // 1 initial try + 3 retries.
        assert_eq!(*attempts.lock().unwrap(), 4);
    }

    #[tokio::test]
    async fn terminal_failures_do_not_retry() {
        let attempts = Arc::new(Mutex::new(0));
        let embedder = Embedder::new(
            Box::new(FailingBackend {
                retryable: false,
                attempts: attempts.clone(),
            }),
            8,
            RetryPolicy::new(5, Duration::from_millis(1)),
        );

        let err = embedder.embed(&["t".to_string()]).await.unwrap_err();
        match err {
            ContextError::Embedding {
                attempts: reported, ..
            } => assert_eq!(reported, 1),
            other => panic!("expected Embedding error, got {:?}", other),
        }
        assert_eq!(*attempts.lock().unwrap(), 1);
    }
}
