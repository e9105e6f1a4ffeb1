//! Sentence embeddings and cosine similarity

pub mod openai;

pub use openai::OpenAIEmbedder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::runner::retry::{status_is_transient, Transient};

/// Dense text embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn cosine(&self, other: &Embedding) -> f64 {
        cosine_similarity(&self.0, &other.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self(values)
    }
}

/// Cosine similarity in [-1, 1]; 0 for empty, zero-norm or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if norm_a < 1e-9 || norm_b < 1e-9 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Error types for embedding calls
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Transient for EmbeddingServiceError {
    fn is_transient(&self) -> bool {
        match self {
            EmbeddingServiceError::Http(e) => e.is_timeout() || e.is_connect(),
            EmbeddingServiceError::Api { status, .. } => status_is_transient(*status),
            EmbeddingServiceError::RateLimited { .. } => true,
            EmbeddingServiceError::Parse(_) | EmbeddingServiceError::Config(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingServiceError::RateLimited { retry_after_ms } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

pub type EmbeddingResult<T> = Result<T, EmbeddingServiceError>;

/// Maps text to a vector in a language-agnostic semantic space
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding model identifier
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding>;
}

/// Memoises embeddings per exact text.
///
/// Gold rationales and source texts are embedded once per run, and repeated
/// lookups return identical vectors.
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<HashMap<String, Embedding>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn cached_len(&self) -> usize {
        self.cache.lock().await.len()
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding> {
        if let Some(hit) = self.cache.lock().await.get(text) {
            return Ok(hit.clone());
        }

        let embedding = self.inner.embed(text).await?;
        self.cache
            .lock()
            .await
            .insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::BagOfWordsEmbedder;

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn test_cached_embedder_memoises() {
        let inner = Arc::new(BagOfWordsEmbedder::new());
        let cached = CachedEmbedder::new(inner.clone());

        let a = cached.embed("divide the total by the group count").await.unwrap();
        let b = cached.embed("divide the total by the group count").await.unwrap();
        cached.embed("something else").await.unwrap();

        assert_eq!(a, b);
        assert_eq!(inner.calls(), 2);
        assert_eq!(cached.cached_len().await, 2);
    }
}
