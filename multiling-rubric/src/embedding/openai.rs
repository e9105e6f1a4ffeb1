//! OpenAI-compatible `/embeddings` client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{Embedding, EmbeddingProvider, EmbeddingResult, EmbeddingServiceError};
use crate::runner::rate_limiter::RateLimiter;
use crate::runner::retry::{retry_after_ms, RetryPolicy};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Embedding client for any server speaking the OpenAI embeddings API
pub struct OpenAIEmbedder {
    api_key: Option<String>,
    base_url: String,
    model: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl OpenAIEmbedder {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::unlimited()),
            retry: RetryPolicy::default(),
        }
    }

    /// Read the API key from the named environment variable
    pub fn from_env(api_key_env: &str) -> EmbeddingResult<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| EmbeddingServiceError::Config(format!("{} not set", api_key_env)))?;
        Ok(Self::new(Some(api_key)))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_rate_limit(mut self, rpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.http_client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        self
    }

    async fn embed_once(&self, text: &str) -> EmbeddingResult<Embedding> {
        self.rate_limiter.acquire().await;

        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut request = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == 429 {
            return Err(EmbeddingServiceError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };

            if status == 401 || status == 403 {
                return Err(EmbeddingServiceError::Config(format!(
                    "Embedding auth error ({}): {}",
                    status.as_u16(),
                    message
                )));
            }

            return Err(EmbeddingServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: EmbeddingResponse = response.json().await?;
        let data = api_response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .ok_or_else(|| EmbeddingServiceError::Parse("No embedding in response".to_string()))?;

        if data.embedding.is_empty() {
            return Err(EmbeddingServiceError::Parse("Empty embedding vector".to_string()));
        }

        tracing::debug!("Embedded {} chars with {}", text.len(), self.model);
        Ok(Embedding::new(data.embedding))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding> {
        self.retry.run("embedding", || self.embed_once(text)).await
    }
}
