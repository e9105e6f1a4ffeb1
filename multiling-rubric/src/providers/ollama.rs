//! Ollama `/api/generate` client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    CompletionRequest, CompletionResponse, ModelProvider, ModelQueryError, ProviderResult,
};
use crate::runner::rate_limiter::RateLimiter;
use crate::runner::retry::retry_after_ms;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";

/// Client for a local or remote Ollama server
pub struct OllamaClient {
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaClient {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::unlimited()),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_rate_limit(mut self, rpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm));
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct OllamaError {
    error: String,
}

#[async_trait]
impl ModelProvider for OllamaClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.acquire().await;

        let start = Instant::now();
        let model = request.model.as_deref().unwrap_or(&self.default_model);

        let options = (request.temperature.is_some() || request.max_tokens.is_some()).then(|| {
            GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            }
        });

        let body = GenerateRequest {
            model,
            prompt: request.prompt_text(),
            stream: false,
            system: request.system_prompt.as_deref(),
            options,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            return Err(ModelQueryError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<OllamaError>(&body) {
                Ok(error) => error.error,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };
            return Err(ModelQueryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelQueryError::Parse(e.to_string()))?;

        tracing::debug!("Ollama {} answered in {}ms", model, latency_ms);

        Ok(CompletionResponse {
            content: parsed.response,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            latency_ms,
        })
    }
}
