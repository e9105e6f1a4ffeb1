//! LibreTranslate-compatible `/translate` client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::{TranslationProvider, TranslationResult, TranslationServiceError};
use crate::corpus::Language;
use crate::runner::rate_limiter::RateLimiter;
use crate::runner::retry::{retry_after_ms, RetryPolicy};

const DEFAULT_BASE_URL: &str = "http://localhost:5000";

pub struct LibreTranslateClient {
    api_key: Option<String>,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl LibreTranslateClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::unlimited()),
            retry: RetryPolicy::default(),
        }
    }

    /// Use the key in `api_key_env` when set; self-hosted servers need none
    pub fn from_env(api_key_env: &str) -> Self {
        Self::new(std::env::var(api_key_env).ok().filter(|k| !k.is_empty()))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
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

    async fn translate_once(
        &self,
        text: &str,
        source: &Language,
        target: &Language,
    ) -> TranslationResult<String> {
        self.rate_limiter.acquire().await;

        let body = TranslateRequest {
            q: text,
            source: source.as_str(),
            target: target.as_str(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let response = self
            .http_client
            .post(format!("{}/translate", self.base_url))
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if status == 429 {
            return Err(TranslationServiceError::RateLimited {
                retry_after_ms: retry_after_ms(response.headers()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<TranslateError>(&body) {
                Ok(error) => error.error,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };

            if status == 401 || status == 403 {
                return Err(TranslationServiceError::Config(format!(
                    "Translation auth error ({}): {}",
                    status.as_u16(),
                    message
                )));
            }

            return Err(TranslationServiceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| TranslationServiceError::Parse(e.to_string()))?;

        tracing::debug!(
            "Translated {} chars {} -> {}",
            text.len(),
            source,
            target
        );
        Ok(parsed.translated_text)
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

#[derive(Deserialize)]
struct TranslateError {
    error: String,
}

#[async_trait]
impl TranslationProvider for LibreTranslateClient {
    fn name(&self) -> &str {
        "libretranslate"
    }

    async fn translate(
        &self,
        text: &str,
        source: &Language,
        target: &Language,
    ) -> TranslationResult<String> {
        let label = format!("translate {}->{}", source, target);
        self.retry
            .run(&label, || self.translate_once(text, source, target))
            .await
    }
}
