//! OpenAI-compatible chat completions client

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::traits::{
    CompletionRequest, CompletionResponse, Message, ModelProvider, ModelQueryError, ProviderResult,
};
use crate::runner::rate_limiter::RateLimiter;
use crate::runner::retry::retry_after_ms;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Client for any server speaking the OpenAI chat completions API
pub struct OpenAIClient {
    api_key: Option<String>,
    base_url: String,
    http_client: Client,
    rate_limiter: Arc<RateLimiter>,
    default_model: String,
}

impl OpenAIClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            http_client: Client::new(),
            rate_limiter: Arc::new(RateLimiter::new(500)),
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create from the named environment variable
    pub fn from_env(api_key_env: &str) -> ProviderResult<Self> {
        let api_key = std::env::var(api_key_env)
            .map_err(|_| ModelQueryError::Config(format!("{} not set", api_key_env)))?;
        Ok(Self::new(Some(api_key)))
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set custom rate limit
    pub fn with_rate_limit(mut self, rpm: u32) -> Self {
        self.rate_limiter = Arc::new(RateLimiter::new(rpm));
        self
    }

    /// Set default model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.clone(),
            content: Some(msg.content.clone()),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[async_trait]
impl ModelProvider for OpenAIClient {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.rate_limiter.acquire().await;

        let start = Instant::now();

        let mut messages: Vec<ChatMessage> = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage::from(&Message::system(system.clone())));
        }
        messages.extend(request.messages.iter().map(ChatMessage::from));

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let body = ChatRequest {
            model: model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let mut http_request = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }
        let response = http_request.send().await?;

        let latency_ms = start.elapsed().as_millis() as u64;
        let status = response.status();

        if status == 429 {
            let retry_after = retry_after_ms(response.headers());

            // Quota exhaustion also arrives as 429 but is not worth retrying
            let body = response.text().await.unwrap_or_default();
            if let Ok(error) = serde_json::from_str::<ApiError>(&body) {
                let error_type = error.error.error_type.as_deref().unwrap_or("");
                if error_type == "insufficient_quota" {
                    return Err(ModelQueryError::Config(format!(
                        "Quota exceeded: {}",
                        error.error.message
                    )));
                }
                tracing::debug!("Rate limited (type={}): {}", error_type, error.error.message);
            }

            return Err(ModelQueryError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(error) => error.error.message,
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };

            if status == 401 || status == 403 {
                return Err(ModelQueryError::Config(format!(
                    "Auth error ({}): {}",
                    status.as_u16(),
                    message
                )));
            }

            return Err(ModelQueryError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelQueryError::Parse(e.to_string()))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelQueryError::Parse("No choices in response".to_string()))?;

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            model: api_response.model.unwrap_or(model),
            latency_ms,
        })
    }
}
