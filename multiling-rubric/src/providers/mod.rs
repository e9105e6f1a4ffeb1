//! Model provider implementations

pub mod ollama;
pub mod openai;
pub mod traits;

pub use ollama::OllamaClient;
pub use openai::OpenAIClient;
pub use traits::{
    CompletionRequest, CompletionResponse, Message, ModelProvider, ModelQueryError,
    ProviderResult,
};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, ProviderConfig, ProviderKind};

/// A model under test bound to the provider that serves it
#[derive(Clone)]
pub struct ModelTarget {
    /// Identifier written into result records
    pub id: String,
    /// Model name sent to the provider
    pub model: String,
    pub provider: Arc<dyn ModelProvider>,
}

impl std::fmt::Debug for ModelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelTarget")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("provider", &self.provider.name())
            .finish()
    }
}

/// Build a client from provider settings
pub fn create_provider(config: &ProviderConfig) -> ProviderResult<Arc<dyn ModelProvider>> {
    tracing::debug!("Creating {} client for {}", config.kind.as_str(), config.base_url);
    match config.kind {
        ProviderKind::Ollama => Ok(Arc::new(
            OllamaClient::new()
                .with_base_url(&config.base_url)
                .with_rate_limit(config.rpm),
        )),
        ProviderKind::OpenAI => {
            let client = match &config.api_key_env {
                Some(env) => OpenAIClient::from_env(env)?,
                None => OpenAIClient::new(None),
            };
            Ok(Arc::new(
                client
                    .with_base_url(&config.base_url)
                    .with_rate_limit(config.rpm),
            ))
        }
    }
}

/// Create targets for the configured models, optionally narrowed to `only`.
/// Models sharing a provider share one client and its rate limiter.
pub fn create_model_targets(config: &Config, only: &[String]) -> ProviderResult<Vec<ModelTarget>> {
    let mut clients: HashMap<&str, Arc<dyn ModelProvider>> = HashMap::new();
    let mut targets = Vec::new();

    for (id, model) in config.selected_models(only) {
        let provider = match clients.get(model.provider.as_str()) {
            Some(client) => Arc::clone(client),
            None => {
                let provider_config = config.providers.get(&model.provider).ok_or_else(|| {
                    ModelQueryError::Config(format!("Unknown provider: {}", model.provider))
                })?;
                let client = create_provider(provider_config)?;
                clients.insert(model.provider.as_str(), Arc::clone(&client));
                client
            }
        };

        targets.push(ModelTarget {
            id: id.clone(),
            model: model.model.clone(),
            provider,
        });
    }

    if targets.is_empty() && !only.is_empty() {
        return Err(ModelQueryError::Config(format!(
            "No configured model matches {}",
            only.join(", ")
        )));
    }

    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_share_provider_client() {
        let config = Config::default();
        let targets = create_model_targets(&config, &[]).unwrap();
        assert_eq!(targets.len(), 3);
        assert!(targets.iter().all(|t| t.provider.name() == "ollama"));
        assert!(Arc::ptr_eq(&targets[0].provider, &targets[1].provider));
        assert_eq!(targets[0].id, "llama3-8b");
        assert_eq!(targets[0].model, "llama3:8b");
    }

    #[test]
    fn test_unknown_selection_is_error() {
        let config = Config::default();
        let err = create_model_targets(&config, &["nope".to_string()]).unwrap_err();
        assert!(matches!(err, ModelQueryError::Config(_)));
    }

    #[test]
    fn test_openai_without_key_env_needs_no_key() {
        let provider = create_provider(&ProviderConfig {
            kind: ProviderKind::OpenAI,
            base_url: "http://localhost:8000/v1/".to_string(),
            api_key_env: None,
            rpm: 0,
        })
        .unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_openai_missing_key_is_config_error() {
        let result = create_provider(&ProviderConfig {
            kind: ProviderKind::OpenAI,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("MULTILING_RUBRIC_TEST_UNSET_KEY".to_string()),
            rpm: 0,
        });
        assert!(matches!(result, Err(ModelQueryError::Config(_))));
    }
}
