//! Configuration management for the multilingual evaluation pipeline
//!
//! Loads languages, service endpoints, scoring parameters and the model list
//! from TOML files. Every section has defaults so a partial file is valid.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::corpus::Language;
use crate::extraction::default_markers;
use crate::runner::retry::RetryPolicy;
use crate::scoring::{ClassificationPolicy, ScoringParams};
use crate::translation::gate::DEFAULT_SIMILARITY_THRESHOLD;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub languages: LanguageConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub quality_gate: QualityGateConfig,
    #[serde(default)]
    pub scoring: ScoringParams,
    #[serde(default)]
    pub classification: ClassificationPolicy,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default = "default_providers")]
    pub providers: IndexMap<String, ProviderConfig>,
    /// Models under test, keyed by the identifier used in result files
    #[serde(default = "default_models")]
    pub models: IndexMap<String, ModelConfig>,
    #[serde(default)]
    pub benchmark: BenchmarkConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Source language and translation targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    #[serde(default = "default_source_language")]
    pub source: Language,
    #[serde(default = "default_target_languages")]
    pub targets: Vec<Language>,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            source: default_source_language(),
            targets: default_target_languages(),
        }
    }
}

impl LanguageConfig {
    /// Source language followed by every distinct target
    pub fn all(&self) -> Vec<Language> {
        let mut all = vec![self.source.clone()];
        for target in &self.targets {
            if !all.contains(target) {
                all.push(target.clone());
            }
        }
        all
    }
}

/// LibreTranslate-compatible translation service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    #[serde(default = "default_translation_url")]
    pub base_url: String,
    /// Environment variable holding the API key; the key itself is optional
    #[serde(default = "default_translation_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
    /// Requests per minute, 0 for unlimited
    #[serde(default)]
    pub rpm: u32,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            base_url: default_translation_url(),
            api_key_env: default_translation_key_env(),
            timeout_ms: default_service_timeout_ms(),
            rpm: 0,
        }
    }
}

/// OpenAI-compatible embedding service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_service_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub rpm: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            model: default_embedding_model(),
            api_key_env: default_embedding_key_env(),
            timeout_ms: default_service_timeout_ms(),
            rpm: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateConfig {
    /// Minimum cosine similarity between source and back-translation
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl Default for QualityGateConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Final-answer markers, matched case-insensitively at line start
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            markers: default_markers(),
        }
    }
}

/// Supported model backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    #[serde(alias = "openai-compatible")]
    OpenAI,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAI => "openai",
        }
    }
}

/// Provider connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable with the API key; unset means no auth header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Requests per minute, 0 for unlimited
    #[serde(default)]
    pub rpm: u32,
}

/// A model under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Key into `providers`
    pub provider: String,
    /// Model name sent to the provider
    pub model: String,
    #[serde(default)]
    pub display_name: String,
}

/// Experiment execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_temperature", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sent ahead of every question, e.g. to ask for a `Final answer:` line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            parallel_requests: default_parallel_requests(),
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: None,
        }
    }
}

impl BenchmarkConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_count, self.retry_delay_ms, self.max_retry_delay_ms)
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

// Default value functions
fn default_source_language() -> Language {
    Language::from_code("en")
}
fn default_target_languages() -> Vec<Language> {
    vec![Language::from_code("de"), Language::from_code("es")]
}
fn default_translation_url() -> String { "http://localhost:5000".to_string() }
fn default_translation_key_env() -> String { "LIBRETRANSLATE_API_KEY".to_string() }
fn default_embedding_url() -> String { "http://localhost:11434/v1".to_string() }
fn default_embedding_model() -> String { "bge-m3".to_string() }
fn default_embedding_key_env() -> String { "EMBEDDING_API_KEY".to_string() }
fn default_service_timeout_ms() -> u64 { 30_000 }
fn default_similarity_threshold() -> f64 { DEFAULT_SIMILARITY_THRESHOLD }
fn default_parallel_requests() -> usize { 3 }
fn default_retry_count() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 1000 }
fn default_max_retry_delay_ms() -> u64 { 60_000 }
fn default_timeout_ms() -> u64 { 120_000 }
fn default_temperature() -> Option<f32> { Some(0.0) }
fn default_output_dir() -> String { "results".to_string() }

fn default_providers() -> IndexMap<String, ProviderConfig> {
    let mut providers = IndexMap::new();
    providers.insert(
        "ollama".to_string(),
        ProviderConfig {
            kind: ProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            api_key_env: None,
            rpm: 0,
        },
    );
    providers.insert(
        "openai".to_string(),
        ProviderConfig {
            kind: ProviderKind::OpenAI,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            rpm: 500,
        },
    );
    providers
}

fn default_models() -> IndexMap<String, ModelConfig> {
    let mut models = IndexMap::new();
    models.insert(
        "llama3-8b".to_string(),
        ModelConfig {
            provider: "ollama".to_string(),
            model: "llama3:8b".to_string(),
            display_name: "Llama 3 8B".to_string(),
        },
    );
    models.insert(
        "mistral-7b".to_string(),
        ModelConfig {
            provider: "ollama".to_string(),
            model: "mistral:7b".to_string(),
            display_name: "Mistral 7B".to_string(),
        },
    );
    models.insert(
        "gemma-7b".to_string(),
        ModelConfig {
            provider: "ollama".to_string(),
            model: "gemma:7b".to_string(),
            display_name: "Gemma 7B".to_string(),
        },
    );
    models
}

impl Default for Config {
    fn default() -> Self {
        Self {
            languages: LanguageConfig::default(),
            translation: TranslationConfig::default(),
            embedding: EmbeddingConfig::default(),
            quality_gate: QualityGateConfig::default(),
            scoring: ScoringParams::default(),
            classification: ClassificationPolicy::default(),
            extraction: ExtractionConfig::default(),
            providers: default_providers(),
            models: default_models(),
            benchmark: BenchmarkConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the first default location that parses, or return defaults
    pub fn load_or_default() -> Self {
        let config_paths = [
            "config/rubric.toml",
            "../config/rubric.toml",
            "multiling-rubric/config/rubric.toml",
        ];

        for path in &config_paths {
            match Self::from_file(path) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", path);
                    return config;
                }
                Err(ConfigError::Io(_)) => continue,
                Err(e) => tracing::warn!("Ignoring {}: {}", path, e),
            }
        }

        tracing::info!("Using default configuration");
        Self::default()
    }

    /// Save configuration to a TOML file
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Check cross-section consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.quality_gate.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold must be within [0, 1], got {}",
                threshold
            )));
        }

        if self.languages.targets.contains(&self.languages.source) {
            return Err(ConfigError::Invalid(format!(
                "source language {} is also listed as a target",
                self.languages.source
            )));
        }

        if self.benchmark.parallel_requests == 0 {
            return Err(ConfigError::Invalid(
                "parallel_requests must be at least 1".to_string(),
            ));
        }

        for (id, model) in &self.models {
            if !self.providers.contains_key(&model.provider) {
                return Err(ConfigError::Invalid(format!(
                    "model {} references unknown provider {}",
                    id, model.provider
                )));
            }
        }

        self.scoring
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.classification
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }

    /// Models to run, optionally narrowed to the given identifiers
    pub fn selected_models(&self, only: &[String]) -> Vec<(&String, &ModelConfig)> {
        self.models
            .iter()
            .filter(|(id, _)| only.is_empty() || only.contains(id))
            .collect()
    }

    /// Display name of a model, falling back to its identifier
    pub fn display_name<'a>(&'a self, model_id: &'a str) -> &'a str {
        match self.models.get(model_id) {
            Some(model) if !model.display_name.is_empty() => &model.display_name,
            _ => model_id,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
