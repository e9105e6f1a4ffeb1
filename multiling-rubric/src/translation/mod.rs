//! Machine translation and the round-trip translation quality gate

pub mod gate;
pub mod libre;

pub use gate::{assess_round_trip, verdict_for, QualityGate};
pub use libre::LibreTranslateClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::corpus::{Language, Question};
use crate::runner::retry::{status_is_transient, Transient};

/// Error types for translation calls
#[derive(Debug, thiserror::Error)]
pub enum TranslationServiceError {
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

impl Transient for TranslationServiceError {
    fn is_transient(&self) -> bool {
        match self {
            TranslationServiceError::Http(e) => e.is_timeout() || e.is_connect(),
            TranslationServiceError::Api { status, .. } => status_is_transient(*status),
            TranslationServiceError::RateLimited { .. } => true,
            TranslationServiceError::Parse(_) | TranslationServiceError::Config(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationServiceError::RateLimited { retry_after_ms } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }
}

pub type TranslationResult<T> = Result<T, TranslationServiceError>;

/// Translates text between two languages
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(
        &self,
        text: &str,
        source: &Language,
        target: &Language,
    ) -> TranslationResult<String>;
}

/// Why a translation was rejected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GateFailure {
    BelowThreshold { score: f64, threshold: f64 },
    TranslationService { message: String },
    EmptyTranslation,
    EmbeddingService { message: String },
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateFailure::BelowThreshold { score, threshold } => {
                write!(f, "fidelity {:.3} below threshold {:.3}", score, threshold)
            }
            GateFailure::TranslationService { message } => {
                write!(f, "translation service error: {}", message)
            }
            GateFailure::EmptyTranslation => write!(f, "empty translation"),
            GateFailure::EmbeddingService { message } => {
                write!(f, "embedding service error: {}", message)
            }
        }
    }
}

/// Outcome of the quality gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Pass,
    Fail { reason: GateFailure },
}

impl GateVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, GateVerdict::Pass)
    }

    pub fn failure(&self) -> Option<&GateFailure> {
        match self {
            GateVerdict::Pass => None,
            GateVerdict::Fail { reason } => Some(reason),
        }
    }
}

/// A question rendered into a target language, with its gate outcome.
///
/// Only `Pass` items may be sent to models or scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedQuestion {
    /// The question with target-language text and tag
    pub question: Question,
    pub source_language: Language,
    pub source_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_translation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fidelity: Option<f64>,
    #[serde(flatten)]
    pub verdict: GateVerdict,
}

impl TranslatedQuestion {
    /// The source-language question needs no translation and always passes
    pub fn identity(question: &Question) -> Self {
        Self {
            question: question.clone(),
            source_language: question.language.clone(),
            source_text: question.text.clone(),
            back_translation: None,
            fidelity: Some(1.0),
            verdict: GateVerdict::Pass,
        }
    }

    pub fn id(&self) -> &str {
        &self.question.id
    }

    pub fn language(&self) -> &Language {
        &self.question.language
    }

    pub fn is_usable(&self) -> bool {
        self.verdict.is_pass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::QuestionCategory;

    #[test]
    fn test_identity_passes() {
        let q = Question::new("FA-001", QuestionCategory::FactualRecall, "Capital of Spain?", "Madrid");
        let t = TranslatedQuestion::identity(&q);
        assert!(t.is_usable());
        assert_eq!(t.fidelity, Some(1.0));
        assert_eq!(t.language().as_str(), "en");
    }

    #[test]
    fn test_verdict_serialization() {
        let q = Question::new("PR-001", QuestionCategory::ProceduralReasoning, "Q?", "42")
            .with_language("de".parse().unwrap());
        let t = TranslatedQuestion {
            question: q,
            source_language: "en".parse().unwrap(),
            source_text: "Q?".to_string(),
            back_translation: Some("Q".to_string()),
            fidelity: Some(0.62),
            verdict: GateVerdict::Fail {
                reason: GateFailure::BelowThreshold {
                    score: 0.62,
                    threshold: 0.85,
                },
            },
        };

        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["verdict"], "fail");
        assert_eq!(json["reason"]["kind"], "below-threshold");

        let back: TranslatedQuestion = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_transient_classification() {
        assert!(TranslationServiceError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(TranslationServiceError::Api {
            status: 502,
            message: "bad gateway".into()
        }
        .is_transient());
        assert!(!TranslationServiceError::Config("no key".into()).is_transient());
    }
}
