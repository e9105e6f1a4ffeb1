//! Multilingual evaluation of language-model answers
//!
//! This crate checks benchmark questions through a round-trip translation
//! gate, queries models in every validated language, and scores the answers
//! without human raters.
//!
//! # Features
//!
//! - Translation quality gate: back-translation plus embedding similarity
//! - Answer extraction with multilingual final-answer markers
//! - Hybrid scoring: exact match, reasoning similarity and a composite score
//! - Behaviour labels (correct, hallucination, guess, honest abstention)
//! - Append-only JSONL records keyed by question, language, model and attempt
//! - Drift and safety-fingerprint summaries per model and language
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use multiling_rubric::{
//!     corpus::{Question, QuestionCategory},
//!     embedding::OpenAIEmbedder,
//!     extraction::AnswerExtractor,
//!     scoring::{ClassificationPolicy, HybridScorer, ScoringParams},
//!     store::ModelResponse,
//!     translation::TranslatedQuestion,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let embedder = Arc::new(OpenAIEmbedder::new(None).with_base_url("http://localhost:11434/v1"));
//!     let scorer = HybridScorer::new(
//!         embedder,
//!         AnswerExtractor::default(),
//!         ScoringParams::default(),
//!         ClassificationPolicy::default(),
//!     )?;
//!
//!     let question = Question::new("FA-001", QuestionCategory::FactualRecall, "Capital of Germany?", "Berlin");
//!     let translated = TranslatedQuestion::identity(&question);
//!     let response = ModelResponse {
//!         question_id: "FA-001".to_string(),
//!         language: "en".parse()?,
//!         model: "llama3-8b".to_string(),
//!         attempt: 1,
//!         run_id: "example".to_string(),
//!         prompt: question.prompt(),
//!         raw_text: "Final answer: Berlin".to_string(),
//!         latency_ms: 0,
//!         timestamp: chrono::Utc::now(),
//!     };
//!
//!     let scored = scorer.score_response(&question, &response, &translated).await?;
//!     println!("{:?}: {:?}", scored.label, scored.composite);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod config;
pub mod corpus;
pub mod embedding;
pub mod extraction;
pub mod pipeline;
pub mod providers;
pub mod reporting;
pub mod runner;
pub mod scoring;
pub mod store;
pub mod translation;

#[cfg(test)]
mod test_support;

pub use config::Config;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::analysis::{analyze, Analysis};
    pub use crate::config::Config;
    pub use crate::corpus::{Language, Question, QuestionCategory};
    pub use crate::embedding::{CachedEmbedder, Embedding, EmbeddingProvider, OpenAIEmbedder};
    pub use crate::extraction::{AnswerExtractor, AnswerFormat, ExtractedAnswer};
    pub use crate::providers::{
        create_model_targets, CompletionRequest, CompletionResponse, ModelProvider,
        ModelQueryError, ModelTarget,
    };
    pub use crate::reporting::{print_console_report, JsonSummary};
    pub use crate::runner::{Executor, ExecutorConfig, QueryJob};
    pub use crate::scoring::{BehaviorLabel, HybridScorer, ScoredResponse};
    pub use crate::store::{ModelResponse, ResponseRecord};
    pub use crate::translation::{
        LibreTranslateClient, QualityGate, TranslatedQuestion, TranslationProvider,
    };
}
