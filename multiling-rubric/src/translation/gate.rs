//! Round-trip translation quality gate
//!
//! A candidate translation is translated back into the source language and
//! the round-tripped text is compared to the original in embedding space.
//! Scores at or above the threshold pass; everything else is rejected with a
//! reason and never reaches a model.

use std::sync::Arc;

use super::{GateFailure, GateVerdict, TranslatedQuestion, TranslationProvider};
use crate::corpus::{Language, Question};
use crate::embedding::{Embedding, EmbeddingProvider};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

/// Verdict for a measured fidelity score
pub fn verdict_for(score: f64, threshold: f64) -> GateVerdict {
    if score >= threshold {
        GateVerdict::Pass
    } else {
        GateVerdict::Fail {
            reason: GateFailure::BelowThreshold { score, threshold },
        }
    }
}

/// Score and verdict from the two embeddings alone
pub fn assess_round_trip(
    original: &Embedding,
    round_tripped: &Embedding,
    threshold: f64,
) -> (f64, GateVerdict) {
    let score = original.cosine(round_tripped);
    (score, verdict_for(score, threshold))
}

/// Translation quality gate
pub struct QualityGate {
    translator: Arc<dyn TranslationProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f64,
}

impl QualityGate {
    pub fn new(
        translator: Arc<dyn TranslationProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        threshold: f64,
    ) -> Self {
        Self {
            translator,
            embedder,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Validate an existing translation of `question` into `target`
    pub async fn validate(
        &self,
        question: &Question,
        translated_text: &str,
        target: &Language,
        source: &Language,
    ) -> TranslatedQuestion {
        let mut result = TranslatedQuestion {
            question: question.localized(target.clone(), translated_text.trim()),
            source_language: source.clone(),
            source_text: question.text.clone(),
            back_translation: None,
            fidelity: None,
            verdict: GateVerdict::Pass,
        };

        if translated_text.trim().is_empty() {
            return self.reject(result, GateFailure::EmptyTranslation);
        }

        let back = match self.translator.translate(translated_text, target, source).await {
            Ok(text) => text,
            Err(e) => {
                return self.reject(
                    result,
                    GateFailure::TranslationService {
                        message: e.to_string(),
                    },
                )
            }
        };
        result.back_translation = Some(back.clone());

        if back.trim().is_empty() {
            return self.reject(result, GateFailure::EmptyTranslation);
        }

        let embeddings = match self.embedder.embed(&question.text).await {
            Ok(original) => self.embedder.embed(&back).await.map(|rt| (original, rt)),
            Err(e) => Err(e),
        };
        let (original, round_tripped) = match embeddings {
            Ok(pair) => pair,
            Err(e) => {
                return self.reject(
                    result,
                    GateFailure::EmbeddingService {
                        message: e.to_string(),
                    },
                )
            }
        };

        let (score, verdict) = assess_round_trip(&original, &round_tripped, self.threshold);
        result.fidelity = Some(score);

        match verdict {
            GateVerdict::Pass => {
                tracing::debug!(
                    "Translation of {} into {} passed with fidelity {:.3}",
                    question.id,
                    target,
                    score
                );
                result
            }
            GateVerdict::Fail { reason } => self.reject(result, reason),
        }
    }

    /// Forward-translate `question` into `target`, then validate the result
    pub async fn translate_and_validate(
        &self,
        question: &Question,
        target: &Language,
    ) -> TranslatedQuestion {
        let source = question.language.clone();
        if *target == source {
            return TranslatedQuestion::identity(question);
        }

        match self.translator.translate(&question.text, &source, target).await {
            Ok(forward) => self.validate(question, &forward, target, &source).await,
            Err(e) => {
                let result = TranslatedQuestion {
                    question: question.localized(target.clone(), ""),
                    source_language: source,
                    source_text: question.text.clone(),
                    back_translation: None,
                    fidelity: None,
                    verdict: GateVerdict::Pass,
                };
                self.reject(
                    result,
                    GateFailure::TranslationService {
                        message: e.to_string(),
                    },
                )
            }
        }
    }

    fn reject(&self, mut result: TranslatedQuestion, reason: GateFailure) -> TranslatedQuestion {
        tracing::warn!(
            "Excluding {} ({}): {} [score: {}]",
            result.question.id,
            result.question.language,
            reason,
            result
                .fidelity
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "n/a".to_string())
        );
        result.verdict = GateVerdict::Fail { reason };
        result
    }
}
