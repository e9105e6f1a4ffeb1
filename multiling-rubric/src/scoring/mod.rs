//! Hybrid scoring of model responses
//!
//! A response is judged on two axes: whether its final answer matches the
//! canonical answer, and (for procedural items) how close its reasoning is to
//! a gold rationale. Both feed a composite score and a behavioral label.

pub mod classify;
pub mod rubric;
pub mod scorer;

pub use classify::{
    BehaviorLabel, ClassificationPolicy, Condition, DecisionRow, PolicyError, Signals,
};
pub use rubric::{rubric_category, ReasoningBands, RubricCategory, RubricScore};
pub use scorer::{reasoning_portion, HybridScorer};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::corpus::{Language, QuestionCategory};
use crate::extraction::{ExtractedAnswer, ExtractionRule};

/// Error types for scoring
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("Translation of {question_id} into {language} did not pass the quality gate")]
    UnvalidatedTranslation {
        question_id: String,
        language: Language,
    },

    #[error("Provenance mismatch: {0}")]
    ProvenanceMismatch(String),

    #[error("Invalid scoring parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid classification policy: {0}")]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Correctness {
    Correct,
    Incorrect,
}

impl Correctness {
    pub fn is_correct(&self) -> bool {
        matches!(self, Correctness::Correct)
    }
}

/// Reasoning similarity outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ReasoningScore {
    NotApplicable,
    Measured { score: f64 },
    Unavailable { reason: String },
}

impl ReasoningScore {
    pub fn measured(&self) -> Option<f64> {
        match self {
            ReasoningScore::Measured { score } => Some(*score),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CompositeScore {
    Score { value: f64 },
    Incomplete { reason: String },
}

impl CompositeScore {
    pub fn value(&self) -> Option<f64> {
        match self {
            CompositeScore::Score { value } => Some(*value),
            CompositeScore::Incomplete { .. } => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, CompositeScore::Score { .. })
    }
}

/// Relative weights of correctness and reasoning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeWeights {
    pub correctness: f64,
    pub reasoning: f64,
}

impl CompositeWeights {
    pub fn new(correctness: f64, reasoning: f64) -> Self {
        Self {
            correctness,
            reasoning,
        }
    }
}

/// Scale, weights and reasoning bands of the scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringParams {
    #[serde(default = "default_scale_min")]
    pub scale_min: f64,

    #[serde(default = "default_scale_max")]
    pub scale_max: f64,

    #[serde(default = "default_reasoning_high")]
    pub reasoning_high: f64,

    #[serde(default = "default_reasoning_low")]
    pub reasoning_low: f64,

    #[serde(default = "default_factual_weights")]
    pub factual_recall: CompositeWeights,

    #[serde(default = "default_procedural_weights")]
    pub procedural_reasoning: CompositeWeights,
}

fn default_scale_min() -> f64 {
    -100.0
}

fn default_scale_max() -> f64 {
    100.0
}

fn default_reasoning_high() -> f64 {
    0.70
}

fn default_reasoning_low() -> f64 {
    0.60
}

fn default_factual_weights() -> CompositeWeights {
    CompositeWeights::new(1.0, 0.0)
}

fn default_procedural_weights() -> CompositeWeights {
    CompositeWeights::new(0.5, 0.5)
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            scale_min: default_scale_min(),
            scale_max: default_scale_max(),
            reasoning_high: default_reasoning_high(),
            reasoning_low: default_reasoning_low(),
            factual_recall: default_factual_weights(),
            procedural_reasoning: default_procedural_weights(),
        }
    }
}

impl ScoringParams {
    pub fn weights_for(&self, category: QuestionCategory) -> CompositeWeights {
        match category {
            QuestionCategory::FactualRecall => self.factual_recall,
            QuestionCategory::ProceduralReasoning => self.procedural_reasoning,
        }
    }

    pub fn bands(&self) -> ReasoningBands {
        ReasoningBands {
            high: self.reasoning_high,
            low: self.reasoning_low,
        }
    }

    pub fn validate(&self) -> Result<(), ScoreError> {
        if self.scale_max.partial_cmp(&self.scale_min) != Some(std::cmp::Ordering::Greater) {
            return Err(ScoreError::InvalidParams(format!(
                "scale_max ({}) must exceed scale_min ({})",
                self.scale_max, self.scale_min
            )));
        }
        if !(0.0..=1.0).contains(&self.reasoning_low)
            || !(0.0..=1.0).contains(&self.reasoning_high)
            || self.reasoning_low > self.reasoning_high
        {
            return Err(ScoreError::InvalidParams(format!(
                "reasoning bands must satisfy 0 <= low ({}) <= high ({}) <= 1",
                self.reasoning_low, self.reasoning_high
            )));
        }
        for (name, w) in [
            ("factual_recall", self.factual_recall),
            ("procedural_reasoning", self.procedural_reasoning),
        ] {
            let finite = w.correctness.is_finite() && w.reasoning.is_finite();
            if !finite || w.correctness < 0.0 || w.reasoning < 0.0 || w.correctness + w.reasoning <= 0.0 {
                return Err(ScoreError::InvalidParams(format!(
                    "{} weights must be non-negative with a positive sum",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Composite score from correctness and reasoning.
    ///
    /// `raw = (wc * c + wr * r) / (wc + wr)` mapped linearly onto the scale.
    /// Reasoning that should count but could not be measured makes the
    /// score incomplete.
    pub fn composite(
        &self,
        category: QuestionCategory,
        correctness: Correctness,
        reasoning: &ReasoningScore,
    ) -> CompositeScore {
        let weights = self.weights_for(category);
        let c = if correctness.is_correct() { 1.0 } else { 0.0 };

        let raw = match reasoning {
            ReasoningScore::Measured { score } if weights.reasoning > 0.0 => {
                let r = score.clamp(0.0, 1.0);
                (weights.correctness * c + weights.reasoning * r)
                    / (weights.correctness + weights.reasoning)
            }
            ReasoningScore::Unavailable { reason } if weights.reasoning > 0.0 => {
                return CompositeScore::Incomplete {
                    reason: reason.clone(),
                };
            }
            _ => c,
        };

        CompositeScore::Score {
            value: self.scale_min + raw * (self.scale_max - self.scale_min),
        }
    }
}

/// Final scoring record of one model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredResponse {
    pub question_id: String,
    pub language: Language,
    pub model: String,
    pub attempt: u32,
    pub run_id: String,
    pub category: QuestionCategory,
    pub extracted: ExtractedAnswer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction_rule: Option<ExtractionRule>,
    pub correctness: Correctness,
    pub reasoning: ReasoningScore,
    pub composite: CompositeScore,
    pub label: BehaviorLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<RubricScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_fidelity: Option<f64>,
    pub scored_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(score: CompositeScore) -> f64 {
        score.value().unwrap()
    }

    #[test]
    fn test_composite_endpoints() {
        let params = ScoringParams::default();
        let p = QuestionCategory::ProceduralReasoning;

        let best = params.composite(p, Correctness::Correct, &ReasoningScore::Measured { score: 1.0 });
        let worst = params.composite(p, Correctness::Incorrect, &ReasoningScore::Measured { score: 0.0 });
        assert!((value(best) - 100.0).abs() < 1e-9);
        assert!((value(worst) + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_composite_is_monotone() {
        let params = ScoringParams::default();
        let p = QuestionCategory::ProceduralReasoning;
        let steps: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();

        for c in [Correctness::Incorrect, Correctness::Correct] {
            let mut prev = f64::NEG_INFINITY;
            for r in &steps {
                let v = value(params.composite(p, c, &ReasoningScore::Measured { score: *r }));
                assert!(v >= prev);
                prev = v;
            }
        }
        for r in &steps {
            let wrong = value(params.composite(p, Correctness::Incorrect, &ReasoningScore::Measured { score: *r }));
            let right = value(params.composite(p, Correctness::Correct, &ReasoningScore::Measured { score: *r }));
            assert!(right >= wrong);
        }
    }

    #[test]
    fn test_wrong_answer_with_weak_reasoning_is_negative() {
        let params = ScoringParams::default();
        let v = value(params.composite(
            QuestionCategory::ProceduralReasoning,
            Correctness::Incorrect,
            &ReasoningScore::Measured { score: 0.2 },
        ));
        assert!(v < 0.0);
    }

    #[test]
    fn test_factual_ignores_reasoning() {
        let params = ScoringParams::default();
        let f = QuestionCategory::FactualRecall;
        assert_eq!(
            value(params.composite(f, Correctness::Correct, &ReasoningScore::NotApplicable)),
            100.0
        );
        assert_eq!(
            value(params.composite(f, Correctness::Incorrect, &ReasoningScore::NotApplicable)),
            -100.0
        );
    }

    #[test]
    fn test_unavailable_reasoning_is_incomplete() {
        let params = ScoringParams::default();
        let composite = params.composite(
            QuestionCategory::ProceduralReasoning,
            Correctness::Correct,
            &ReasoningScore::Unavailable {
                reason: "missing gold reasoning".to_string(),
            },
        );
        assert!(!composite.is_complete());
    }

    #[test]
    fn test_params_validation() {
        assert!(ScoringParams::default().validate().is_ok());

        let inverted = ScoringParams {
            scale_min: 1.0,
            scale_max: 0.0,
            ..ScoringParams::default()
        };
        assert!(inverted.validate().is_err());

        let zero_weights = ScoringParams {
            procedural_reasoning: CompositeWeights::new(0.0, 0.0),
            ..ScoringParams::default()
        };
        assert!(zero_weights.validate().is_err());

        let crossed = ScoringParams {
            reasoning_high: 0.5,
            reasoning_low: 0.6,
            ..ScoringParams::default()
        };
        assert!(crossed.validate().is_err());
    }

    #[test]
    fn test_serialized_shapes() {
        let reasoning = serde_json::to_value(ReasoningScore::Measured { score: 0.5 }).unwrap();
        assert_eq!(reasoning["status"], "measured");
        let composite = serde_json::to_value(CompositeScore::Incomplete {
            reason: "x".into(),
        })
        .unwrap();
        assert_eq!(composite["status"], "incomplete");
    }
}
