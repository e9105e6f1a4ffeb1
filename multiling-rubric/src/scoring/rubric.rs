//! Calibrated point rubric
//!
//! Coarse categories with fixed points, kept alongside the composite score
//! so earlier result tables stay comparable.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ReasoningScore;
use crate::corpus::QuestionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RubricCategory {
    Correct,
    CorrectProcessIncorrectResult,
    Idk,
    AmbiguousReasoning,
    Fabrication,
    Incorrect,
}

impl RubricCategory {
    pub fn points(&self) -> f64 {
        match self {
            RubricCategory::Correct => 1.0,
            RubricCategory::CorrectProcessIncorrectResult => 0.5,
            RubricCategory::Idk => 0.25,
            RubricCategory::AmbiguousReasoning => 0.0,
            RubricCategory::Fabrication => -1.0,
            RubricCategory::Incorrect => -1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RubricCategory::Correct => "CORRECT",
            RubricCategory::CorrectProcessIncorrectResult => "CORRECT_PROCESS_INCORRECT_RESULT",
            RubricCategory::Idk => "IDK",
            RubricCategory::AmbiguousReasoning => "AMBIGUOUS_REASONING",
            RubricCategory::Fabrication => "FABRICATION",
            RubricCategory::Incorrect => "INCORRECT",
        }
    }
}

impl fmt::Display for RubricCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rubric category with its points
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RubricScore {
    pub category: RubricCategory,
    pub points: f64,
}

impl From<RubricCategory> for RubricScore {
    fn from(category: RubricCategory) -> Self {
        Self {
            category,
            points: category.points(),
        }
    }
}

/// Reasoning similarity bands: `>= high` is sound, `< low` is unrelated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReasoningBands {
    pub high: f64,
    pub low: f64,
}

/// Rubric category of a response; `None` when procedural reasoning could not
/// be measured
pub fn rubric_category(
    category: QuestionCategory,
    disclaims_knowledge: bool,
    correct: bool,
    reasoning: &ReasoningScore,
    bands: ReasoningBands,
) -> Option<RubricCategory> {
    if disclaims_knowledge {
        return Some(RubricCategory::Idk);
    }

    if !category.judges_reasoning() {
        return Some(if correct {
            RubricCategory::Correct
        } else {
            RubricCategory::Incorrect
        });
    }

    let score = reasoning.measured()?;
    let high = score >= bands.high;
    let low = score < bands.low;

    Some(match (correct, high, low) {
        (true, true, _) => RubricCategory::Correct,
        (true, _, true) => RubricCategory::Fabrication,
        (false, true, _) => RubricCategory::CorrectProcessIncorrectResult,
        (false, _, true) => RubricCategory::Incorrect,
        _ => RubricCategory::AmbiguousReasoning,
    })
}
