//! Aggregation of scored responses: performance, drift and safety fingerprint

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::corpus::{Language, QuestionCategory};
use crate::scoring::{BehaviorLabel, RubricCategory, ScoredResponse};

/// Aggregate over one group of scored responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub responses: usize,
    pub complete: usize,
    pub incomplete: usize,
    /// Mean composite over complete responses
    pub mean_composite: Option<f64>,
    /// Mean rubric points as a percentage of the maximum
    pub rubric_percent: Option<f64>,
    pub accuracy_percent: f64,
}

impl GroupStats {
    fn from_responses(responses: &[&ScoredResponse]) -> Self {
        let composites: Vec<f64> = responses.iter().filter_map(|r| r.composite.value()).collect();
        let rubric: Vec<f64> = responses
            .iter()
            .filter_map(|r| r.rubric.map(|s| s.points))
            .collect();
        let correct = responses
            .iter()
            .filter(|r| r.correctness.is_correct())
            .count();

        Self {
            responses: responses.len(),
            complete: composites.len(),
            incomplete: responses.len() - composites.len(),
            mean_composite: mean(&composites),
            rubric_percent: mean(&rubric).map(|m| m * 100.0),
            accuracy_percent: percent(correct, responses.len()),
        }
    }
}

/// Performance of one model in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguagePerformance {
    pub model: String,
    pub language: Language,
    #[serde(flatten)]
    pub stats: GroupStats,
    /// Source-language mean composite minus this language's, in points
    pub composite_drift: Option<f64>,
    /// Source-language rubric percentage minus this language's
    pub rubric_drift: Option<f64>,
}

/// Performance of one model on one question category in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPerformance {
    pub model: String,
    pub category: QuestionCategory,
    pub language: Language,
    #[serde(flatten)]
    pub stats: GroupStats,
    pub composite_drift: Option<f64>,
    pub rubric_drift: Option<f64>,
}

/// Behaviour label and rubric category distribution of one model in one language
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyFingerprint {
    pub model: String,
    pub language: Language,
    pub responses: usize,
    /// Percentage of responses per label; every label is present
    pub labels: BTreeMap<BehaviorLabel, f64>,
    /// Percentage of responses per rubric category, over responses with one
    pub rubric_categories: BTreeMap<RubricCategory, f64>,
}

/// Full aggregation of a scored results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub total_responses: usize,
    pub source_language: Language,
    pub models: Vec<String>,
    pub languages: Vec<Language>,
    pub overall: Vec<LanguagePerformance>,
    pub by_category: Vec<CategoryPerformance>,
    pub fingerprints: Vec<SafetyFingerprint>,
}

impl Analysis {
    pub fn performance(&self, model: &str, language: &Language) -> Option<&LanguagePerformance> {
        self.overall
            .iter()
            .find(|p| p.model == model && p.language == *language)
    }

    pub fn fingerprint(&self, model: &str, language: &Language) -> Option<&SafetyFingerprint> {
        self.fingerprints
            .iter()
            .find(|f| f.model == model && f.language == *language)
    }

    /// Model with the highest source-language mean composite
    pub fn best_in_source(&self) -> Option<&LanguagePerformance> {
        self.overall
            .iter()
            .filter(|p| p.language == self.source_language)
            .filter(|p| p.stats.mean_composite.is_some())
            .max_by(|a, b| {
                a.stats
                    .mean_composite
                    .partial_cmp(&b.stats.mean_composite)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }

    /// Model with the greatest composite drift into `language`
    pub fn greatest_drift(&self, language: &Language) -> Option<&LanguagePerformance> {
        self.overall
            .iter()
            .filter(|p| p.language == *language && p.composite_drift.is_some())
            .max_by(|a, b| {
                a.composite_drift
                    .partial_cmp(&b.composite_drift)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

fn drift(source: Option<f64>, other: Option<f64>) -> Option<f64> {
    Some(source? - other?)
}

/// Source language first, then the rest in tag order
fn ordered_languages(scored: &[ScoredResponse], source: &Language) -> Vec<Language> {
    let others: BTreeSet<&Language> = scored
        .iter()
        .map(|r| &r.language)
        .filter(|l| *l != source)
        .collect();
    std::iter::once(source.clone())
        .chain(others.into_iter().cloned())
        .collect()
}

fn fingerprint(model: &str, language: &Language, group: &[&ScoredResponse]) -> SafetyFingerprint {
    let labels = BehaviorLabel::all()
        .into_iter()
        .map(|label| {
            let count = group.iter().filter(|r| r.label == label).count();
            (label, percent(count, group.len()))
        })
        .collect();

    let with_rubric: Vec<RubricCategory> =
        group.iter().filter_map(|r| r.rubric.map(|s| s.category)).collect();
    let mut rubric_categories = BTreeMap::new();
    for category in &with_rubric {
        *rubric_categories.entry(*category).or_insert(0.0) += 1.0;
    }
    for value in rubric_categories.values_mut() {
        *value = *value * 100.0 / with_rubric.len() as f64;
    }

    SafetyFingerprint {
        model: model.to_string(),
        language: language.clone(),
        responses: group.len(),
        labels,
        rubric_categories,
    }
}

/// Aggregate scored responses per model, language and category.
///
/// Drift compares each language against `source`; it is absent when either
/// side has no complete score.
pub fn analyze(scored: &[ScoredResponse], source: &Language) -> Analysis {
    let models: Vec<String> = scored
        .iter()
        .map(|r| r.model.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let languages = ordered_languages(scored, source);

    let mut overall = Vec::new();
    let mut fingerprints = Vec::new();
    let mut by_category = Vec::new();

    for model in &models {
        let for_model: Vec<&ScoredResponse> = scored.iter().filter(|r| &r.model == model).collect();

        let source_stats = {
            let group: Vec<&ScoredResponse> = for_model
                .iter()
                .copied()
                .filter(|r| r.language == *source)
                .collect();
            GroupStats::from_responses(&group)
        };

        for language in &languages {
            let group: Vec<&ScoredResponse> = for_model
                .iter()
                .copied()
                .filter(|r| r.language == *language)
                .collect();
            if group.is_empty() {
                continue;
            }
            let stats = GroupStats::from_responses(&group);
            let (composite_drift, rubric_drift) = if language == source {
                (None, None)
            } else {
                (
                    drift(source_stats.mean_composite, stats.mean_composite),
                    drift(source_stats.rubric_percent, stats.rubric_percent),
                )
            };
            fingerprints.push(fingerprint(model, language, &group));
            overall.push(LanguagePerformance {
                model: model.clone(),
                language: language.clone(),
                stats,
                composite_drift,
                rubric_drift,
            });
        }

        for category in QuestionCategory::all() {
            let in_category: Vec<&ScoredResponse> = for_model
                .iter()
                .copied()
                .filter(|r| r.category == category)
                .collect();
            if in_category.is_empty() {
                continue;
            }
            let source_group: Vec<&ScoredResponse> = in_category
                .iter()
                .copied()
                .filter(|r| r.language == *source)
                .collect();
            let source_stats = GroupStats::from_responses(&source_group);

            for language in &languages {
                let group: Vec<&ScoredResponse> = in_category
                    .iter()
                    .copied()
                    .filter(|r| r.language == *language)
                    .collect();
                if group.is_empty() {
                    continue;
                }
                let stats = GroupStats::from_responses(&group);
                let (composite_drift, rubric_drift) = if language == source {
                    (None, None)
                } else {
                    (
                        drift(source_stats.mean_composite, stats.mean_composite),
                        drift(source_stats.rubric_percent, stats.rubric_percent),
                    )
                };
                by_category.push(CategoryPerformance {
                    model: model.clone(),
                    category,
                    language: language.clone(),
                    stats,
                    composite_drift,
                    rubric_drift,
                });
            }
        }
    }

    Analysis {
        total_responses: scored.len(),
        source_language: source.clone(),
        models,
        languages,
        overall,
        by_category,
        fingerprints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractedAnswer;
    use crate::scoring::{CompositeScore, Correctness, ReasoningScore, RubricScore};
    use chrono::Utc;

    fn lang(tag: &str) -> Language {
        tag.parse().unwrap()
    }

    fn scored(
        model: &str,
        language: &str,
        category: QuestionCategory,
        composite: Option<f64>,
        label: BehaviorLabel,
        rubric: Option<RubricCategory>,
    ) -> ScoredResponse {
        ScoredResponse {
            question_id: "Q".to_string(),
            language: lang(language),
            model: model.to_string(),
            attempt: 1,
            run_id: "run".to_string(),
            category,
            extracted: ExtractedAnswer::None,
            extraction_rule: None,
            correctness: if label == BehaviorLabel::Correct {
                Correctness::Correct
            } else {
                Correctness::Incorrect
            },
            reasoning: ReasoningScore::NotApplicable,
            composite: match composite {
                Some(value) => CompositeScore::Score { value },
                None => CompositeScore::Incomplete {
                    reason: "embedding unavailable".to_string(),
                },
            },
            label,
            rubric: rubric.map(RubricScore::from),
            translation_fidelity: Some(1.0),
            scored_at: Utc::now(),
        }
    }

    fn sample() -> Vec<ScoredResponse> {
        use BehaviorLabel::*;
        let f = QuestionCategory::FactualRecall;
        let p = QuestionCategory::ProceduralReasoning;
        vec![
            scored("m1", "en", f, Some(100.0), Correct, Some(RubricCategory::Correct)),
            scored("m1", "en", p, Some(50.0), Guess, Some(RubricCategory::CorrectProcessIncorrectResult)),
            scored("m1", "de", f, Some(-100.0), Hallucination, Some(RubricCategory::Incorrect)),
            scored("m1", "de", p, None, HonestAbstention, None),
            scored("m2", "en", f, Some(100.0), Correct, Some(RubricCategory::Correct)),
            scored("m2", "de", f, Some(100.0), Correct, Some(RubricCategory::Correct)),
        ]
    }

    #[test]
    fn test_mean_composite_and_drift() {
        let analysis = analyze(&sample(), &lang("en"));

        let en = analysis.performance("m1", &lang("en")).unwrap();
        assert_eq!(en.stats.mean_composite, Some(75.0));
        assert_eq!(en.composite_drift, None);
        assert_eq!(en.stats.rubric_percent, Some(75.0));

        let de = analysis.performance("m1", &lang("de")).unwrap();
        assert_eq!(de.stats.complete, 1);
        assert_eq!(de.stats.incomplete, 1);
        assert_eq!(de.stats.mean_composite, Some(-100.0));
        assert_eq!(de.composite_drift, Some(175.0));
        assert_eq!(de.rubric_drift, Some(175.0));

        assert_eq!(analysis.greatest_drift(&lang("de")).unwrap().model, "m1");
        assert_eq!(analysis.languages, vec![lang("en"), lang("de")]);
    }

    #[test]
    fn test_fingerprint_percentages() {
        let analysis = analyze(&sample(), &lang("en"));
        let fp = analysis.fingerprint("m1", &lang("de")).unwrap();

        assert_eq!(fp.responses, 2);
        assert_eq!(fp.labels[&BehaviorLabel::Hallucination], 50.0);
        assert_eq!(fp.labels[&BehaviorLabel::HonestAbstention], 50.0);
        assert_eq!(fp.labels[&BehaviorLabel::Correct], 0.0);
        assert_eq!(fp.labels.len(), 4);
        assert_eq!(fp.rubric_categories[&RubricCategory::Incorrect], 100.0);
    }

    #[test]
    fn test_category_breakdown() {
        let analysis = analyze(&sample(), &lang("en"));
        let factual_de = analysis
            .by_category
            .iter()
            .find(|c| {
                c.model == "m1"
                    && c.category == QuestionCategory::FactualRecall
                    && c.language == lang("de")
            })
            .unwrap();
        assert_eq!(factual_de.composite_drift, Some(200.0));
        assert_eq!(analysis.by_category.iter().filter(|c| c.model == "m2").count(), 2);
    }

    #[test]
    fn test_best_in_source_and_empty_input() {
        let analysis = analyze(&sample(), &lang("en"));
        assert_eq!(analysis.best_in_source().unwrap().model, "m2");

        let empty = analyze(&[], &lang("en"));
        assert_eq!(empty.total_responses, 0);
        assert!(empty.overall.is_empty());
        assert!(empty.best_in_source().is_none());
    }
}
