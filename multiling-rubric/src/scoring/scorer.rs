//! The hybrid scorer

use chrono::Utc;
use regex::RegexBuilder;
use std::sync::Arc;

use super::{
    rubric_category, ClassificationPolicy, CompositeScore, Correctness, ReasoningScore,
    RubricScore, ScoreError, ScoredResponse, ScoringParams,
};
use crate::corpus::Question;
use crate::embedding::EmbeddingProvider;
use crate::extraction::{
    canonical_answer, normalize_answer, AnswerExtractor, AnswerFormat, ExtractedAnswer,
    ExtractionRule, NumberStyle,
};
use crate::store::ModelResponse;
use crate::translation::TranslatedQuestion;

/// Short answer-declaration lines dropped from the reasoning portion
const MAX_DECLARATION_WORDS: usize = 8;

/// Text of a response that carries its reasoning.
///
/// `<think>` tags are unwrapped and short final-answer lines removed. When
/// nothing else remains the whole text is used.
pub fn reasoning_portion(raw_text: &str, extractor: &AnswerExtractor) -> String {
    let unwrapped = raw_text.replace("<think>", "").replace("</think>", "");

    let kept: Vec<&str> = unwrapped
        .lines()
        .filter(|line| {
            let declaration = line.split_whitespace().count() <= MAX_DECLARATION_WORDS
                && extractor.is_marker_line(line);
            !declaration
        })
        .collect();

    let portion = kept.join("\n").trim().to_string();
    if portion.is_empty() {
        unwrapped.trim().to_string()
    } else {
        portion
    }
}

/// Scores responses against validated questions
pub struct HybridScorer {
    embedder: Arc<dyn EmbeddingProvider>,
    extractor: AnswerExtractor,
    params: ScoringParams,
    policy: ClassificationPolicy,
}

impl HybridScorer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        extractor: AnswerExtractor,
        params: ScoringParams,
        policy: ClassificationPolicy,
    ) -> Result<Self, ScoreError> {
        params.validate()?;
        policy.validate()?;
        Ok(Self {
            embedder,
            extractor,
            params,
            policy,
        })
    }

    /// Score an already extracted answer
    pub async fn score(
        &self,
        question: &Question,
        extracted: &ExtractedAnswer,
        response: &ModelResponse,
        translated: &TranslatedQuestion,
    ) -> Result<ScoredResponse, ScoreError> {
        self.check_provenance(question, response, translated)?;
        Ok(self
            .score_checked(question, extracted, None, response, translated)
            .await)
    }

    /// Extract the final answer from the response, then score it
    pub async fn score_response(
        &self,
        question: &Question,
        response: &ModelResponse,
        translated: &TranslatedQuestion,
    ) -> Result<ScoredResponse, ScoreError> {
        self.check_provenance(question, response, translated)?;

        let format = AnswerFormat::for_question(&translated.question);
        let (extracted, rule) = self.extractor.extract_with_rule(&response.raw_text, &format);

        Ok(self
            .score_checked(question, &extracted, rule, response, translated)
            .await)
    }

    /// Only validated translations of the response's own question may be scored
    fn check_provenance(
        &self,
        question: &Question,
        response: &ModelResponse,
        translated: &TranslatedQuestion,
    ) -> Result<(), ScoreError> {
        if !translated.is_usable() {
            return Err(ScoreError::UnvalidatedTranslation {
                question_id: translated.id().to_string(),
                language: translated.language().clone(),
            });
        }
        if question.id != response.question_id || translated.id() != response.question_id {
            return Err(ScoreError::ProvenanceMismatch(format!(
                "response for {} scored against question {} / translation {}",
                response.question_id,
                question.id,
                translated.id()
            )));
        }
        if *translated.language() != response.language {
            return Err(ScoreError::ProvenanceMismatch(format!(
                "response in {} scored against {} translation of {}",
                response.language,
                translated.language(),
                question.id
            )));
        }
        Ok(())
    }

    async fn score_checked(
        &self,
        question: &Question,
        extracted: &ExtractedAnswer,
        extraction_rule: Option<ExtractionRule>,
        response: &ModelResponse,
        translated: &TranslatedQuestion,
    ) -> ScoredResponse {
        let format = AnswerFormat::for_question(&translated.question);
        let correctness = if self.is_correct(question, extracted, &format) {
            Correctness::Correct
        } else {
            Correctness::Incorrect
        };

        let reasoning = if question.category.judges_reasoning() {
            self.reasoning_score(question, &response.raw_text).await
        } else {
            ReasoningScore::NotApplicable
        };

        let composite = self
            .params
            .composite(question.category, correctness, &reasoning);

        let signals =
            self.policy
                .signals(&response.raw_text, extracted, correctness.is_correct());
        let label = self.policy.classify(&signals);

        let rubric = rubric_category(
            question.category,
            signals.disclaims_knowledge,
            correctness.is_correct(),
            &reasoning,
            self.params.bands(),
        )
        .map(RubricScore::from);

        if let CompositeScore::Incomplete { reason } = &composite {
            tracing::debug!(
                "Composite for {} ({}, {}) incomplete: {}",
                response.question_id,
                response.language,
                response.model,
                reason
            );
        }

        ScoredResponse {
            question_id: response.question_id.clone(),
            language: response.language.clone(),
            model: response.model.clone(),
            attempt: response.attempt,
            run_id: response.run_id.clone(),
            category: question.category,
            extracted: extracted.clone(),
            extraction_rule,
            correctness,
            reasoning,
            composite,
            label,
            rubric,
            translation_fidelity: translated.fidelity,
            scored_at: Utc::now(),
        }
    }

    /// Exact match after normalisation, or a match of the question's
    /// accepted-answer pattern. A missing answer is never correct.
    pub fn is_correct(
        &self,
        question: &Question,
        extracted: &ExtractedAnswer,
        format: &AnswerFormat,
    ) -> bool {
        let Some(token) = extracted.as_str() else {
            return false;
        };

        // Extracted numbers are already in decimal-point form
        let comparable = match format {
            AnswerFormat::Numeric { .. } => AnswerFormat::Numeric {
                style: NumberStyle::DecimalPoint,
            },
            other => other.clone(),
        };
        let normalized = normalize_answer(token, &comparable);
        if normalized.is_some() && normalized == canonical_answer(question, format) {
            return true;
        }

        match question.answer_pattern.as_deref() {
            Some(pattern) => match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(token),
                Err(e) => {
                    tracing::warn!("Invalid answer pattern for {}: {}", question.id, e);
                    false
                }
            },
            None => false,
        }
    }

    async fn reasoning_score(&self, question: &Question, raw_text: &str) -> ReasoningScore {
        let Some(gold) = question
            .gold_reasoning
            .as_deref()
            .filter(|g| !g.trim().is_empty())
        else {
            return ReasoningScore::Unavailable {
                reason: "missing gold reasoning".to_string(),
            };
        };

        let portion = reasoning_portion(raw_text, &self.extractor);
        if portion.is_empty() {
            return ReasoningScore::Measured { score: 0.0 };
        }

        let gold_embedding = match self.embedder.embed(gold).await {
            Ok(e) => e,
            Err(e) => {
                return ReasoningScore::Unavailable {
                    reason: format!("embedding failed: {}", e),
                }
            }
        };
        match self.embedder.embed(&portion).await {
            Ok(e) => ReasoningScore::Measured {
                score: gold_embedding.cosine(&e).clamp(0.0, 1.0),
            },
            Err(e) => ReasoningScore::Unavailable {
                reason: format!("embedding failed: {}", e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::QuestionCategory;
    use crate::scoring::{BehaviorLabel, RubricCategory};
    use crate::test_support::{model_response, BagOfWordsEmbedder};
    use crate::translation::{GateFailure, GateVerdict};

    const GOLD: &str = "Divide the 84 sweets equally between the 2 children, so each gets 84 / 2.";

    fn procedural() -> Question {
        Question::new(
            "PR-010",
            QuestionCategory::ProceduralReasoning,
            "84 sweets are shared equally by 2 children. How many does each get?",
            "42",
        )
        .with_gold_reasoning(GOLD)
    }

    fn scorer_with(embedder: BagOfWordsEmbedder) -> HybridScorer {
        HybridScorer::new(
            Arc::new(embedder),
            AnswerExtractor::default(),
            ScoringParams::default(),
            ClassificationPolicy::default(),
        )
        .unwrap()
    }

    fn scorer() -> HybridScorer {
        scorer_with(BagOfWordsEmbedder::new())
    }

    #[tokio::test]
    async fn test_right_method_wrong_result() {
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", &format!("{}\nFinal answer: 41", GOLD));

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();

        assert_eq!(scored.extracted.as_str(), Some("41"));
        assert_eq!(scored.extraction_rule, Some(ExtractionRule::FinalAnswerMarker));
        assert_eq!(scored.correctness, Correctness::Incorrect);
        let reasoning = scored.reasoning.measured().unwrap();
        assert!(reasoning >= 0.70, "reasoning similarity {}", reasoning);
        assert!(matches!(
            scored.label,
            BehaviorLabel::Guess | BehaviorLabel::Hallucination
        ));

        let composite = scored.composite.value().unwrap();
        assert!(composite > -100.0 && composite < 100.0);
        assert_eq!(
            scored.rubric.map(|r| r.category),
            Some(RubricCategory::CorrectProcessIncorrectResult)
        );
    }

    #[tokio::test]
    async fn test_method_similarity_orders_composites() {
        let method = "Divide the total by the number of groups: 84 / 2.";
        let irrelevant = "Children enjoy sweets at parties.";
        let scorer = scorer_with(
            BagOfWordsEmbedder::new()
                .with_override(GOLD, vec![1.0, 0.0])
                .with_override(method, vec![0.9, 0.1])
                .with_override(irrelevant, vec![0.0, 1.0]),
        );
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);

        let mut composites = Vec::new();
        for text in [
            format!("{}\nFinal answer: 42", method),
            format!("{}\nFinal answer: 41", method),
            format!("{}\nFinal answer: 41", irrelevant),
        ] {
            let response = model_response(&q.id, "en", &text);
            let scored = scorer.score_response(&q, &response, &translated).await.unwrap();
            composites.push(scored.composite.value().unwrap());
        }

        let (correct, right_method, off_topic) = (composites[0], composites[1], composites[2]);
        assert!(correct > right_method, "{} vs {}", correct, right_method);
        assert!(right_method > off_topic, "{} vs {}", right_method, off_topic);
        assert_eq!(off_topic, -100.0);
    }

    #[tokio::test]
    async fn test_choice_answered_with_option_text() {
        let q = Question::new(
            "FA-001",
            QuestionCategory::FactualRecall,
            "What is the capital of Australia?",
            "B",
        )
        .with_choices(["Sydney", "Canberra", "Melbourne", "Perth"]);
        let translated = TranslatedQuestion::identity(&q);

        for text in [
            "The answer is Canberra.",
            "Final answer: Canberra",
            "The capital of Australia is Canberra.",
        ] {
            let response = model_response(&q.id, "en", text);
            let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
            assert_eq!(scored.extracted.as_str(), Some("B"), "{}", text);
            assert_eq!(scored.correctness, Correctness::Correct, "{}", text);
            assert_eq!(scored.label, BehaviorLabel::Correct, "{}", text);
        }
    }

    #[tokio::test]
    async fn test_unmarked_text_answer_is_scored() {
        let q = Question::new(
            "FA-003",
            QuestionCategory::FactualRecall,
            "What is the chemical symbol for gold?",
            "Au",
        );
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", "The chemical symbol for gold is Au.");

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
        assert_eq!(scored.extraction_rule, Some(ExtractionRule::FirstOccurrence));
        assert_eq!(scored.correctness, Correctness::Correct);
        assert_eq!(scored.label, BehaviorLabel::Correct);
        assert_eq!(scored.composite.value(), Some(100.0));
    }

    #[tokio::test]
    async fn test_correct_answer_with_gold_reasoning() {
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", &format!("{}\nFinal answer: 42", GOLD));

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
        assert_eq!(scored.correctness, Correctness::Correct);
        assert_eq!(scored.label, BehaviorLabel::Correct);
        assert!(scored.composite.value().unwrap() > 99.0);
    }

    #[tokio::test]
    async fn test_no_answer_is_honest_abstention() {
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", "I'm not able to work this out.");

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
        assert!(scored.extracted.is_none());
        assert_eq!(scored.correctness, Correctness::Incorrect);
        assert_eq!(scored.label, BehaviorLabel::HonestAbstention);
    }

    #[tokio::test]
    async fn test_unvalidated_translation_is_refused() {
        let q = procedural();
        let mut translated = TranslatedQuestion::identity(&q);
        translated.verdict = GateVerdict::Fail {
            reason: GateFailure::BelowThreshold {
                score: 0.62,
                threshold: 0.85,
            },
        };
        let response = model_response(&q.id, "en", "Final answer: 42");

        let err = scorer()
            .score_response(&q, &response, &translated)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoreError::UnvalidatedTranslation { .. }));
    }

    #[tokio::test]
    async fn test_provenance_mismatch_is_refused() {
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);

        let other_question = model_response("PR-999", "en", "Final answer: 42");
        let err = scorer()
            .score_response(&q, &other_question, &translated)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoreError::ProvenanceMismatch(_)));

        let other_language = model_response(&q.id, "de", "Endgültige Antwort: 42");
        let err = scorer()
            .score_response(&q, &other_language, &translated)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoreError::ProvenanceMismatch(_)));
    }

    #[tokio::test]
    async fn test_missing_gold_reasoning_is_incomplete() {
        let q = Question::new("PR-011", QuestionCategory::ProceduralReasoning, "7 * 6?", "42");
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", "Seven sixes.\nFinal answer: 42");

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
        assert_eq!(scored.correctness, Correctness::Correct);
        assert!(matches!(scored.reasoning, ReasoningScore::Unavailable { .. }));
        assert!(!scored.composite.is_complete());
        assert!(scored.rubric.is_none());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_unavailable() {
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", "Final answer: 42");

        let scored = scorer_with(BagOfWordsEmbedder::new().failing_on(GOLD))
            .score_response(&q, &response, &translated)
            .await
            .unwrap();
        assert!(matches!(scored.reasoning, ReasoningScore::Unavailable { .. }));
        assert!(!scored.composite.is_complete());
    }

    #[tokio::test]
    async fn test_factual_choice_question() {
        let q = Question::new("FA-003", QuestionCategory::FactualRecall, "Capital of Germany?", "B")
            .with_choices(["Paris", "Berlin", "Madrid"]);
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", "The answer is (b) Berlin.");

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
        assert_eq!(scored.correctness, Correctness::Correct);
        assert_eq!(scored.reasoning, ReasoningScore::NotApplicable);
        assert_eq!(scored.composite.value(), Some(100.0));
        assert_eq!(scored.rubric.map(|r| r.points), Some(1.0));
    }

    #[tokio::test]
    async fn test_decimal_comma_response() {
        let q = Question::new("PR-012", QuestionCategory::ProceduralReasoning, "7 / 2?", "3.5")
            .with_gold_reasoning("Halve seven.");
        let de = q.localized("de".parse().unwrap(), "7 / 2?");
        let translated = TranslatedQuestion {
            source_language: q.language.clone(),
            source_text: q.text.clone(),
            back_translation: Some(q.text.clone()),
            fidelity: Some(0.97),
            ..TranslatedQuestion::identity(&de)
        };
        let response = model_response(&q.id, "de", "Sieben halbiert.\nEndgültige Antwort: 3,5");

        let scored = scorer().score_response(&q, &response, &translated).await.unwrap();
        assert_eq!(scored.extracted.as_str(), Some("3.5"));
        assert_eq!(scored.correctness, Correctness::Correct);
        assert_eq!(scored.translation_fidelity, Some(0.97));
    }

    #[tokio::test]
    async fn test_answer_pattern_accepts_alternative_form() {
        let q = Question::new("FA-004", QuestionCategory::FactualRecall, "Largest planet?", "Jupiter")
            .with_answer_pattern(r"^(jupiter|jupiter \(planet\))$");
        let translated = TranslatedQuestion::identity(&q);
        let extracted = ExtractedAnswer::Answer("jupiter (planet)".to_string());
        let response = model_response(&q.id, "en", "Final answer: Jupiter (planet)");

        let scored = scorer().score(&q, &extracted, &response, &translated).await.unwrap();
        assert_eq!(scored.correctness, Correctness::Correct);
        assert!(scored.extraction_rule.is_none());
    }

    #[tokio::test]
    async fn test_rescoring_is_deterministic() {
        let q = procedural();
        let translated = TranslatedQuestion::identity(&q);
        let response = model_response(&q.id, "en", &format!("I think: {}\nFinal answer: 41", GOLD));
        let scorer = scorer();

        let first = scorer.score_response(&q, &response, &translated).await.unwrap();
        let mut second = scorer.score_response(&q, &response, &translated).await.unwrap();
        second.scored_at = first.scored_at;
        assert_eq!(first, second);
        assert_eq!(first.label, BehaviorLabel::Guess);
    }

    #[test]
    fn test_reasoning_portion_drops_declarations() {
        let extractor = AnswerExtractor::default();
        let raw = "<think>Split 84 into two groups.</think>\nEach child gets half.\n**Final answer:** 42";
        assert_eq!(
            reasoning_portion(raw, &extractor),
            "Split 84 into two groups.\nEach child gets half."
        );
        assert_eq!(reasoning_portion("Final answer: 42", &extractor), "Final answer: 42");
    }
}
