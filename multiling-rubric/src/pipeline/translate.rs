//! Corpus translation through the quality gate

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::{questions_prefix, PipelineResult};
use crate::corpus::{append_jsonl, write_jsonl, Language, Question};
use crate::translation::{QualityGate, TranslatedQuestion};

/// Gate results for one target language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationReport {
    pub language: Language,
    pub passed: usize,
    pub failed: usize,
    /// Failure count per gate failure kind
    pub failures: BTreeMap<String, usize>,
    pub mean_fidelity: Option<f64>,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub reports: Vec<TranslationReport>,
    pub log_path: PathBuf,
}

fn failure_kind(result: &TranslatedQuestion) -> Option<String> {
    let reason = result.verdict.failure()?;
    let value = serde_json::to_value(reason).ok()?;
    value
        .get("kind")
        .and_then(|k| k.as_str())
        .map(|k| k.to_string())
}

/// Run every source question through the gate for each target language.
///
/// Writes `questions_<lang>_<ts>.jsonl` with the passing translations and a
/// `translation_log_<ts>.jsonl` with every outcome, including its score.
pub async fn translate_corpus(
    gate: Arc<QualityGate>,
    questions: &[Question],
    targets: &[Language],
    parallel: usize,
    output_dir: &Path,
    timestamp: &str,
) -> PipelineResult<TranslationOutcome> {
    std::fs::create_dir_all(output_dir)?;
    let semaphore = Arc::new(Semaphore::new(parallel.max(1)));
    let mut reports = Vec::new();

    // Each language's outcomes are logged as soon as its batch finishes
    let log_path = output_dir.join(format!("translation_log_{}.jsonl", timestamp));
    write_jsonl(&log_path, &Vec::<TranslatedQuestion>::new())?;

    for target in targets {
        tracing::info!(
            "Translating {} questions into {} (threshold {:.2})",
            questions.len(),
            target,
            gate.threshold()
        );

        let mut handles = Vec::with_capacity(questions.len());
        for question in questions {
            let gate = Arc::clone(&gate);
            let semaphore = Arc::clone(&semaphore);
            let question = question.clone();
            let target = target.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok();
                gate.translate_and_validate(&question, &target).await
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!("Translation task panicked: {}", e),
            }
        }

        let passing: Vec<TranslatedQuestion> =
            results.iter().filter(|r| r.is_usable()).cloned().collect();
        let mut failures = BTreeMap::new();
        for kind in results.iter().filter_map(failure_kind) {
            *failures.entry(kind).or_insert(0) += 1;
        }
        let scores: Vec<f64> = passing.iter().filter_map(|r| r.fidelity).collect();
        let mean_fidelity =
            (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64);

        append_jsonl(&log_path, &results)?;

        let output = output_dir.join(format!("{}{}.jsonl", questions_prefix(target), timestamp));
        write_jsonl(&output, &passing)?;

        let report = TranslationReport {
            language: target.clone(),
            passed: passing.len(),
            failed: results.len() - passing.len(),
            failures,
            mean_fidelity,
            output,
        };
        tracing::info!(
            "{}: {} passed / {} failed",
            target,
            report.passed,
            report.failed
        );
        reports.push(report);
    }

    Ok(TranslationOutcome { reports, log_path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{read_jsonl, QuestionCategory};
    use crate::test_support::{BagOfWordsEmbedder, ScriptedTranslator};

    fn lang(tag: &str) -> Language {
        tag.parse().unwrap()
    }

    #[tokio::test]
    async fn test_failed_translation_is_excluded_and_logged() {
        let dir = tempfile::tempdir().unwrap();
        let good = Question::new(
            "FA-001",
            QuestionCategory::FactualRecall,
            "What is the capital of Germany?",
            "Berlin",
        );
        let bad = Question::new(
            "PR-003",
            QuestionCategory::ProceduralReasoning,
            "A train travels 120 km in 2 hours. What is its average speed?",
            "60",
        );

        let german_bad = "Ein Zug fährt schnell.";
        let back_bad = "A train goes fast.";
        let translator = ScriptedTranslator::new()
            .with(&good.text, "de", "Was ist die Hauptstadt von Deutschland?")
            .with("Was ist die Hauptstadt von Deutschland?", "en", &good.text)
            .with(&bad.text, "de", german_bad)
            .with(german_bad, "en", back_bad);
        let embedder = BagOfWordsEmbedder::new()
            .with_override(&bad.text, vec![1.0, 0.0])
            .with_override(back_bad, vec![0.62, (1.0f32 - 0.62 * 0.62).sqrt()]);
        let gate = Arc::new(QualityGate::new(Arc::new(translator), Arc::new(embedder), 0.85));

        let outcome = translate_corpus(
            gate,
            &[good, bad],
            &[lang("de")],
            2,
            dir.path(),
            "20240101_000000",
        )
        .await
        .unwrap();

        let report = &outcome.reports[0];
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.get("below-threshold"), Some(&1));

        let passing: Vec<TranslatedQuestion> = read_jsonl(&report.output).unwrap();
        assert_eq!(passing.len(), 1);
        assert_eq!(passing[0].id(), "FA-001");
        assert_eq!(passing[0].question.text, "Was ist die Hauptstadt von Deutschland?");

        let log: Vec<TranslatedQuestion> = read_jsonl(&outcome.log_path).unwrap();
        assert_eq!(log.len(), 2);
        let rejected = log.iter().find(|t| t.id() == "PR-003").unwrap();
        assert!(!rejected.is_usable());
        assert!((rejected.fidelity.unwrap() - 0.62).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_gate_log_survives_later_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let timestamp = "20240101_000000";
        let question = Question::new(
            "FA-001",
            QuestionCategory::FactualRecall,
            "What is the capital of Germany?",
            "Berlin",
        );
        // Output for the second language already exists and must not be replaced
        std::fs::write(
            dir.path().join(format!("{}{}.jsonl", questions_prefix(&lang("es")), timestamp)),
            "",
        )
        .unwrap();

        let gate = Arc::new(QualityGate::new(
            Arc::new(ScriptedTranslator::new()),
            Arc::new(BagOfWordsEmbedder::new()),
            0.85,
        ));
        let result = translate_corpus(
            gate,
            &[question],
            &[lang("de"), lang("es")],
            1,
            dir.path(),
            timestamp,
        )
        .await;
        assert!(result.is_err());

        let log_path = dir.path().join(format!("translation_log_{}.jsonl", timestamp));
        let log: Vec<TranslatedQuestion> = read_jsonl(&log_path).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log.iter().any(|t| t.language() == &lang("de")));

        let german: Vec<TranslatedQuestion> = read_jsonl(
            dir.path()
                .join(format!("{}{}.jsonl", questions_prefix(&lang("de")), timestamp)),
        )
        .unwrap();
        assert_eq!(german.len(), 1);
    }
}
