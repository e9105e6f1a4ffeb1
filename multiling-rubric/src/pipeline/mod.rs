//! Batch stages: corpus build, translation, model queries and scoring
//!
//! Every stage writes new timestamped files and reads the latest output of
//! the stage before it.

pub mod score;
pub mod translate;

pub use score::{
    score_records, write_scoring_outputs, Exclusion, ExclusionReason, ExclusionSummary,
    IncompleteItem, ScoringOutcome,
};
pub use translate::{translate_corpus, TranslationOutcome, TranslationReport};

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::corpus::{
    latest_file, load_corpus, load_corpus_tsv, read_jsonl, write_jsonl, Language, LoadError,
    Question,
};
use crate::providers::ModelTarget;
use crate::runner::QueryJob;
use crate::scoring::ScoreError;
use crate::store::{load_records, AttemptLedger, JsonlRecordStore, StoreError};
use crate::translation::TranslatedQuestion;

pub const CORPUS_PREFIX: &str = "corpus_";
pub const RAW_RESULTS_PREFIX: &str = "raw_results_";
pub const SCORED_PREFIX: &str = "scored_";

/// Errors that stop a whole stage
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scoring error: {0}")]
    Score(#[from] ScoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No {0} found; run the previous stage first")]
    MissingInput(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Sortable UTC timestamp used in output file names
pub fn timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

/// File-name prefix of the validated question set for `language`
pub fn questions_prefix(language: &Language) -> String {
    format!("questions_{}_", language)
}

/// Convert the TSV master corpus into `corpus_<ts>.jsonl`
pub fn build_corpus(tsv: &Path, output_dir: &Path, timestamp: &str) -> PipelineResult<(PathBuf, usize)> {
    let questions = load_corpus_tsv(tsv)?;
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(format!("{}{}.jsonl", CORPUS_PREFIX, timestamp));
    write_jsonl(&path, &questions)?;
    tracing::info!("Wrote {} questions to {}", questions.len(), path.display());
    Ok((path, questions.len()))
}

/// Explicit corpus file (TSV or JSONL), or the latest `corpus_*.jsonl` in `output_dir`
pub fn load_master_corpus(explicit: Option<&Path>, output_dir: &Path) -> PipelineResult<Vec<Question>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => latest_file(output_dir, CORPUS_PREFIX, "jsonl")
            .ok_or_else(|| PipelineError::MissingInput("corpus file".to_string()))?,
    };
    tracing::info!("Loading corpus from {}", path.display());
    let is_tsv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"));
    if is_tsv {
        Ok(load_corpus_tsv(&path)?)
    } else {
        Ok(load_corpus(&path)?)
    }
}

/// Usable question sets per language: identity for the source language,
/// the latest validated translation file for every target.
///
/// A target without a translation file is skipped with a warning.
pub fn load_question_sets(
    corpus: &[Question],
    source: &Language,
    targets: &[Language],
    output_dir: &Path,
) -> PipelineResult<Vec<TranslatedQuestion>> {
    let mut sets: Vec<TranslatedQuestion> = corpus
        .iter()
        .filter(|q| q.language == *source)
        .map(TranslatedQuestion::identity)
        .collect();

    for target in targets {
        let Some(path) = latest_file(output_dir, &questions_prefix(target), "jsonl") else {
            tracing::warn!("No validated question set for {}; skipping", target);
            continue;
        };
        let loaded: Vec<TranslatedQuestion> = read_jsonl(&path)?;
        let usable: Vec<TranslatedQuestion> = loaded
            .into_iter()
            .filter(|t| t.is_usable() && t.language() == target)
            .collect();
        tracing::info!("Loaded {} {} questions from {}", usable.len(), target, path.display());
        sets.extend(usable);
    }

    Ok(sets)
}

/// Index translations by (question id, language)
pub fn index_translations(
    sets: Vec<TranslatedQuestion>,
) -> HashMap<(String, Language), TranslatedQuestion> {
    sets.into_iter()
        .map(|t| ((t.id().to_string(), t.language().clone()), t))
        .collect()
}

/// One job per (question, language, model)
pub fn query_jobs(sets: &[TranslatedQuestion], targets: &[ModelTarget]) -> Vec<QueryJob> {
    sets.iter()
        .filter(|t| t.is_usable())
        .flat_map(|t| {
            targets
                .iter()
                .map(move |target| QueryJob::new(t.question.clone(), target.clone()))
        })
        .collect()
}

/// Open the raw results file for appending, along with its attempt ledger.
///
/// Reuses the latest `raw_results_*.jsonl` unless `fresh` is set.
pub fn open_results_store(
    output_dir: &Path,
    timestamp: &str,
    fresh: bool,
) -> PipelineResult<(JsonlRecordStore, AttemptLedger)> {
    std::fs::create_dir_all(output_dir)?;
    let existing = if fresh {
        None
    } else {
        latest_file(output_dir, RAW_RESULTS_PREFIX, "jsonl")
    };

    match existing {
        Some(path) => {
            let records = load_records(&path)?;
            tracing::info!(
                "Appending to {} ({} existing records)",
                path.display(),
                records.len()
            );
            let ledger = AttemptLedger::from_records(&records);
            Ok((JsonlRecordStore::open(&path)?, ledger))
        }
        None => {
            let path = output_dir.join(format!("{}{}.jsonl", RAW_RESULTS_PREFIX, timestamp));
            tracing::info!("Writing results to {}", path.display());
            Ok((JsonlRecordStore::open(&path)?, AttemptLedger::new()))
        }
    }
}

/// Explicit results file, or the latest `<prefix>*.jsonl` in `output_dir`
pub fn resolve_input(explicit: Option<&Path>, output_dir: &Path, prefix: &str) -> PipelineResult<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => latest_file(output_dir, prefix, "jsonl")
            .ok_or_else(|| PipelineError::MissingInput(format!("{}*.jsonl file", prefix))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::QuestionCategory;
    use crate::providers::ModelProvider;
    use crate::test_support::ScriptedModel;
    use crate::translation::{GateFailure, GateVerdict};
    use std::sync::Arc;

    fn lang(tag: &str) -> Language {
        tag.parse().unwrap()
    }

    fn corpus() -> Vec<Question> {
        vec![
            Question::new("FA-001", QuestionCategory::FactualRecall, "Capital of Germany?", "Berlin"),
            Question::new("FA-002", QuestionCategory::FactualRecall, "Capital of Spain?", "Madrid"),
        ]
    }

    #[test]
    fn test_timestamp_is_sortable() {
        let ts = timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "_");
    }

    #[test]
    fn test_build_corpus_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let tsv = dir.path().join("master.tsv");
        std::fs::write(
            &tsv,
            "question_id\tdomain\tquestion_text_english\tanswer\nFA-001\tFactual Accuracy\tCapital of Germany?\tBerlin\n",
        )
        .unwrap();

        let (path, count) = build_corpus(&tsv, dir.path(), "20240101_000000").unwrap();
        assert_eq!(count, 1);
        assert!(path.ends_with("corpus_20240101_000000.jsonl"));
        assert!(build_corpus(&tsv, dir.path(), "20240101_000000").is_err());

        let loaded = load_master_corpus(None, dir.path()).unwrap();
        assert_eq!(loaded[0].id, "FA-001");
    }

    #[test]
    fn test_missing_corpus_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_master_corpus(None, dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn test_question_sets_use_only_passing_translations() {
        let dir = tempfile::tempdir().unwrap();
        let questions = corpus();
        let passed = TranslatedQuestion {
            question: questions[0].localized(lang("de"), "Hauptstadt von Deutschland?"),
            source_language: lang("en"),
            source_text: questions[0].text.clone(),
            back_translation: Some("Capital of Germany?".to_string()),
            fidelity: Some(0.97),
            verdict: GateVerdict::Pass,
        };
        let failed = TranslatedQuestion {
            question: questions[1].localized(lang("de"), "Spanien?"),
            fidelity: Some(0.62),
            verdict: GateVerdict::Fail {
                reason: GateFailure::BelowThreshold {
                    score: 0.62,
                    threshold: 0.85,
                },
            },
            ..passed.clone()
        };
        write_jsonl(
            dir.path().join("questions_de_20240101_000000.jsonl"),
            &[passed, failed],
        )
        .unwrap();

        let sets = load_question_sets(&questions, &lang("en"), &[lang("de"), lang("es")], dir.path())
            .unwrap();

        assert_eq!(sets.len(), 3);
        let german: Vec<&str> = sets
            .iter()
            .filter(|t| t.language().as_str() == "de")
            .map(|t| t.id())
            .collect();
        assert_eq!(german, vec!["FA-001"]);
    }

    #[test]
    fn test_query_jobs_cover_every_model() {
        let sets: Vec<TranslatedQuestion> = corpus().iter().map(TranslatedQuestion::identity).collect();
        let provider: Arc<dyn ModelProvider> = Arc::new(ScriptedModel::new("Berlin"));
        let targets = vec![
            ModelTarget {
                id: "a".to_string(),
                model: "a".to_string(),
                provider: Arc::clone(&provider),
            },
            ModelTarget {
                id: "b".to_string(),
                model: "b".to_string(),
                provider,
            },
        ];

        let jobs = query_jobs(&sets, &targets);
        assert_eq!(jobs.len(), 4);
    }

    #[test]
    fn test_results_store_appends_to_latest_file() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = open_results_store(dir.path(), "20240101_000000", false).unwrap();
        let first_path = first.path().to_path_buf();
        drop(first);

        let (second, _) = open_results_store(dir.path(), "20240102_000000", false).unwrap();
        assert_eq!(second.path(), first_path);

        let (third, _) = open_results_store(dir.path(), "20240103_000000", true).unwrap();
        assert!(third.path().ends_with("raw_results_20240103_000000.jsonl"));
    }
}
