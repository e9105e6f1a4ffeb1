//! Scoring a raw results file, with an explicit account of what was left out

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use super::{PipelineResult, SCORED_PREFIX};
use crate::corpus::{write_jsonl, Language, Question};
use crate::scoring::{CompositeScore, HybridScorer, ScoreError, ScoredResponse};
use crate::store::{latest_responses, RecordOutcome, ResponseRecord};
use crate::translation::TranslatedQuestion;

/// Why a response produced no scored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExclusionReason {
    /// Every attempt for the item failed
    FailedQuery,
    /// The question is not in the corpus
    MissingQuestion,
    /// No passing translation exists for the response's language
    UnvalidatedTranslation,
    ProvenanceMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub question_id: String,
    pub language: Language,
    pub model: String,
    pub attempt: u32,
    pub reason: ExclusionReason,
    pub detail: String,
}

/// A scored response whose composite could not be computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteItem {
    pub question_id: String,
    pub language: Language,
    pub model: String,
    pub attempt: u32,
    pub reason: String,
}

/// Items the pipeline could not judge, written next to the scored output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusionSummary {
    pub total_records: usize,
    pub scored: usize,
    pub excluded: Vec<Exclusion>,
    pub incomplete: Vec<IncompleteItem>,
    pub counts: BTreeMap<ExclusionReason, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ExclusionSummary {
    fn exclude(&mut self, exclusion: Exclusion) {
        tracing::warn!(
            "Excluding {} ({}, {}, attempt {}): {}",
            exclusion.question_id,
            exclusion.language,
            exclusion.model,
            exclusion.attempt,
            exclusion.detail
        );
        *self.counts.entry(exclusion.reason).or_insert(0) += 1;
        self.excluded.push(exclusion);
    }

    pub fn count(&self, reason: ExclusionReason) -> usize {
        self.counts.get(&reason).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ScoringOutcome {
    pub scored: Vec<ScoredResponse>,
    pub summary: ExclusionSummary,
}

fn reason_for(error: &ScoreError) -> ExclusionReason {
    match error {
        ScoreError::UnvalidatedTranslation { .. } => ExclusionReason::UnvalidatedTranslation,
        _ => ExclusionReason::ProvenanceMismatch,
    }
}

/// Score the latest successful attempt of every (question, language, model).
///
/// Items whose attempts all failed, or that lack a question or a validated
/// translation, are excluded and listed in the summary instead.
pub async fn score_records(
    scorer: &HybridScorer,
    questions: &HashMap<String, Question>,
    translations: &HashMap<(String, Language), TranslatedQuestion>,
    records: &[ResponseRecord],
) -> ScoringOutcome {
    let mut summary = ExclusionSummary {
        total_records: records.len(),
        ..ExclusionSummary::default()
    };
    let mut scored = Vec::new();

    let responses = latest_responses(records);
    let answered: HashSet<(String, Language, String)> = responses
        .iter()
        .map(|r| (r.question_id.clone(), r.language.clone(), r.model.clone()))
        .collect();

    // Items with no successful attempt, reported once with their last error
    let mut failed: BTreeMap<(String, Language, String), &ResponseRecord> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_failed()) {
        let key = (
            record.question_id.clone(),
            record.language.clone(),
            record.model.clone(),
        );
        if answered.contains(&key) {
            continue;
        }
        let slot = failed.entry(key).or_insert(record);
        if record.attempt > slot.attempt {
            *slot = record;
        }
    }
    for record in failed.values() {
        let detail = match &record.outcome {
            RecordOutcome::Failed { error } => error.clone(),
            RecordOutcome::Response { .. } => String::new(),
        };
        summary.exclude(Exclusion {
            question_id: record.question_id.clone(),
            language: record.language.clone(),
            model: record.model.clone(),
            attempt: record.attempt,
            reason: ExclusionReason::FailedQuery,
            detail,
        });
    }

    for response in &responses {
        let exclusion = |reason, detail: String| Exclusion {
            question_id: response.question_id.clone(),
            language: response.language.clone(),
            model: response.model.clone(),
            attempt: response.attempt,
            reason,
            detail,
        };

        let Some(question) = questions.get(&response.question_id) else {
            summary.exclude(exclusion(
                ExclusionReason::MissingQuestion,
                "question not found in corpus".to_string(),
            ));
            continue;
        };
        let key = (response.question_id.clone(), response.language.clone());
        let Some(translated) = translations.get(&key) else {
            summary.exclude(exclusion(
                ExclusionReason::UnvalidatedTranslation,
                format!("no validated {} translation", response.language),
            ));
            continue;
        };

        match scorer.score_response(question, response, translated).await {
            Ok(result) => {
                if let CompositeScore::Incomplete { reason } = &result.composite {
                    summary.incomplete.push(IncompleteItem {
                        question_id: result.question_id.clone(),
                        language: result.language.clone(),
                        model: result.model.clone(),
                        attempt: result.attempt,
                        reason: reason.clone(),
                    });
                }
                scored.push(result);
            }
            Err(e) => summary.exclude(exclusion(reason_for(&e), e.to_string())),
        }
    }

    summary.scored = scored.len();
    tracing::info!(
        "Scored {} responses; {} excluded, {} incomplete",
        summary.scored,
        summary.excluded.len(),
        summary.incomplete.len()
    );

    ScoringOutcome { scored, summary }
}

/// Write `scored_<ts>.jsonl` and `exclusions_<ts>.json`; neither may exist yet
pub fn write_scoring_outputs(
    outcome: &ScoringOutcome,
    output_dir: &Path,
    timestamp: &str,
) -> PipelineResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(output_dir)?;

    let scored_path = output_dir.join(format!("{}{}.jsonl", SCORED_PREFIX, timestamp));
    write_jsonl(&scored_path, &outcome.scored)?;

    let exclusions_path = output_dir.join(format!("exclusions_{}.json", timestamp));
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&exclusions_path)?;
    let mut writer = BufWriter::new(file);
    let summary = ExclusionSummary {
        created_at: Some(Utc::now()),
        ..outcome.summary.clone()
    };
    serde_json::to_writer_pretty(&mut writer, &summary)?;
    writer.flush()?;

    Ok((scored_path, exclusions_path))
}
