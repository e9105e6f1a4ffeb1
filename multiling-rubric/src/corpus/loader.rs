//! Corpus loading from TSV and JSON Lines files

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Language, Question, QuestionCategory};

/// Error type for corpus loading
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("Duplicate question id: {0}")]
    DuplicateId(String),
}

/// A row of the human-edited master corpus
#[derive(Debug, Deserialize)]
struct CorpusRow {
    #[serde(alias = "question_id")]
    id: String,
    #[serde(alias = "domain")]
    category: String,
    #[serde(alias = "question_text_english", alias = "question_text")]
    text: String,
    #[serde(default)]
    choices: Option<String>,
    #[serde(default, alias = "canonical_answer", alias = "correct_answer")]
    answer: Option<String>,
    #[serde(default, alias = "gold_standard_reasoning")]
    gold_reasoning: Option<String>,
    #[serde(default, alias = "answer_format_regex")]
    answer_pattern: Option<String>,
    #[serde(default)]
    language: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl CorpusRow {
    fn into_question(self, row: usize) -> Result<Question, LoadError> {
        let invalid = |message: String| LoadError::InvalidRow { row, message };

        let category: QuestionCategory = self.category.parse().map_err(invalid)?;
        let answer = non_empty(self.answer).ok_or_else(|| invalid("missing answer".to_string()))?;
        let language: Language = match non_empty(self.language) {
            Some(tag) => tag.parse().map_err(invalid)?,
            None => super::default_language(),
        };
        let choices = non_empty(self.choices)
            .map(|c| {
                c.split('|')
                    .map(|choice| choice.trim().to_string())
                    .filter(|choice| !choice.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Question {
            id: self.id.trim().to_string(),
            category,
            text: self.text.trim().to_string(),
            choices,
            answer,
            gold_reasoning: non_empty(self.gold_reasoning),
            answer_pattern: non_empty(self.answer_pattern),
            language,
        })
    }
}

/// Load the master corpus from a tab-separated file with a header row
pub fn load_corpus_tsv(path: impl AsRef<Path>) -> Result<Vec<Question>, LoadError> {
    let file = File::open(path)?;
    parse_corpus_tsv(file)
}

/// Parse a tab-separated corpus from any reader
pub fn parse_corpus_tsv<R: Read>(reader: R) -> Result<Vec<Question>, LoadError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .quoting(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut questions = Vec::new();
    for (idx, record) in rdr.deserialize::<CorpusRow>().enumerate() {
        // Header is line 1
        let row = idx + 2;
        questions.push(record?.into_question(row)?);
    }

    ensure_unique_ids(&questions)?;
    Ok(questions)
}

/// Load a JSON Lines corpus and check id uniqueness
pub fn load_corpus(path: impl AsRef<Path>) -> Result<Vec<Question>, LoadError> {
    let questions: Vec<Question> = read_jsonl(path)?;
    ensure_unique_ids(&questions)?;
    Ok(questions)
}

fn ensure_unique_ids(questions: &[Question]) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for q in questions {
        if !seen.insert(q.id.as_str()) {
            return Err(LoadError::DuplicateId(q.id.clone()));
        }
    }
    Ok(())
}

/// Read a JSON Lines file, skipping blank and corrupted lines
pub fn read_jsonl<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>, LoadError> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(
                    "Skipping corrupted line {} in {}: {}",
                    idx + 1,
                    path.display(),
                    e
                );
            }
        }
    }

    Ok(items)
}

/// Write items as JSON Lines to a new file; an existing file is never replaced
pub fn write_jsonl<T: Serialize>(path: impl AsRef<Path>, items: &[T]) -> Result<(), LoadError> {
    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Append items to an existing JSON Lines file
pub fn append_jsonl<T: Serialize>(path: impl AsRef<Path>, items: &[T]) -> Result<(), LoadError> {
    let file = OpenOptions::new().append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for item in items {
        serde_json::to_writer(&mut writer, item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Most recent `<prefix>*.<extension>` file in `dir`.
///
/// Output files carry sortable UTC timestamps, so the greatest name wins.
pub fn latest_file(dir: impl AsRef<Path>, prefix: &str, extension: &str) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let ext_ok = path.extension().and_then(|e| e.to_str()) == Some(extension);
            let name_ok = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix))
                .unwrap_or(false);
            ext_ok && name_ok
        })
        .max_by(|a, b| a.file_name().cmp(&b.file_name()))
}
