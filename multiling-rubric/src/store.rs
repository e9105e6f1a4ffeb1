//! Append-only record store for raw model responses
//!
//! Every query attempt, successful or not, is written exactly once. Reruns
//! take fresh attempt numbers from the [`AttemptLedger`] so nothing is ever
//! overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::corpus::{read_jsonl, Language, LoadError};

/// Error types for the record store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Record sink poisoned")]
    Poisoned,
}

/// Identity of one query attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub question_id: String,
    pub language: Language,
    pub model: String,
    pub attempt: u32,
}

/// A successful model response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub question_id: String,
    pub language: Language,
    pub model: String,
    pub attempt: u32,
    pub run_id: String,
    pub prompt: String,
    pub raw_text: String,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ModelResponse {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            question_id: self.question_id.clone(),
            language: self.language.clone(),
            model: self.model.clone(),
            attempt: self.attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordOutcome {
    Response { text: String, latency_ms: u64 },
    Failed { error: String },
}

/// One line of the raw results file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub question_id: String,
    pub language: Language,
    pub model: String,
    pub attempt: u32,
    pub run_id: String,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: RecordOutcome,
}

impl ResponseRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            question_id: self.question_id.clone(),
            language: self.language.clone(),
            model: self.model.clone(),
            attempt: self.attempt,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, RecordOutcome::Failed { .. })
    }

    /// The scorable response, or `None` for a failed attempt
    pub fn to_response(&self) -> Option<ModelResponse> {
        match &self.outcome {
            RecordOutcome::Response { text, latency_ms } => Some(ModelResponse {
                question_id: self.question_id.clone(),
                language: self.language.clone(),
                model: self.model.clone(),
                attempt: self.attempt,
                run_id: self.run_id.clone(),
                prompt: self.prompt.clone(),
                raw_text: text.clone(),
                latency_ms: *latency_ms,
                timestamp: self.timestamp,
            }),
            RecordOutcome::Failed { .. } => None,
        }
    }
}

impl From<ModelResponse> for ResponseRecord {
    fn from(response: ModelResponse) -> Self {
        Self {
            question_id: response.question_id,
            language: response.language,
            model: response.model,
            attempt: response.attempt,
            run_id: response.run_id,
            prompt: response.prompt,
            timestamp: response.timestamp,
            outcome: RecordOutcome::Response {
                text: response.raw_text,
                latency_ms: response.latency_ms,
            },
        }
    }
}

/// Next attempt number per (question, language, model)
#[derive(Debug, Clone, Default)]
pub struct AttemptLedger {
    last: HashMap<(String, Language, String), u32>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ResponseRecord>) -> Self {
        let mut ledger = Self::new();
        for r in records {
            let entry = ledger
                .last
                .entry((r.question_id.clone(), r.language.clone(), r.model.clone()))
                .or_insert(0);
            *entry = (*entry).max(r.attempt);
        }
        ledger
    }

    /// Reserve the next attempt number (1-based)
    pub fn next_attempt(&mut self, question_id: &str, language: &Language, model: &str) -> u32 {
        let entry = self
            .last
            .entry((question_id.to_string(), language.clone(), model.to_string()))
            .or_insert(0);
        *entry += 1;
        *entry
    }
}

/// Destination for response records
pub trait RecordSink: Send + Sync {
    fn append(&self, record: &ResponseRecord) -> Result<(), StoreError>;
}

/// JSON Lines file opened in append mode
pub struct JsonlRecordStore {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlRecordStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonlRecordStore {
    fn append(&self, record: &ResponseRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Collects records in memory
#[derive(Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<ResponseRecord>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ResponseRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl RecordSink for MemoryRecordSink {
    fn append(&self, record: &ResponseRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(record.clone());
        Ok(())
    }
}

/// Load every record of a raw results file, skipping corrupted lines
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<ResponseRecord>, StoreError> {
    Ok(read_jsonl(path)?)
}

/// The latest successful attempt per (question, language, model)
pub fn latest_responses(records: &[ResponseRecord]) -> Vec<ModelResponse> {
    let mut latest: HashMap<(String, Language, String), &ResponseRecord> = HashMap::new();
    for r in records.iter().filter(|r| !r.is_failed()) {
        let slot = latest
            .entry((r.question_id.clone(), r.language.clone(), r.model.clone()))
            .or_insert(r);
        if r.attempt > slot.attempt {
            *slot = r;
        }
    }

    let mut responses: Vec<ModelResponse> =
        latest.values().filter_map(|r| r.to_response()).collect();
    responses.sort_by_key(|r| r.key());
    responses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(qid: &str, lang: &str, attempt: u32, outcome: RecordOutcome) -> ResponseRecord {
        ResponseRecord {
            question_id: qid.to_string(),
            language: lang.parse().unwrap(),
            model: "llama3".to_string(),
            attempt,
            run_id: "run-1".to_string(),
            prompt: "prompt".to_string(),
            timestamp: Utc::now(),
            outcome,
        }
    }

    fn ok(text: &str) -> RecordOutcome {
        RecordOutcome::Response {
            text: text.to_string(),
            latency_ms: 12,
        }
    }

    fn failed() -> RecordOutcome {
        RecordOutcome::Failed {
            error: "timeout".to_string(),
        }
    }

    #[test]
    fn test_record_serialization_shape() {
        let json = serde_json::to_value(record("Q1", "de", 1, failed())).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "timeout");
        assert_eq!(json["language"], "de");

        let json = serde_json::to_value(record("Q1", "de", 2, ok("42"))).unwrap();
        assert_eq!(json["status"], "response");
        assert_eq!(json["text"], "42");
    }

    #[test]
    fn test_ledger_continues_after_existing_attempts() {
        let existing = vec![
            record("Q1", "en", 1, ok("a")),
            record("Q1", "en", 2, failed()),
            record("Q2", "en", 1, ok("b")),
        ];
        let mut ledger = AttemptLedger::from_records(&existing);
        let en: Language = "en".parse().unwrap();
        let de: Language = "de".parse().unwrap();

        assert_eq!(ledger.next_attempt("Q1", &en, "llama3"), 3);
        assert_eq!(ledger.next_attempt("Q1", &en, "llama3"), 4);
        assert_eq!(ledger.next_attempt("Q1", &de, "llama3"), 1);
        assert_eq!(ledger.next_attempt("Q2", &en, "other"), 1);
    }

    #[test]
    fn test_latest_successful_attempt_wins() {
        let records = vec![
            record("Q1", "en", 1, ok("first")),
            record("Q1", "en", 2, ok("second")),
            record("Q1", "en", 3, failed()),
            record("Q2", "en", 1, failed()),
        ];
        let latest = latest_responses(&records);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].raw_text, "second");
        assert_eq!(latest[0].attempt, 2);
    }

    #[test]
    fn test_jsonl_store_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw_results.jsonl");

        {
            let store = JsonlRecordStore::open(&path).unwrap();
            store.append(&record("Q1", "en", 1, ok("a"))).unwrap();
        }
        {
            let store = JsonlRecordStore::open(&path).unwrap();
            store.append(&record("Q1", "en", 2, failed())).unwrap();
        }

        let loaded = load_records(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(!loaded[0].is_failed());
        assert!(loaded[1].is_failed());
        assert!(loaded[1].to_response().is_none());
    }
}
