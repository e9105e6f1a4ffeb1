//! Async executor that queries models for every (question, language, model) triple

use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::BenchmarkConfig;
use crate::corpus::Question;
use crate::providers::{
    CompletionRequest, CompletionResponse, ModelQueryError, ModelTarget,
};
use crate::runner::retry::RetryPolicy;
use crate::store::{AttemptLedger, RecordOutcome, RecordSink, ResponseRecord, StoreError};

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum requests in flight across all models
    pub parallel_requests: usize,
    pub retry: RetryPolicy,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&BenchmarkConfig::default())
    }
}

impl From<&BenchmarkConfig> for ExecutorConfig {
    fn from(config: &BenchmarkConfig) -> Self {
        Self {
            parallel_requests: config.parallel_requests.max(1),
            retry: config.retry_policy(),
            timeout_ms: config.timeout_ms,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// One model query: a question already rendered in its target language
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub question: Question,
    pub target: ModelTarget,
}

impl QueryJob {
    pub fn new(question: Question, target: ModelTarget) -> Self {
        Self { question, target }
    }
}

/// Counts for one executor run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs whose record could not be written
    pub unrecorded: usize,
}

/// Executor for model queries
pub struct Executor {
    config: ExecutorConfig,
    run_id: String,
    sink: Arc<dyn RecordSink>,
    ledger: Arc<Mutex<AttemptLedger>>,
    semaphore: Arc<Semaphore>,
    progress: Arc<dyn ProgressCallback>,
    completed: Arc<AtomicUsize>,
}

impl Executor {
    /// Create an executor appending to `sink`; `ledger` should reflect the
    /// records already in the sink so reruns get fresh attempt numbers.
    pub fn new(
        config: ExecutorConfig,
        run_id: impl Into<String>,
        sink: Arc<dyn RecordSink>,
        ledger: AttemptLedger,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.parallel_requests.max(1)));
        Self {
            config,
            run_id: run_id.into(),
            sink,
            ledger: Arc::new(Mutex::new(ledger)),
            semaphore,
            progress: Arc::new(NoOpProgress),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Query one model for one question and persist the outcome.
    ///
    /// Transient errors are retried per the retry policy; once retries run
    /// out the attempt is recorded as failed.
    pub async fn execute_job(&self, job: &QueryJob) -> Result<ResponseRecord, StoreError> {
        let _permit = self.semaphore.acquire().await.ok();

        let question = &job.question;
        let target = &job.target;
        let attempt = self
            .ledger
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .next_attempt(&question.id, &question.language, &target.id);

        self.progress
            .on_query_start(&question.id, question.language.as_str(), &target.id);

        let prompt = question.prompt();
        let label = format!("{} [{}] on {}", question.id, question.language, target.id);
        let outcome = match self
            .config
            .retry
            .run(&label, || self.try_query(&prompt, target))
            .await
        {
            Ok(response) => RecordOutcome::Response {
                text: response.content,
                latency_ms: response.latency_ms,
            },
            Err(e) => {
                tracing::warn!("Query failed for {}: {}", label, e);
                RecordOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        let record = ResponseRecord {
            question_id: question.id.clone(),
            language: question.language.clone(),
            model: target.id.clone(),
            attempt,
            run_id: self.run_id.clone(),
            prompt,
            timestamp: Utc::now(),
            outcome,
        };
        self.sink.append(&record)?;

        self.progress.on_query_complete(
            &question.id,
            question.language.as_str(),
            &target.id,
            !record.is_failed(),
        );

        Ok(record)
    }

    /// Single attempt with the configured timeout
    async fn try_query(
        &self,
        prompt: &str,
        target: &ModelTarget,
    ) -> Result<CompletionResponse, ModelQueryError> {
        let mut request = CompletionRequest::prompt(prompt).with_model(&target.model);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(system) = &self.config.system_prompt {
            request = request.with_system(system);
        }

        let timeout = Duration::from_millis(self.config.timeout_ms);
        match tokio::time::timeout(timeout, target.provider.complete(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ModelQueryError::Timeout {
                timeout_ms: self.config.timeout_ms,
            }),
        }
    }

    /// Execute all jobs in parallel, bounded by `parallel_requests`
    pub async fn execute_all(&self, jobs: Vec<QueryJob>) -> RunSummary {
        let total = jobs.len();
        let mut handles = Vec::with_capacity(total);

        for job in jobs {
            let executor = self.clone_for_task();
            handles.push(tokio::spawn(async move {
                let result = executor.execute_job(&job).await;
                let done = executor.completed.fetch_add(1, Ordering::SeqCst) + 1;
                executor.progress.on_progress(done, total);
                result
            }));
        }

        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Ok(record)) if record.is_failed() => summary.failed += 1,
                Ok(Ok(_)) => summary.succeeded += 1,
                Ok(Err(e)) => {
                    tracing::error!("Could not record query result: {}", e);
                    summary.unrecorded += 1;
                }
                Err(e) => {
                    tracing::error!("Query task panicked: {}", e);
                    summary.unrecorded += 1;
                }
            }
        }

        summary
    }

    /// Clone the executor for spawning tasks
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            run_id: self.run_id.clone(),
            sink: Arc::clone(&self.sink),
            ledger: Arc::clone(&self.ledger),
            semaphore: Arc::clone(&self.semaphore),
            progress: Arc::clone(&self.progress),
            completed: Arc::clone(&self.completed),
        }
    }
}

/// Progress callback for tracking execution
pub trait ProgressCallback: Send + Sync {
    fn on_query_start(&self, question_id: &str, language: &str, model: &str);
    fn on_query_complete(&self, question_id: &str, language: &str, model: &str, success: bool);
    fn on_progress(&self, completed: usize, total: usize);
}

/// Default no-op progress callback
pub struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_query_start(&self, _question_id: &str, _language: &str, _model: &str) {}
    fn on_query_complete(&self, _question_id: &str, _language: &str, _model: &str, _success: bool) {}
    fn on_progress(&self, _completed: usize, _total: usize) {}
}

/// Console progress callback
pub struct ConsoleProgress;

impl ProgressCallback for ConsoleProgress {
    fn on_query_start(&self, question_id: &str, language: &str, model: &str) {
        tracing::debug!("Starting {} [{}] on {}", question_id, language, model);
    }

    fn on_query_complete(&self, question_id: &str, language: &str, model: &str, success: bool) {
        let status = if success { "OK" } else { "FAILED" };
        println!("  {} {} [{}] on {}", status, question_id, language, model);
    }

    fn on_progress(&self, completed: usize, total: usize) {
        if completed == total || completed % 10 == 0 {
            println!("Progress: {}/{} queries complete", completed, total);
        }
    }
}
