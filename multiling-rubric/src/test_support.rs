//! Deterministic fakes for unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::corpus::Language;
use crate::embedding::{Embedding, EmbeddingProvider, EmbeddingResult, EmbeddingServiceError};
use crate::providers::{
    CompletionRequest, CompletionResponse, ModelProvider, ModelQueryError, ProviderResult,
};
use crate::store::ModelResponse;
use crate::translation::{TranslationProvider, TranslationResult, TranslationServiceError};

const DIMENSIONS: usize = 64;

/// Hashed bag-of-words embedder: texts sharing words get similar vectors
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    overrides: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `vector` for exactly `text`
    pub fn with_override(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    /// Fail with a server error for exactly `text`
    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing.insert(text.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    fn model(&self) -> &str {
        "bag-of-words"
    }

    async fn embed(&self, text: &str) -> EmbeddingResult<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.failing.contains(text) {
            return Err(EmbeddingServiceError::Api {
                status: 503,
                message: "embedding backend down".to_string(),
            });
        }
        if let Some(vector) = self.overrides.get(text) {
            return Ok(Embedding::new(vector.clone()));
        }

        let mut vector = vec![0.0f32; DIMENSIONS];
        let lower = text.to_lowercase();
        for word in lower.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            vector[(fnv1a(word) % DIMENSIONS as u64) as usize] += 1.0;
        }
        Ok(Embedding::new(vector))
    }
}

/// Translator with canned outputs; unscripted text is echoed back
#[derive(Default)]
pub struct ScriptedTranslator {
    outputs: HashMap<(String, String), Result<String, String>>,
}

impl ScriptedTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, target: &str, output: &str) -> Self {
        self.outputs
            .insert((text.to_string(), target.to_string()), Ok(output.to_string()));
        self
    }

    pub fn failing(mut self, text: &str, target: &str, message: &str) -> Self {
        self.outputs
            .insert((text.to_string(), target.to_string()), Err(message.to_string()));
        self
    }
}

#[async_trait]
impl TranslationProvider for ScriptedTranslator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn translate(
        &self,
        text: &str,
        _source: &Language,
        target: &Language,
    ) -> TranslationResult<String> {
        match self
            .outputs
            .get(&(text.to_string(), target.as_str().to_string()))
        {
            Some(Ok(output)) => Ok(output.clone()),
            Some(Err(message)) => Err(TranslationServiceError::Api {
                status: 400,
                message: message.clone(),
            }),
            None => Ok(text.to_string()),
        }
    }
}

/// Model that replays queued failures, then answers with a fixed reply
pub struct ScriptedModel {
    reply: String,
    queued: Mutex<VecDeque<ModelQueryError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    last_model: Mutex<Option<String>>,
}

impl ScriptedModel {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            queued: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            last_model: Mutex::new(None),
        }
    }

    pub fn then_fail(self, error: ModelQueryError) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(error);
        }
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_model(&self) -> Option<String> {
        self.last_model.lock().ok().and_then(|m| m.clone())
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> ProviderResult<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_model.lock() {
            *last = request.model.clone();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(error) = queued {
            return Err(error);
        }
        Ok(CompletionResponse {
            content: self.reply.clone(),
            model: request.model.clone().unwrap_or_else(|| "scripted".to_string()),
            latency_ms: 0,
        })
    }
}

/// First-attempt response with a fixed timestamp
pub fn model_response(question_id: &str, language: &str, text: &str) -> ModelResponse {
    ModelResponse {
        question_id: question_id.to_string(),
        language: language.parse().unwrap(),
        model: "test-model".to_string(),
        attempt: 1,
        run_id: "run-test".to_string(),
        prompt: String::new(),
        raw_text: text.to_string(),
        latency_ms: 10,
        timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
    }
}
