//! Scripted provider for tests and local dry runs.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{ErrorKind, Generation, PromptContext, ProviderClient, ProviderError};
use crate::types::{GeneratedSample, TokenUsage};

/// Scripted outcome of one `generate` call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A valid sample with a fresh id
    Sample,
    /// A valid sample with a fixed id, for exercising duplicate handling
    SampleWithId(String),
    Error(ProviderError),
}

/// Record of a call made to the mock provider.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub model: String,
    pub topic: String,
    pub sample_type: String,
}

/// Mock provider returning queued responses per model in FIFO order.
///
/// When a model's queue is empty the call succeeds with a generated sample.
///
/// # Example
/// ```ignore
/// let mock = MockProviderClient::new("groq", &["model-a", "model-b"]);
/// mock.push_failure("model-a", ErrorKind::RateLimited);
/// // first call on model-a fails, every later call succeeds
/// ```
#[derive(Clone)]
pub struct MockProviderClient {
    name: String,
    models: Vec<String>,
    responses: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    latency: Duration,
    tokens_per_call: u32,
}

impl MockProviderClient {
    pub fn new(name: &str, models: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            responses: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
            tokens_per_call: 500,
        }
    }

    /// Delay every call by `latency` (uses tokio time, so paused-clock tests stay fast).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Token usage reported with every successful call.
    pub fn with_tokens_per_call(mut self, tokens: u32) -> Self {
        self.tokens_per_call = tokens;
        self
    }

    pub fn push_response(&self, model: &str, response: MockResponse) {
        self.responses
            .lock()
            .entry(model.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn push_success(&self, model: &str) {
        self.push_response(model, MockResponse::Sample);
    }

    pub fn push_failure(&self, model: &str, kind: ErrorKind) {
        let message = format!("scripted {kind:?} failure on {model}");
        self.push_response(model, MockResponse::Error(ProviderError::new(kind, message)));
    }

    /// Queue `count` identical failures.
    pub fn push_failures(&self, model: &str, kind: ErrorKind, count: usize) {
        for _ in 0..count {
            self.push_failure(model, kind);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn sample(&self, id: String, model: &str, context: &PromptContext) -> GeneratedSample {
        GeneratedSample {
            id,
            question: format!("What are the key principles of {}?", context.topic.topic),
            answer: "A scripted answer.".to_string(),
            topic: context.topic.key(),
            difficulty: context.topic.difficulty.to_string(),
            case_citation: "Scripted v Example [2024]".to_string(),
            reasoning: "Step 1: identify the issue.".to_string(),
            jurisdiction: context.jurisdiction.clone(),
            sample_type: context.sample_type.id.to_string(),
            batch_id: context.batch_id.clone(),
            provider: self.name.clone(),
            model: model.to_string(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ProviderClient for MockProviderClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[String] {
        &self.models
    }

    async fn generate(&self, model: &str, context: &PromptContext) -> Result<Generation, ProviderError> {
        self.calls.lock().push(MockCall {
            model: model.to_string(),
            topic: context.topic.topic.to_string(),
            sample_type: context.sample_type.id.to_string(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.responses.lock().get_mut(model).and_then(|queue| queue.pop_front());
        let id = match next.unwrap_or(MockResponse::Sample) {
            MockResponse::Sample => format!("{}_{}", self.name, Uuid::new_v4()),
            MockResponse::SampleWithId(id) => id,
            MockResponse::Error(err) => return Err(err),
        };

        Ok(Generation {
            sample: self.sample(id, model, context),
            usage: Some(TokenUsage {
                prompt_tokens: self.tokens_per_call / 4,
                completion_tokens: self.tokens_per_call - self.tokens_per_call / 4,
                total_tokens: self.tokens_per_call,
            }),
        })
    }
}
