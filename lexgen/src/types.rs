use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::provider::ErrorKind;

/// Identifier of a generation batch.
///
/// Formatted as `batch_{unix_seconds}_{8 hex chars}` so ids sort roughly by start time and stay
/// readable in logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "batch_1760000000_1a2b3c4d")]
pub struct BatchId(String);

impl BatchId {
    /// Create a fresh id stamped with the current time.
    pub fn generate() -> Self {
        Self::generate_at(Utc::now())
    }

    pub fn generate_at(now: DateTime<Utc>) -> Self {
        let hex = format!("{:x}", Uuid::new_v4().as_u128());
        Self(format!("batch_{}_{}", now.timestamp(), &hex[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BatchId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for BatchId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a batch.
///
/// `Running` is the only non-terminal loop state. `Stuck` is never set by the worker: it is an
/// overlay the detector reports for a running batch that has not updated recently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Stopped,
    Failed,
    Stuck,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Stopped | BatchStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Stopped => "stopped",
            BatchStatus::Failed => "failed",
            BatchStatus::Stuck => "stuck",
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(BatchStatus::Running),
            "completed" => Ok(BatchStatus::Completed),
            "stopped" => Ok(BatchStatus::Stopped),
            "failed" => Ok(BatchStatus::Failed),
            "stuck" => Ok(BatchStatus::Stuck),
            other => Err(format!("unknown batch status '{other}'")),
        }
    }
}

/// Input to start a batch. Immutable once the batch is running.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BatchConfig {
    /// Number of samples this batch should generate
    pub target_count: u32,
    /// Starting model; defaults to the first entry of the fallback order
    #[serde(default)]
    pub model: Option<String>,
    /// Restrict generation to topics whose name or practice area matches
    #[serde(default, alias = "topic_filter")]
    pub topic: Option<String>,
    /// Restrict generation to one difficulty level
    #[serde(default, alias = "difficulty_filter")]
    pub difficulty: Option<String>,
    /// Extra reasoning requirements appended to every prompt
    #[serde(default)]
    pub reasoning_instruction: Option<String>,
    /// Pin a single sample type instead of rotating through the catalogue
    #[serde(default)]
    pub sample_type: Option<String>,
}

/// Why the worker moved off a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    ModelUnavailable,
    RateLimited,
    ConsecutiveFailures,
}

impl std::fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SwitchReason::ModelUnavailable => "model unavailable",
            SwitchReason::RateLimited => "rate limited",
            SwitchReason::ConsecutiveFailures => "consecutive failures",
        };
        f.write_str(text)
    }
}

/// One entry of a batch's append-only switch history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ModelSwitch {
    pub from_model: String,
    pub to_model: String,
    pub reason: SwitchReason,
    /// Generated count at the moment of the switch
    pub at_sample: u32,
    pub timestamp: DateTime<Utc>,
}

/// A recorded failure, kept in the bounded error log of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorEntry {
    pub message: String,
    /// Provider classification, absent for errors that did not come from a provider call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: None,
            model: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Topic circuit that is open: the topic is skipped until its recovery timeout passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OpenCircuit {
    pub topic: String,
    pub failures: u32,
    pub opened_for_seconds: u64,
}

/// Topic circuit letting trial requests through after its recovery timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HalfOpenCircuit {
    pub topic: String,
    pub successes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TopicFailures {
    pub topic: String,
    pub failures: u32,
}

/// Per-topic circuit breaker state of a batch, ordered by topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(default)]
pub struct CircuitBreakerSummary {
    pub open_circuits: Vec<OpenCircuit>,
    pub half_open_circuits: Vec<HalfOpenCircuit>,
    /// Closed circuits that have failed since their last success
    pub closed_with_failures: Vec<TopicFailures>,
}

/// The single mutable record of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchState {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub target_count: u32,
    pub generated_count: u32,
    pub current_model: String,
    pub model_switch_history: Vec<ModelSwitch>,
    pub consecutive_failures: u32,
    pub switch_count: u32,
    pub total_tokens: u64,
    /// Topic currently being generated
    pub current_sample: Option<String>,
    pub topic_filter: Option<String>,
    pub difficulty_filter: Option<String>,
    pub reasoning_instruction: Option<String>,
    pub sample_type: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_log: Vec<ErrorEntry>,
    /// Topics skipped at least once because their circuit was open
    #[serde(default)]
    pub skipped_topics: Vec<String>,
    #[serde(default)]
    pub circuit_breaker_summary: CircuitBreakerSummary,
}

impl BatchState {
    pub fn new(batch_id: BatchId, config: &BatchConfig, model: String) -> Self {
        let now = Utc::now();
        Self {
            batch_id,
            status: BatchStatus::Running,
            target_count: config.target_count,
            generated_count: 0,
            current_model: model,
            model_switch_history: Vec::new(),
            consecutive_failures: 0,
            switch_count: 0,
            total_tokens: 0,
            current_sample: None,
            topic_filter: config.topic.clone(),
            difficulty_filter: config.difficulty.clone(),
            reasoning_instruction: config.reasoning_instruction.clone(),
            sample_type: config.sample_type.clone(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            error_log: Vec::new(),
            skipped_topics: Vec::new(),
            circuit_breaker_summary: CircuitBreakerSummary::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Refresh `updated_at`; called on every mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append to the error log, evicting the oldest entries beyond `capacity`.
    pub fn push_error(&mut self, entry: ErrorEntry, capacity: usize) {
        self.error_log.push(entry);
        if self.error_log.len() > capacity {
            let excess = self.error_log.len() - capacity;
            self.error_log.drain(..excess);
        }
    }

    /// Transition to a terminal status. Has no effect once terminal.
    pub fn finish(&mut self, status: BatchStatus) {
        debug_assert!(status.is_terminal());
        if self.is_terminal() {
            return;
        }
        self.status = status;
        self.touch();
        self.completed_at = Some(self.updated_at);
    }
}

/// One generated legal Q&A record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GeneratedSample {
    /// `{provider}_{uuid}`
    pub id: String,
    pub question: String,
    pub answer: String,
    pub topic: String,
    pub difficulty: String,
    pub case_citation: String,
    pub reasoning: String,
    pub jurisdiction: String,
    pub sample_type: String,
    pub batch_id: Option<BatchId>,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}
