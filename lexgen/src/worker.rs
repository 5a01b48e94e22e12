//! The batch worker: one task per running batch, and the only writer of that batch's state.
//!
//! Each iteration waits for rate limiter capacity, asks the current model for one sample, and on
//! success appends it to the dataset store. Failures go through the fallback policy, which decides
//! between retrying, switching model and aborting. The updated state is recorded in the registry
//! and published after every iteration.
//!
//! Topics that keep failing are skipped through a per-batch [`TopicCircuitBreaker`] until their
//! recovery timeout passes.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{SampleTypeRotation, Topic, TopicRotation};
use crate::circuit_breaker::TopicCircuitBreaker;
use crate::config::{CircuitBreakerConfig, Config};
use crate::fallback::{Decision, FallbackPolicy};
use crate::provider::{ErrorKind, PromptContext, ProviderError, ProviderSet};
use crate::publisher::StatusPublisher;
use crate::rate_limiter::RateLimiter;
use crate::registry::BatchRegistry;
use crate::storage::{DatasetStore, StoreError};
use crate::types::{BatchState, BatchStatus, ErrorEntry, ModelSwitch};

/// What a batch generates, resolved from its config before the worker starts.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub topics: TopicRotation,
    pub sample_types: SampleTypeRotation,
    pub breaker: TopicCircuitBreaker,
}

/// Tunables the worker reads on every iteration.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub autosave_interval: u32,
    pub error_log_capacity: usize,
    pub retry_delay: Duration,
    pub max_duration: Duration,
    pub expected_completion_tokens: u32,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            autosave_interval: config.batches.autosave_interval.max(1),
            error_log_capacity: config.batches.error_log_capacity.max(1),
            retry_delay: config.batches.retry_delay,
            max_duration: config.batches.max_duration,
            expected_completion_tokens: config.rate_limits.expected_completion_tokens,
            circuit_breaker: config.circuit_breaker.clone(),
        }
    }
}

/// Shared collaborators of every worker. Cheap to clone.
#[derive(Clone)]
pub struct BatchWorker {
    pub providers: ProviderSet,
    pub limiter: Arc<RateLimiter>,
    pub policy: FallbackPolicy,
    pub store: Arc<dyn DatasetStore>,
    pub registry: BatchRegistry,
    pub publisher: StatusPublisher,
    pub settings: WorkerSettings,
}

impl BatchWorker {
    /// Drive `state` until it reaches a terminal status and return the final snapshot.
    ///
    /// Cancellation is observed at the top of every iteration and while waiting on the rate limiter,
    /// the provider or a retry delay. A sample whose call completes after cancellation is dropped.
    #[instrument(skip_all, fields(batch_id = %state.batch_id, target = state.target_count))]
    pub async fn run(self, mut state: BatchState, mut plan: GenerationPlan, cancel: CancellationToken) -> BatchState {
        info!(model = %state.current_model, "Batch worker started");
        let started = Instant::now();

        loop {
            if state.generated_count >= state.target_count {
                state.finish(BatchStatus::Completed);
                break;
            }
            if cancel.is_cancelled() {
                state.finish(BatchStatus::Stopped);
                break;
            }
            if started.elapsed() >= self.settings.max_duration {
                state.push_error(ErrorEntry::new("batch timeout exceeded"), self.settings.error_log_capacity);
                state.finish(BatchStatus::Failed);
                break;
            }

            if self.iterate(&mut state, &mut plan, &cancel).await.is_break() {
                break;
            }
            self.publish(&state);
        }

        self.checkpoint(&state).await;
        self.publish(&state);
        info!(
            status = %state.status,
            generated = state.generated_count,
            switches = state.switch_count,
            tokens = state.total_tokens,
            "Batch worker finished"
        );
        state
    }

    /// One generation attempt. `Break` means the state is now terminal.
    async fn iterate(
        &self,
        state: &mut BatchState,
        plan: &mut GenerationPlan,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        let topic = match self.next_topic(state, plan, cancel).await {
            ControlFlow::Continue(Some(topic)) => topic,
            ControlFlow::Continue(None) => return ControlFlow::Continue(()),
            ControlFlow::Break(()) => return ControlFlow::Break(()),
        };
        let Some(sample_type) = plan.sample_types.next() else {
            state.push_error(ErrorEntry::new("no sample types to generate"), self.settings.error_log_capacity);
            state.finish(BatchStatus::Failed);
            return ControlFlow::Break(());
        };

        let topic_key = topic.key();
        state.current_sample = Some(topic_key.clone());
        let context = PromptContext::new(
            topic,
            sample_type,
            state.reasoning_instruction.clone(),
            Some(state.batch_id.clone()),
        );
        let estimate = context.estimated_tokens(self.settings.expected_completion_tokens);

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.stop(state),
            permit = self.limiter.acquire(estimate) => permit,
        };

        let model = state.current_model.clone();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.stop(state),
            outcome = self.providers.generate(&model, &context) => outcome,
        };
        // Acceptance point: nothing completing after a stop is appended
        if cancel.is_cancelled() {
            return self.stop(state);
        }

        let generation = match outcome {
            Ok(generation) => generation,
            Err(err) => {
                self.record_topic_failure(state, plan, &topic_key);
                return self.handle_failure(state, err, cancel).await;
            }
        };

        let tokens = match generation.usage {
            Some(usage) => {
                self.limiter.reconcile(&permit, usage.total_tokens).await;
                usage.total_tokens
            }
            None => permit.estimated_tokens,
        };

        match self.store.append_sample(&generation.sample).await {
            Ok(()) => {
                state.generated_count += 1;
                state.total_tokens = state.total_tokens.saturating_add(u64::from(tokens));
                state.consecutive_failures = 0;
                plan.breaker.record_success(&topic_key);
                state.circuit_breaker_summary = plan.breaker.summary(Instant::now());
                state.touch();
                debug!(
                    sample_id = %generation.sample.id,
                    model = %model,
                    generated = state.generated_count,
                    "Sample stored"
                );
                if state.generated_count % self.settings.autosave_interval == 0 {
                    self.checkpoint(state).await;
                }
                ControlFlow::Continue(())
            }
            Err(StoreError::DuplicateSample { id }) => {
                // Neither a success nor a failure
                debug!(sample_id = %id, "Duplicate sample skipped");
                state.touch();
                ControlFlow::Continue(())
            }
            Err(err) => {
                let err = ProviderError::transient(format!("failed to store sample: {err}"));
                self.record_topic_failure(state, plan, &topic_key);
                self.handle_failure(state, err, cancel).await
            }
        }
    }

    /// Next topic whose circuit is not open.
    ///
    /// Open topics are recorded in `skipped_topics`. When every topic is open the worker waits for
    /// the earliest recovery and yields `Continue(None)` so the run loop re-checks its exits.
    async fn next_topic(
        &self,
        state: &mut BatchState,
        plan: &mut GenerationPlan,
        cancel: &CancellationToken,
    ) -> ControlFlow<(), Option<Topic>> {
        for _ in 0..plan.topics.len() {
            let Some(topic) = plan.topics.next() else {
                break;
            };
            let key = topic.key();
            if !plan.breaker.is_open(&key, Instant::now()) {
                return ControlFlow::Continue(Some(topic));
            }
            debug!(topic = %key, "Skipping topic with open circuit");
            if !state.skipped_topics.contains(&key) {
                state.skipped_topics.push(key);
            }
        }

        if plan.topics.is_empty() {
            state.push_error(ErrorEntry::new("no topics to generate"), self.settings.error_log_capacity);
            state.finish(BatchStatus::Failed);
            return ControlFlow::Break(());
        }

        let now = Instant::now();
        let wait = plan
            .breaker
            .time_until_recovery(now)
            .unwrap_or(self.settings.retry_delay);
        state.circuit_breaker_summary = plan.breaker.summary(now);
        state.touch();
        warn!(wait_secs = wait.as_secs(), "Every topic circuit is open, waiting for recovery");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.stop(state),
            _ = tokio::time::sleep(wait) => {}
        }
        ControlFlow::Continue(None)
    }

    fn record_topic_failure(&self, state: &mut BatchState, plan: &mut GenerationPlan, topic_key: &str) {
        let now = Instant::now();
        plan.breaker.record_failure(topic_key, now);
        state.circuit_breaker_summary = plan.breaker.summary(now);
    }

    async fn handle_failure(
        &self,
        state: &mut BatchState,
        err: ProviderError,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        state.consecutive_failures += 1;
        state.push_error(
            ErrorEntry::new(err.message.clone())
                .with_kind(err.kind)
                .with_model(state.current_model.clone()),
            self.settings.error_log_capacity,
        );
        warn!(
            model = %state.current_model,
            kind = ?err.kind,
            consecutive_failures = state.consecutive_failures,
            "Generation failed: {}",
            err.message
        );

        let decision = self.policy.decide(
            err.kind,
            state.consecutive_failures,
            state.switch_count,
            &state.current_model,
        );
        state.touch();

        match decision {
            Decision::Retry => {
                if !self.settings.retry_delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(self.settings.retry_delay) => {}
                    }
                }
                ControlFlow::Continue(())
            }
            Decision::SwitchTo { model, reason } => {
                info!(from = %state.current_model, to = %model, %reason, "Switching model");
                state.model_switch_history.push(ModelSwitch {
                    from_model: std::mem::replace(&mut state.current_model, model.clone()),
                    to_model: model,
                    reason,
                    at_sample: state.generated_count,
                    timestamp: Utc::now(),
                });
                state.switch_count += 1;
                state.consecutive_failures = 0;
                state.touch();
                self.checkpoint(state).await;
                ControlFlow::Continue(())
            }
            Decision::Abort { reason } => {
                let message = match err.kind {
                    ErrorKind::Fatal => format!("{reason}: {}", err.message),
                    _ => reason,
                };
                warn!(model = %state.current_model, "Aborting batch: {message}");
                state.push_error(ErrorEntry::new(message), self.settings.error_log_capacity);
                state.finish(BatchStatus::Failed);
                ControlFlow::Break(())
            }
        }
    }

    fn stop<T>(&self, state: &mut BatchState) -> ControlFlow<(), T> {
        info!(generated = state.generated_count, "Stop requested");
        state.finish(BatchStatus::Stopped);
        ControlFlow::Break(())
    }

    fn publish(&self, state: &BatchState) {
        self.registry.record(state.clone());
        self.publisher.publish(state);
    }

    /// Durable write of the batch row. Failures are logged; generation carries on.
    async fn checkpoint(&self, state: &BatchState) {
        if let Err(e) = self.store.save_batch(state).await {
            warn!(batch_id = %state.batch_id, "Failed to checkpoint batch: {e}");
        }
    }
}
