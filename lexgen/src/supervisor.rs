//! Batch supervisor: the operations the API exposes, and the owner of worker tasks.
//!
//! At most one batch runs at a time. Starting a batch validates its config, registers a running
//! snapshot and spawns the worker with a cancellation token derived from the process shutdown
//! token. A monitor task watches each worker and fails the batch if the worker panics.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

use crate::catalog::{SampleTypeRotation, TopicRotation};
use crate::circuit_breaker::TopicCircuitBreaker;
use crate::detector::flag_stuck;
use crate::publisher::StatusPublisher;
use crate::registry::BatchRegistry;
use crate::storage::StoreError;
use crate::types::{BatchConfig, BatchId, BatchState, BatchStatus, ErrorEntry};
use crate::worker::{BatchWorker, GenerationPlan};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch {batch_id} is already running")]
    AlreadyRunning { batch_id: BatchId },

    #[error("Invalid batch config: {message}")]
    ConfigInvalid { message: String },

    #[error("Batch {batch_id} not found or already stopped")]
    NotFound { batch_id: BatchId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Acknowledgement of a started batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StartedBatch {
    pub batch_id: BatchId,
    pub model: String,
    pub target_count: u32,
}

#[derive(Clone)]
pub struct Supervisor {
    worker: BatchWorker,
    shutdown: CancellationToken,
    stuck_threshold: Duration,
    start_lock: Arc<tokio::sync::Mutex<()>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Supervisor {
    pub fn new(worker: BatchWorker, shutdown: CancellationToken, stuck_threshold: Duration) -> Self {
        Self {
            worker,
            shutdown,
            stuck_threshold,
            start_lock: Arc::new(tokio::sync::Mutex::new(())),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.worker.registry
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.worker.publisher
    }

    pub fn fallback_models(&self) -> &[String] {
        self.worker.policy.models()
    }

    pub fn stuck_threshold(&self) -> Duration {
        self.stuck_threshold
    }

    fn plan(&self, config: &BatchConfig) -> Result<(String, GenerationPlan), BatchError> {
        let invalid = |message: String| BatchError::ConfigInvalid { message };

        if config.target_count == 0 {
            return Err(invalid("target_count must be at least 1".to_string()));
        }

        let model = match config.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            Some(model) => model.to_string(),
            None => self
                .worker
                .policy
                .models()
                .first()
                .cloned()
                .ok_or_else(|| invalid("no fallback models configured".to_string()))?,
        };
        if !self.worker.policy.contains(&model) {
            return Err(invalid(format!("model '{model}' is not in the fallback order")));
        }

        let topics = TopicRotation::new(config.topic.as_deref(), config.difficulty.as_deref()).ok_or_else(|| {
            invalid(format!(
                "no topics match topic {:?} and difficulty {:?}",
                config.topic, config.difficulty
            ))
        })?;
        let sample_types = SampleTypeRotation::new(config.sample_type.as_deref()).map_err(invalid)?;

        let breaker = TopicCircuitBreaker::new(&self.worker.settings.circuit_breaker);

        Ok((
            model,
            GenerationPlan {
                topics,
                sample_types,
                breaker,
            },
        ))
    }

    /// Start a batch. Rejected while another batch is running.
    #[instrument(skip(self), err)]
    pub async fn start_batch(&self, config: BatchConfig) -> Result<StartedBatch, BatchError> {
        let _guard = self.start_lock.lock().await;

        if let Some(batch_id) = self.worker.registry.running() {
            return Err(BatchError::AlreadyRunning { batch_id });
        }

        let (model, plan) = self.plan(&config)?;
        let state = BatchState::new(BatchId::generate(), &config, model.clone());
        self.worker.store.save_batch(&state).await?;

        let cancel = self.shutdown.child_token();
        self.worker.registry.insert(state.clone(), cancel.clone());
        self.worker.publisher.publish(&state);

        let started = StartedBatch {
            batch_id: state.batch_id.clone(),
            model,
            target_count: state.target_count,
        };
        info!(batch_id = %started.batch_id, model = %started.model, target = started.target_count, "Batch started");

        let worker = tokio::spawn(self.worker.clone().run(state, plan, cancel));
        let monitor = tokio::spawn(monitor_worker(self.worker.clone(), started.batch_id.clone(), worker));

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(monitor);

        Ok(started)
    }

    /// Stop the named batch, or every running batch when `batch_id` is `None`.
    ///
    /// Returns the ids that were signalled. Workers stop within one iteration.
    #[instrument(skip(self), err)]
    pub async fn stop_batch(&self, batch_id: Option<BatchId>) -> Result<Vec<BatchId>, BatchError> {
        match batch_id {
            Some(batch_id) => {
                if self.worker.registry.cancel(&batch_id) {
                    info!(batch_id = %batch_id, "Stop signalled");
                    Ok(vec![batch_id])
                } else {
                    Err(BatchError::NotFound { batch_id })
                }
            }
            None => {
                let stopped: Vec<BatchId> = self
                    .worker
                    .registry
                    .running_ids()
                    .into_iter()
                    .filter(|id| self.worker.registry.cancel(id))
                    .collect();
                info!(count = stopped.len(), "Stop signalled for all running batches");
                Ok(stopped)
            }
        }
    }

    /// Live snapshot of a tracked batch, falling back to its persisted row.
    pub async fn get_status(&self, batch_id: &BatchId) -> Result<BatchState, BatchError> {
        if let Some(state) = self.worker.registry.snapshot(batch_id) {
            return Ok(state);
        }
        Ok(self.worker.store.get_batch(batch_id).await?)
    }

    /// Live snapshots of every batch tracked by this process, most recent first.
    pub fn list_status(&self) -> Vec<BatchState> {
        self.worker.registry.all()
    }

    /// Persisted batches, most recent first, with live snapshots replacing stale checkpoints.
    pub async fn get_history(&self) -> Result<Vec<BatchState>, BatchError> {
        let mut batches: HashMap<BatchId, BatchState> = self
            .worker
            .store
            .get_batch_history()
            .await?
            .into_iter()
            .map(|state| (state.batch_id.clone(), state))
            .collect();
        for live in self.worker.registry.all() {
            batches.insert(live.batch_id.clone(), live);
        }

        let mut batches: Vec<BatchState> = batches.into_values().collect();
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.batch_id.cmp(&a.batch_id)));
        Ok(batches)
    }

    /// Running batches with no update within the stuck threshold.
    pub fn get_stuck_batches(&self) -> Vec<BatchState> {
        self.get_stuck_batches_at(Utc::now())
    }

    /// Newly flagged batches are published, exactly as the background detector would.
    pub fn get_stuck_batches_at(&self, now: DateTime<Utc>) -> Vec<BatchState> {
        flag_stuck(&self.worker.registry, &self.worker.publisher, now, self.stuck_threshold)
    }

    /// Wait for every spawned worker to finish.
    pub async fn wait_idle(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Stop every running batch and wait for the workers to persist their final state.
    pub async fn shutdown(&self) {
        let stopped = self.stop_batch(None).await.unwrap_or_default();
        if !stopped.is_empty() {
            info!(count = stopped.len(), "Stopping running batches for shutdown");
        }
        self.wait_idle().await;
    }
}

/// Await a worker and fail its batch if the task panicked.
async fn monitor_worker(worker: BatchWorker, batch_id: BatchId, handle: JoinHandle<BatchState>) {
    let err = match handle.await {
        Ok(_) => return,
        Err(err) => err,
    };
    // An aborted worker only happens when the runtime is going away
    if !err.is_panic() {
        warn!(batch_id = %batch_id, "Batch worker task was cancelled");
        return;
    }
    error!(batch_id = %batch_id, "Batch worker crashed: {err}");

    let Some(mut state) = worker.registry.snapshot(&batch_id) else {
        return;
    };
    if state.is_terminal() {
        return;
    }
    state.push_error(ErrorEntry::new("worker crashed"), worker.settings.error_log_capacity);
    state.finish(BatchStatus::Failed);

    worker.registry.record(state.clone());
    worker.publisher.publish(&state);
    if let Err(e) = worker.store.save_batch(&state).await {
        warn!(batch_id = %batch_id, "Failed to persist crashed batch: {e}");
    }
}
