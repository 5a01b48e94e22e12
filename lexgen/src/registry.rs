//! Registry of tracked batches keyed by batch id.
//!
//! Each worker is the only writer of its own entry and publishes whole snapshots through
//! [`BatchRegistry::record`]. The stuck detector only ever touches the `stuck` flag. Readers get
//! `status: stuck` for a running batch that is flagged, without the worker's state changing.
//!
//! Finished batches stay tracked so late readers see their final state, up to
//! [`MAX_FINISHED_ENTRIES`]. Older ones are dropped and served from the dataset store instead.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::types::{BatchId, BatchState, BatchStatus};

/// Terminal batches kept in memory, most recently started first.
pub const MAX_FINISHED_ENTRIES: usize = 100;

#[derive(Debug, Clone)]
struct Entry {
    state: BatchState,
    stuck: bool,
    cancel: Option<CancellationToken>,
}

impl Entry {
    fn view(&self) -> BatchState {
        let mut state = self.state.clone();
        if self.stuck && state.status == BatchStatus::Running {
            state.status = BatchStatus::Stuck;
        }
        state
    }
}

/// Shared, cloneable handle to the batch table.
#[derive(Debug, Clone, Default)]
pub struct BatchRegistry {
    entries: Arc<DashMap<BatchId, Entry>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new batch with the token that cancels its worker.
    pub fn insert(&self, state: BatchState, cancel: CancellationToken) {
        self.entries.insert(
            state.batch_id.clone(),
            Entry {
                state,
                stuck: false,
                cancel: Some(cancel),
            },
        );
    }

    /// Replace the snapshot for `state.batch_id`, clearing any stuck flag.
    ///
    /// Terminal snapshots drop the cancellation handle. A terminal entry is never overwritten.
    pub fn record(&self, state: BatchState) {
        let terminal = state.is_terminal();
        {
            let mut entry = self.entries.entry(state.batch_id.clone()).or_insert_with(|| Entry {
                state: state.clone(),
                stuck: false,
                cancel: None,
            });
            if !entry.state.is_terminal() {
                if terminal {
                    entry.cancel = None;
                }
                entry.state = state;
                entry.stuck = false;
            }
        }
        if terminal {
            self.evict_finished();
        }
    }

    /// Drop the oldest terminal entries beyond [`MAX_FINISHED_ENTRIES`].
    fn evict_finished(&self) {
        let mut finished: Vec<(DateTime<Utc>, BatchId)> = self
            .entries
            .iter()
            .filter(|entry| entry.state.is_terminal())
            .map(|entry| (entry.state.started_at, entry.key().clone()))
            .collect();
        if finished.len() <= MAX_FINISHED_ENTRIES {
            return;
        }
        finished.sort_by(|a, b| b.cmp(a));
        for (_, batch_id) in finished.into_iter().skip(MAX_FINISHED_ENTRIES) {
            self.entries.remove_if(&batch_id, |_, entry| entry.state.is_terminal());
        }
    }

    /// Snapshot of one batch, with the stuck overlay applied.
    pub fn snapshot(&self, batch_id: &BatchId) -> Option<BatchState> {
        self.entries.get(batch_id).map(|entry| entry.view())
    }

    /// Every tracked batch, most recently started first.
    pub fn all(&self) -> Vec<BatchState> {
        let mut batches: Vec<BatchState> = self.entries.iter().map(|entry| entry.view()).collect();
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.batch_id.cmp(&a.batch_id)));
        batches
    }

    /// Every tracked batch keyed by id, for full-table stream snapshots.
    pub fn table(&self) -> BTreeMap<String, BatchState> {
        self.entries
            .iter()
            .map(|entry| (entry.key().to_string(), entry.view()))
            .collect()
    }

    /// Id of a batch whose worker is still running, if any.
    pub fn running(&self) -> Option<BatchId> {
        self.entries
            .iter()
            .find(|entry| entry.state.status == BatchStatus::Running)
            .map(|entry| entry.key().clone())
    }

    /// Ids of every batch whose worker is still running.
    pub fn running_ids(&self) -> Vec<BatchId> {
        self.entries
            .iter()
            .filter(|entry| entry.state.status == BatchStatus::Running)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Cancel a running batch's worker. Returns false if the batch is unknown or already terminal.
    pub fn cancel(&self, batch_id: &BatchId) -> bool {
        match self.entries.get(batch_id) {
            Some(entry) if entry.state.status == BatchStatus::Running => match &entry.cancel {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Flag running batches whose last update is older than `threshold` at `now`.
    ///
    /// Returns the flagged batches with the overlay applied, and whether each was newly flagged.
    pub fn mark_stale(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<(BatchState, bool)> {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        let mut flagged = Vec::new();
        for mut entry in self.entries.iter_mut() {
            if entry.state.status != BatchStatus::Running {
                continue;
            }
            if now.signed_duration_since(entry.state.updated_at) > threshold {
                let newly = !entry.stuck;
                entry.stuck = true;
                flagged.push((entry.view(), newly));
            }
        }
        flagged.sort_by(|(a, _), (b, _)| a.updated_at.cmp(&b.updated_at));
        flagged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
