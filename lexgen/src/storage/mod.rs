//! Dataset store contract used by the batch worker.
//!
//! The store owns generated samples and the persisted batch rows. The worker only needs to append
//! samples, upsert its own batch row and read history back, so that is all the trait exposes.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{BatchId, BatchState, GeneratedSample};

pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A sample with this id was already appended
    #[error("Sample {id} already exists")]
    DuplicateSample { id: String },

    #[error("Batch {batch_id} not found")]
    NotFound { batch_id: BatchId },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for samples and batch rows.
///
/// `append_sample` must reject a second sample with the same id with
/// [`StoreError::DuplicateSample`]; the worker relies on that to skip duplicates without counting
/// them. `save_batch` overwrites the single row for a batch id in place.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Append one sample, linked to its batch through `sample.batch_id`.
    async fn append_sample(&self, sample: &GeneratedSample) -> Result<()>;

    /// Insert or overwrite the row for `state.batch_id`.
    async fn save_batch(&self, state: &BatchState) -> Result<()>;

    /// Load one persisted batch row.
    async fn get_batch(&self, batch_id: &BatchId) -> Result<BatchState>;

    /// All persisted batch rows, most recently started first.
    async fn get_batch_history(&self) -> Result<Vec<BatchState>>;

    /// Number of stored samples, optionally restricted to one batch.
    async fn count_samples(&self, batch_id: Option<&BatchId>) -> Result<u64>;
}
