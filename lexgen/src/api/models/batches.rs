//! Models for the batch generation API.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::types::{BatchId, BatchState};

/// Request body for stopping batches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StopBatchRequest {
    /// Batch to stop; every running batch when omitted
    #[serde(default)]
    pub batch_id: Option<BatchId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopBatchResponse {
    /// Batches signalled to stop
    pub stopped: Vec<BatchId>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StatusQuery {
    /// Return a single batch instead of every tracked batch
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BatchListResponse {
    pub batches: Vec<BatchState>,
    pub count: usize,
}

impl From<Vec<BatchState>> for BatchListResponse {
    fn from(batches: Vec<BatchState>) -> Self {
        Self {
            count: batches.len(),
            batches,
        }
    }
}

/// Either one batch or the full list, depending on whether `batch_id` was given.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(untagged)]
pub enum StatusResponse {
    Batch(Box<BatchState>),
    Batches(BatchListResponse),
}
