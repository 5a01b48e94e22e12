use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

use crate::storage::StoreError;
use crate::supervisor::BatchError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Requested resource not found
    #[error("{resource} with ID {id} not found")]
    NotFound { resource: String, id: String },

    /// Request conflicts with current state, e.g. a batch is already running
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Dataset store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Store(StoreError::DuplicateSample { .. }) => StatusCode::CONFLICT,
            Error::Internal { .. } | Error::Store(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest { message } | Error::Conflict { message } => message.clone(),
            Error::NotFound { resource, id } => format!("{resource} with ID {id} not found"),
            Error::Store(StoreError::NotFound { batch_id }) => format!("Batch with ID {batch_id} not found"),
            Error::Store(StoreError::DuplicateSample { .. }) => "Sample already exists".to_string(),
            Error::Internal { .. } | Error::Store(_) | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::AlreadyRunning { .. } => Error::Conflict { message: err.to_string() },
            BatchError::ConfigInvalid { message } => Error::BadRequest { message },
            BatchError::NotFound { batch_id } => Error::NotFound {
                resource: "Running batch".to_string(),
                id: batch_id.to_string(),
            },
            BatchError::Store(store) => Error::Store(store),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Internal { .. } | Error::Other(_) | Error::Store(StoreError::Database(_) | StoreError::Other(_)) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Store(_) => {
                tracing::warn!("Store error: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
            Error::BadRequest { .. } | Error::NotFound { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        let body = json!({ "success": false, "error": self.user_message() });
        (status, Json(body)).into_response()
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Internal { operation: msg }
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchId;

    #[test]
    fn batch_errors_map_to_http_statuses() {
        let running = Error::from(BatchError::AlreadyRunning {
            batch_id: BatchId::from("batch_1_a"),
        });
        assert_eq!(running.status_code(), StatusCode::CONFLICT);
        assert!(running.user_message().contains("batch_1_a"));

        let invalid = Error::from(BatchError::ConfigInvalid {
            message: "target_count must be at least 1".to_string(),
        });
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(invalid.user_message(), "target_count must be at least 1");

        let missing = Error::from(BatchError::NotFound {
            batch_id: BatchId::from("batch_2_b"),
        });
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_details_are_hidden() {
        let err = Error::Other(anyhow::anyhow!("connection refused at 10.0.0.3"));
        assert_eq!(err.user_message(), "Internal server error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
