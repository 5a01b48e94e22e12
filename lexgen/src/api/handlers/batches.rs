//! Handlers for starting, stopping and inspecting generation batches.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};

use crate::AppState;
use crate::api::models::batches::{BatchListResponse, StatusQuery, StatusResponse, StopBatchRequest, StopBatchResponse};
use crate::errors::Result;
use crate::supervisor::StartedBatch;
use crate::types::{BatchConfig, BatchId};

#[utoipa::path(
    post,
    path = "/api/generate/batch/start",
    tag = "batches",
    summary = "Start batch",
    description = "Starts a generation batch. Only one batch may run at a time.",
    request_body = BatchConfig,
    responses(
        (status = 201, description = "Batch started", body = StartedBatch),
        (status = 400, description = "Invalid batch config"),
        (status = 409, description = "Another batch is already running"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip(state))]
pub async fn start_batch(
    State(state): State<AppState>,
    Json(config): Json<BatchConfig>,
) -> Result<(StatusCode, Json<StartedBatch>)> {
    let started = state.supervisor.start_batch(config).await?;
    Ok((StatusCode::CREATED, Json(started)))
}

#[utoipa::path(
    post,
    path = "/api/generate/batch/stop",
    tag = "batches",
    summary = "Stop batch",
    description = "Stops the named batch, or every running batch when no id or no body is given. \
                   Samples already stored are kept.",
    request_body = StopBatchRequest,
    responses(
        (status = 200, description = "Stop signalled", body = StopBatchResponse),
        (status = 404, description = "Batch not found or already stopped"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn stop_batch(
    State(state): State<AppState>,
    request: Option<Json<StopBatchRequest>>,
) -> Result<Json<StopBatchResponse>> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let stopped = state.supervisor.stop_batch(request.batch_id).await?;
    let message = match stopped.len() {
        0 => "No running batches".to_string(),
        1 => format!("Batch {} stopping", stopped[0]),
        n => format!("{n} batches stopping"),
    };
    Ok(Json(StopBatchResponse { stopped, message }))
}

#[utoipa::path(
    get,
    path = "/api/generate/batch/status",
    tag = "batches",
    summary = "Batch status",
    description = "Live status of one batch, or of every batch tracked by this server.",
    params(StatusQuery),
    responses(
        (status = 200, description = "Batch status", body = StatusResponse),
        (status = 404, description = "Batch not found"),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Result<Json<StatusResponse>> {
    let response = match query.batch_id.filter(|id| !id.is_empty()) {
        Some(batch_id) => {
            let batch = state.supervisor.get_status(&BatchId::from(batch_id)).await?;
            StatusResponse::Batch(Box::new(batch))
        }
        None => StatusResponse::Batches(state.supervisor.list_status().into()),
    };
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/api/generate/batch/history",
    tag = "batches",
    summary = "Batch history",
    description = "Every persisted batch, most recently started first.",
    responses(
        (status = 200, description = "Batch history", body = BatchListResponse),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_history(State(state): State<AppState>) -> Result<Json<BatchListResponse>> {
    let batches = state.supervisor.get_history().await?;
    Ok(Json(batches.into()))
}

#[utoipa::path(
    get,
    path = "/api/batches/stuck",
    tag = "batches",
    summary = "Stuck batches",
    description = "Running batches that have not updated within the stuck threshold.",
    responses(
        (status = 200, description = "Stuck batches", body = BatchListResponse),
    )
)]
#[tracing::instrument(skip(state))]
pub async fn get_stuck_batches(State(state): State<AppState>) -> Json<BatchListResponse> {
    Json(state.supervisor.get_stuck_batches().into())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{test_server, wait_for_status};
    use crate::types::{BatchState, BatchStatus};
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use std::time::Duration;

    #[tokio::test]
    async fn start_then_poll_until_completed() {
        let (server, app, _mock) = test_server(Duration::ZERO);

        let response = server
            .post("/api/generate/batch/start")
            .json(&json!({"target_count": 3, "topic_filter": "Contract Law"}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["model"], "model-a");
        assert_eq!(body["target_count"], 3);
        let batch_id = body["batch_id"].as_str().unwrap().to_string();
        assert!(batch_id.starts_with("batch_"));

        let state = wait_for_status(&app, &batch_id, BatchStatus::Completed).await;
        assert_eq!(state.generated_count, 3);
        assert_eq!(state.topic_filter.as_deref(), Some("Contract Law"));

        let response = server.get("/api/generate/batch/status").add_query_param("batch_id", &batch_id).await;
        response.assert_status_ok();
        let single: BatchState = response.json();
        assert_eq!(single.status, BatchStatus::Completed);

        let response = server.get("/api/generate/batch/history").await;
        response.assert_status_ok();
        let history: Value = response.json();
        assert_eq!(history["count"], 1);
        assert_eq!(history["batches"][0]["batch_id"], batch_id);
    }

    #[tokio::test]
    async fn conflicting_and_invalid_starts() {
        let (server, app, _mock) = test_server(Duration::from_secs(30));

        let response = server
            .post("/api/generate/batch/start")
            .json(&json!({"target_count": 0}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["success"], false);

        server
            .post("/api/generate/batch/start")
            .json(&json!({"target_count": 5}))
            .await
            .assert_status(StatusCode::CREATED);

        let response = server
            .post("/api/generate/batch/start")
            .json(&json!({"target_count": 5}))
            .await;
        response.assert_status(StatusCode::CONFLICT);

        let response = server.get("/api/generate/batch/status").await;
        let all: Value = response.json();
        assert_eq!(all["count"], 1);

        app.supervisor.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn stop_running_batch_then_unknown_batch() {
        let (server, app, _mock) = test_server(Duration::from_secs(30));

        let body: Value = server
            .post("/api/generate/batch/start")
            .json(&json!({"target_count": 5}))
            .await
            .json();
        let batch_id = body["batch_id"].as_str().unwrap().to_string();

        let response = server
            .post("/api/generate/batch/stop")
            .json(&json!({"batch_id": batch_id}))
            .await;
        response.assert_status_ok();
        let stopped: Value = response.json();
        assert_eq!(stopped["stopped"], json!([batch_id]));

        let state = wait_for_status(&app, &batch_id, BatchStatus::Stopped).await;
        assert_eq!(state.generated_count, 0);

        let response = server
            .post("/api/generate/batch/stop")
            .json(&json!({"batch_id": batch_id}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);

        let response = server.post("/api/generate/batch/stop").json(&json!({})).await;
        response.assert_status_ok();
        let none: Value = response.json();
        assert_eq!(none["stopped"], json!([]));
    }

    #[test_log::test(tokio::test)]
    async fn stop_without_body_stops_every_running_batch() {
        let (server, app, _mock) = test_server(Duration::from_secs(30));

        let body: Value = server
            .post("/api/generate/batch/start")
            .json(&json!({"target_count": 5}))
            .await
            .json();
        let batch_id = body["batch_id"].as_str().unwrap().to_string();

        let response = server.post("/api/generate/batch/stop").await;
        response.assert_status_ok();
        let stopped: Value = response.json();
        assert_eq!(stopped["stopped"], json!([batch_id]));

        wait_for_status(&app, &batch_id, BatchStatus::Stopped).await;
    }

    #[tokio::test]
    async fn unknown_batch_status_is_not_found() {
        let (server, _app, _mock) = test_server(Duration::ZERO);

        let response = server
            .get("/api/generate/batch/status")
            .add_query_param("batch_id", "batch_0_deadbeef")
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[test_log::test(tokio::test)]
    async fn stuck_endpoint_lists_stale_running_batches() {
        let (server, app, _mock) = test_server(Duration::ZERO);

        let mut stale = BatchState::new("batch_1_stale000".into(), &Default::default(), "model-a".into());
        stale.updated_at = chrono::Utc::now() - chrono::Duration::minutes(10);
        app.supervisor
            .registry()
            .insert(stale, tokio_util::sync::CancellationToken::new());

        let response = server.get("/api/batches/stuck").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["count"], 1);
        assert_eq!(body["batches"][0]["status"], "stuck");
    }
}
