//! Server-sent event stream of batch status.

use axum::{
    extract::State,
    http::{HeaderName, HeaderValue, header},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use tokio_stream::StreamExt;

use crate::AppState;
use crate::publisher::StreamMessage;

/// Subscribe to live batch status.
///
/// The first event is an `all_batches` snapshot; every later change arrives as `batch_update`.
/// A `heartbeat` comment is sent at the configured interval while the stream is idle.
#[utoipa::path(
    get,
    path = "/api/generate/batch/stream",
    tag = "batches",
    summary = "Stream batch status",
    responses(
        (status = 200, description = "Server-sent event stream; each `data` line is a JSON stream message",
         content_type = "text/event-stream", body = StreamMessage)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn stream_batches(State(state): State<AppState>) -> impl IntoResponse {
    let heartbeat = state.config.stream.heartbeat_interval;
    let events = state
        .supervisor
        .publisher()
        .subscribe()
        .map(|message| Event::default().json_data(&message));

    tracing::debug!(
        subscribers = state.supervisor.publisher().subscriber_count(),
        "Stream subscriber connected"
    );

    let headers = [
        (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        (HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no")),
    ];
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"));
    (headers, sse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_app, wait_for_status};
    use crate::types::{BatchConfig, BatchStatus};
    use serde_json::Value;
    use std::time::Duration;

    fn data_line(chunk: &[u8]) -> Value {
        let text = std::str::from_utf8(chunk).unwrap();
        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap_or_else(|| panic!("no data line in {text:?}"));
        serde_json::from_str(data).unwrap()
    }

    #[tokio::test]
    async fn late_subscriber_first_sees_completed_snapshot() {
        let (app, _mock) = test_app(Duration::ZERO);
        let started = app
            .supervisor
            .start_batch(BatchConfig {
                target_count: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        wait_for_status(&app, started.batch_id.as_str(), BatchStatus::Completed).await;

        let response = stream_batches(State(app.clone())).await.into_response();
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        let message = data_line(&first);
        assert_eq!(message["type"], "all_batches");
        let batch = &message["batches"][started.batch_id.as_str()];
        assert_eq!(batch["status"], "completed");
        assert_eq!(batch["generated_count"], 2);
    }

    #[tokio::test]
    async fn updates_follow_the_snapshot() {
        let (app, _mock) = test_app(Duration::ZERO);
        let response = stream_batches(State(app.clone())).await.into_response();
        let mut body = response.into_body().into_data_stream();

        let snapshot = data_line(&body.next().await.unwrap().unwrap());
        assert_eq!(snapshot["type"], "all_batches");
        assert!(snapshot["batches"].as_object().unwrap().is_empty());

        app.supervisor
            .start_batch(BatchConfig {
                target_count: 1,
                ..Default::default()
            })
            .await
            .unwrap();

        let update = data_line(&body.next().await.unwrap().unwrap());
        assert_eq!(update["type"], "batch_update");
        assert_eq!(update["batch"]["status"], "running");
    }
}
