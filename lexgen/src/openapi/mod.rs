//! OpenAPI documentation for the generation API, served by Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::batches::start_batch,
        api::handlers::batches::stop_batch,
        api::handlers::batches::get_status,
        api::handlers::batches::get_history,
        api::handlers::batches::get_stuck_batches,
        api::handlers::stream::stream_batches,
        api::handlers::catalog::list_models,
        api::handlers::catalog::list_topics,
        api::handlers::catalog::list_sample_types,
    ),
    components(
        schemas(
            crate::types::BatchId,
            crate::types::BatchStatus,
            crate::types::BatchConfig,
            crate::types::BatchState,
            crate::types::ModelSwitch,
            crate::types::SwitchReason,
            crate::types::ErrorEntry,
            crate::types::CircuitBreakerSummary,
            crate::types::OpenCircuit,
            crate::types::HalfOpenCircuit,
            crate::types::TopicFailures,
            crate::provider::ErrorKind,
            crate::supervisor::StartedBatch,
            crate::publisher::StreamMessage,
            api::models::batches::StopBatchRequest,
            api::models::batches::StopBatchResponse,
            api::models::batches::BatchListResponse,
            api::models::batches::StatusResponse,
            api::models::catalog::ModelsResponse,
            api::models::catalog::ProviderModels,
            api::models::catalog::TopicResponse,
            api::models::catalog::SampleTypeResponse,
        )
    ),
    tags(
        (name = "batches", description = "Start, stop and monitor generation batches.

Only one batch runs at a time. A running batch falls back through the configured model order when a
model is rate limited, unavailable or keeps failing, and its progress is saved every few samples.

Subscribe to `/api/generate/batch/stream` for live updates instead of polling the status endpoint."),
        (name = "catalog", description = "Models, topics and sample types the generator knows about."),
    ),
    info(
        title = "lexgen API",
        version = "0.4.0",
        description = "Batch generation of legal question and answer samples.

## Errors

Failed requests return a JSON body with `success: false` and an `error` message:

```json
{
  \"success\": false,
  \"error\": \"Batch batch_1730000000_1a2b3c4d is already running\"
}
```"
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::ApiDoc;
    use utoipa::OpenApi;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for expected in [
            "/api/generate/batch/start",
            "/api/generate/batch/stop",
            "/api/generate/batch/status",
            "/api/generate/batch/history",
            "/api/generate/batch/stream",
            "/api/batches/stuck",
            "/api/models",
            "/api/topics",
            "/api/sample-types",
        ] {
            assert!(paths.contains(&expected), "missing {expected}");
        }

        let schemas = &doc.components.as_ref().unwrap().schemas;
        assert!(schemas.contains_key("BatchState"));
        assert!(schemas.contains_key("StreamMessage"));
        assert!(schemas.contains_key("CircuitBreakerSummary"));
    }
}
