//! Read-only endpoints describing models, topics and sample types.

use axum::{Json, extract::State};

use crate::AppState;
use crate::api::models::catalog::{ModelsResponse, ProviderModels, SampleTypeResponse, TopicResponse};
use crate::catalog::{SAMPLE_TYPES, TOPICS};

#[utoipa::path(
    get,
    path = "/api/models",
    tag = "catalog",
    summary = "List models",
    description = "Configured providers with the models they serve, and the fallback order.",
    responses((status = 200, description = "Providers and fallback order", body = ModelsResponse))
)]
#[tracing::instrument(skip(state))]
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let providers = state
        .config
        .providers
        .iter()
        .map(|(name, provider)| ProviderModels {
            name: name.clone(),
            kind: provider.kind,
            models: provider.models.clone(),
        })
        .collect();

    Json(ModelsResponse {
        providers,
        fallback_order: state.supervisor.fallback_models().to_vec(),
    })
}

#[utoipa::path(
    get,
    path = "/api/topics",
    tag = "catalog",
    summary = "List topics",
    responses((status = 200, description = "Built-in topics", body = Vec<TopicResponse>))
)]
pub async fn list_topics() -> Json<Vec<TopicResponse>> {
    Json(TOPICS.iter().map(TopicResponse::from).collect())
}

#[utoipa::path(
    get,
    path = "/api/sample-types",
    tag = "catalog",
    summary = "List sample types",
    responses((status = 200, description = "Built-in sample types", body = Vec<SampleTypeResponse>))
)]
pub async fn list_sample_types() -> Json<Vec<SampleTypeResponse>> {
    Json(SAMPLE_TYPES.iter().map(SampleTypeResponse::from).collect())
}
