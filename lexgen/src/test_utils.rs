//! Test helpers: an in-memory app wired to a mock provider.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FallbackConfig, ProviderConfig, ProviderKind, RateLimitConfig};
use crate::provider::{MockProviderClient, ProviderSet};
use crate::storage::InMemoryStore;
use crate::types::{BatchId, BatchState, BatchStatus};
use crate::{AppState, build_router, build_supervisor};

pub fn create_test_config() -> Config {
    let mut providers = BTreeMap::new();
    providers.insert(
        "mock".to_string(),
        ProviderConfig {
            kind: ProviderKind::OpenaiCompatible,
            base_url: "http://localhost:8081/v1".parse().unwrap(),
            api_key: None,
            timeout: Duration::from_secs(5),
            models: vec!["model-a".to_string(), "model-b".to_string()],
        },
    );

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        providers,
        rate_limits: RateLimitConfig {
            requests_per_minute: 10_000,
            tokens_per_minute: 100_000_000,
            max_jitter: Duration::ZERO,
            expected_completion_tokens: 100,
        },
        fallback: FallbackConfig {
            models: vec!["model-a".to_string(), "model-b".to_string()],
            consecutive_failure_threshold: 5,
            max_switches: 5,
        },
        ..Default::default()
    };
    config.batches.retry_delay = Duration::from_millis(5);
    config.stream.heartbeat_interval = Duration::from_secs(1);
    config
}

/// App state backed by an in-memory store and a mock client serving `model-a` and `model-b`.
///
/// Every mock call sleeps for `latency`, which lets tests catch a batch while it is running.
pub fn test_app(latency: Duration) -> (AppState, MockProviderClient) {
    let config = create_test_config();
    let mock = MockProviderClient::new("mock", &["model-a", "model-b"]).with_latency(latency);
    let providers = ProviderSet::new(vec![Arc::new(mock.clone())]);
    let supervisor = build_supervisor(&config, providers, Arc::new(InMemoryStore::new()), CancellationToken::new());

    let state = AppState::builder().config(config).supervisor(supervisor).build();
    (state, mock)
}

pub fn test_server(latency: Duration) -> (TestServer, AppState, MockProviderClient) {
    let (state, mock) = test_app(latency);
    let router = build_router(state.clone()).expect("Failed to build router");
    let server = TestServer::new(router).expect("Failed to create test server");
    (server, state, mock)
}

/// Poll the supervisor until `batch_id` reaches `status`, failing after five seconds.
pub async fn wait_for_status(state: &AppState, batch_id: &str, status: BatchStatus) -> BatchState {
    let batch_id = BatchId::from(batch_id);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match state.supervisor.get_status(&batch_id).await {
            Ok(batch) if batch.status == status => return batch,
            _ => {}
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "batch {batch_id} did not reach {status} in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
