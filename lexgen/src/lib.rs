//! # lexgen: batch generation of legal Q&A samples
//!
//! `lexgen` drives long-running batches that ask LLM providers for legal question and answer
//! samples and stores each sample as it arrives. One batch runs at a time. The server exposes an
//! HTTP API to start, stop and inspect batches, plus a server-sent event stream of live status.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer.
//! Samples and batch checkpoints go to PostgreSQL when a database is configured, and to an
//! in-memory store otherwise.
//!
//! ### Core Components
//!
//! The **supervisor** ([`supervisor`]) owns the batch lifecycle. It validates a start request,
//! registers the batch and spawns a **worker** ([`worker`]) task for it. The worker is the only
//! writer of its batch's state: each iteration waits on the shared [`rate_limiter`], calls the
//! current model through a [`provider`] client, appends the sample to the [`storage`] layer and
//! publishes the new snapshot.
//!
//! Failed calls are classified by the provider layer and handed to the [`fallback`] policy, which
//! decides whether to retry, switch to the next model in the configured order, or give up.
//!
//! The **registry** ([`registry`]) holds the live snapshot of every batch this process has seen,
//! and the **publisher** ([`publisher`]) fans snapshots out to stream subscribers. A background
//! **stuck detector** ([`detector`]) flags running batches that stopped making progress.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use lexgen::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = lexgen::config::Args::parse();
//!     let config = Config::load(&args)?;
//!     lexgen::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod detector;
pub mod errors;
pub mod fallback;
mod openapi;
pub mod provider;
pub mod publisher;
pub mod rate_limiter;
pub mod registry;
pub mod storage;
pub mod supervisor;
pub mod telemetry;
pub mod types;
pub mod worker;

#[cfg(test)]
pub mod test_utils;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::fallback::FallbackPolicy;
use crate::openapi::ApiDoc;
use crate::provider::ProviderSet;
use crate::publisher::StatusPublisher;
use crate::rate_limiter::RateLimiter;
use crate::registry::BatchRegistry;
use crate::storage::{DatasetStore, InMemoryStore, PostgresStore};
use crate::supervisor::Supervisor;
use crate::worker::{BatchWorker, WorkerSettings};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .supervisor(supervisor)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub supervisor: Supervisor,
}

/// Get the lexgen database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Wire the worker's collaborators together and wrap them in a supervisor.
///
/// `shutdown` is the parent of every batch's cancellation token.
pub fn build_supervisor(
    config: &Config,
    providers: ProviderSet,
    store: Arc<dyn DatasetStore>,
    shutdown: CancellationToken,
) -> Supervisor {
    let registry = BatchRegistry::new();
    let publisher = StatusPublisher::new(registry.clone(), config.stream.channel_capacity);
    let worker = BatchWorker {
        providers,
        limiter: Arc::new(RateLimiter::new(&config.rate_limits)),
        policy: FallbackPolicy::new(&config.fallback),
        store,
        registry,
        publisher,
        settings: WorkerSettings::from_config(config),
    };
    Supervisor::new(worker, shutdown, config.stuck_detector.threshold)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    // tower-http rejects `*` inside an origin list
    let allow_origin = if config.cors_allowed_origins.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors_allowed_origins {
            origins.push(origin.parse::<HeaderValue>()?);
        }
        AllowOrigin::list(origins)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE]))
}

/// Build the application router: the generation API, `/healthz`, and API docs at `/docs`.
///
/// # Errors
///
/// Returns an error if a configured CORS origin is not a valid header value.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/generate/batch/start", post(api::handlers::batches::start_batch))
        .route("/generate/batch/stop", post(api::handlers::batches::stop_batch))
        .route("/generate/batch/status", get(api::handlers::batches::get_status))
        .route("/generate/batch/history", get(api::handlers::batches::get_history))
        .route("/generate/batch/stream", get(api::handlers::stream::stream_batches))
        .route("/batches/stuck", get(api::handlers::batches::get_stuck_batches))
        .route("/models", get(api::handlers::catalog::list_models))
        .route("/topics", get(api::handlers::catalog::list_topics))
        .route("/sample-types", get(api::handlers::catalog::list_sample_types));

    let cors_layer = create_cors_layer(&state.config)?;

    let router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api", api_routes)
        .with_state(state)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(cors_layer)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

/// Background tasks running alongside the HTTP server.
///
/// Dropping this cancels the shutdown token, which stops the stuck detector and every running batch.
pub struct BackgroundServices {
    supervisor: Supervisor,
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: CancellationToken,
    // Pub so that we can disarm it if we want to
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    fn start(config: &Config, supervisor: Supervisor, shutdown_token: CancellationToken) -> Self {
        let drop_guard = shutdown_token.clone().drop_guard();
        let mut background_tasks = Vec::new();

        if config.stuck_detector.enabled {
            let handle = tokio::spawn(detector::stuck_detector_task(
                supervisor.registry().clone(),
                supervisor.publisher().clone(),
                config.stuck_detector.interval,
                config.stuck_detector.threshold,
                shutdown_token.clone(),
            ));
            background_tasks.push(handle);
        } else {
            info!("Stuck batch detector disabled");
        }

        Self {
            supervisor,
            background_tasks,
            shutdown_token,
            drop_guard: Some(drop_guard),
        }
    }

    /// Stop running batches, wait for their final checkpoints, then stop the background tasks.
    pub async fn shutdown(mut self) {
        self.supervisor.shutdown().await;

        if let Some(guard) = self.drop_guard.take() {
            guard.disarm();
        }
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// The lexgen server.
///
/// 1. **Create**: [`Application::new`] opens the store, builds provider clients and starts the
///    stuck detector
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and starts handling requests
/// 3. **Shutdown**: when the shutdown future resolves, running batches are stopped and persisted
pub struct Application {
    router: Router,
    config: Config,
    pool: Option<sqlx::PgPool>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting lexgen with configuration: {:#?}", config);

        let (store, pool): (Arc<dyn DatasetStore>, _) = match &config.database {
            Some(database) => {
                let store = PostgresStore::connect(database).await?;
                let pool = store.pool().clone();
                (Arc::new(store), Some(pool))
            }
            None => {
                info!("No database configured, samples are kept in memory");
                (Arc::new(InMemoryStore::new()), None)
            }
        };

        let providers = ProviderSet::from_config(&config)?;
        let shutdown_token = CancellationToken::new();
        let supervisor = build_supervisor(&config, providers, store, shutdown_token.clone());
        let bg_services = BackgroundServices::start(&config, supervisor.clone(), shutdown_token);

        let app_state = AppState::builder().config(config.clone()).supervisor(supervisor).build();
        let router = build_router(app_state)?;

        Ok(Self {
            router,
            config,
            pool,
            bg_services,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, BackgroundServices) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.bg_services)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "lexgen listening on http://{}, available at http://localhost:{}",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Stop batches first so their final checkpoints reach the database
        self.bg_services.shutdown().await;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::create_test_config;
    use crate::types::BatchConfig;
    use axum::http::StatusCode;
    use std::time::Duration;

    #[tokio::test]
    async fn application_serves_health_and_docs() {
        let app = Application::new(create_test_config()).await.unwrap();
        let (server, bg_services) = app.into_test_server();

        let response = server.get("/healthz").await;
        response.assert_status_ok();
        response.assert_text("OK");

        server.get("/docs").await.assert_status_ok();

        let response = server.get("/api/models").await;
        response.assert_status_ok();

        bg_services.shutdown().await;
    }

    #[tokio::test]
    async fn cors_allows_configured_origin() {
        let mut config = create_test_config();
        config.cors_allowed_origins = vec!["http://localhost:5173".to_string()];
        let app = Application::new(config).await.unwrap();
        let (server, bg_services) = app.into_test_server();

        let response = server
            .get("/api/topics")
            .add_header(http::header::ORIGIN, HeaderValue::from_static("http://localhost:5173"))
            .await;
        response.assert_status_ok();
        assert_eq!(
            response.header(http::header::ACCESS_CONTROL_ALLOW_ORIGIN),
            "http://localhost:5173"
        );

        bg_services.shutdown().await;
    }

    #[test]
    fn invalid_cors_origin_is_rejected() {
        let mut config = create_test_config();
        config.cors_allowed_origins = vec!["bad\norigin".to_string()];
        assert!(create_cors_layer(&config).is_err());
    }

    #[tokio::test]
    async fn background_shutdown_stops_running_batch() {
        let config = create_test_config();
        let mock = provider::MockProviderClient::new("mock", &["model-a", "model-b"]).with_latency(Duration::from_secs(30));
        let token = CancellationToken::new();
        let supervisor = build_supervisor(
            &config,
            ProviderSet::new(vec![Arc::new(mock)]),
            Arc::new(InMemoryStore::new()),
            token.clone(),
        );
        let bg_services = BackgroundServices::start(&config, supervisor.clone(), token);

        let started = supervisor
            .start_batch(BatchConfig {
                target_count: 10,
                ..Default::default()
            })
            .await
            .unwrap();

        bg_services.shutdown().await;

        let state = supervisor.get_status(&started.batch_id).await.unwrap();
        assert_eq!(state.status, types::BatchStatus::Stopped);
        assert_eq!(state.generated_count, 0);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = Application::new(create_test_config()).await.unwrap();
        let (server, bg_services) = app.into_test_server();
        server.get("/api/nope").await.assert_status(StatusCode::NOT_FOUND);
        bg_services.shutdown().await;
    }
}
