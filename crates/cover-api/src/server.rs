//! API server implementation.
//!
//! Provides health, ready, metrics and badge endpoints, and runs the overflow
//! dispatcher next to the HTTP listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use cover_core::{KvStore, MemoryBus, MemoryKv, MessageBus, Result};
use cover_flow::dispatcher::Dispatcher;
use cover_flow::orchestrator::Orchestrator;
use cover_flow::queue::BusOverflowQueue;
use cover_flow::runner::{ContainerRunner, Runner};

use crate::config::Config;

const READY_CHECK_KEY: &str = "cover:ready-check";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
}

/// Readiness check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadyResponse {
    /// Service readiness status.
    pub ready: bool,
    /// Optional message about readiness state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared application state for all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Coverage orchestrator.
    pub orchestrator: Orchestrator,
    kv: Arc<dyn KvStore>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("orchestrator", &"<Orchestrator>")
            .field("kv", &"<KvStore>")
            .finish()
    }
}

impl AppState {
    /// Creates application state around an orchestrator and its store.
    #[must_use]
    pub fn new(config: Config, orchestrator: Orchestrator, kv: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            orchestrator,
            kv,
        }
    }
}

/// Health check endpoint handler.
///
/// Shallow liveness check; dependencies are not touched.
async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Readiness check endpoint handler.
///
/// A read of a missing key is enough to validate the store round-trip.
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.kv.get(READY_CHECK_KEY).await {
        Ok(_) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                message: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                ready: false,
                message: Some(format!("store check failed: {e}")),
            }),
        ),
    }
}

/// The cover.run API server.
pub struct Server {
    config: Config,
    kv: Arc<dyn KvStore>,
    orchestrator: Orchestrator,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("kv", &"<KvStore>")
            .field("orchestrator", &"<Orchestrator>")
            .finish()
    }
}

impl Server {
    /// Creates a server with in-memory backends and the container runner.
    ///
    /// # Errors
    ///
    /// Returns an error if the container runner cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        ServerBuilder::new().config(config).build()
    }

    /// Creates a new `ServerBuilder`.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the orchestrator shared by the routes and the dispatcher.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    fn create_router(&self) -> Router {
        let state = Arc::new(AppState::new(
            self.config.clone(),
            self.orchestrator.clone(),
            Arc::clone(&self.kv),
        ));
        let metrics_layer = middleware::from_fn(crate::metrics::metrics_middleware);

        Router::new()
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/metrics", get(crate::metrics::serve_metrics))
            .merge(crate::routes::badge_routes())
            .nest("/api/v1", crate::routes::api_v1_routes())
            // Metrics outermost for timing, then trace.
            .layer(TraceLayer::new_for_http())
            .layer(metrics_layer)
            .with_state(state)
    }

    /// Starts the dispatcher and the HTTP listener, and blocks until shutdown.
    ///
    /// Shutdown is triggered by Ctrl-C; the admission gate is closed so the
    /// dispatcher stops taking overflow jobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the overflow queue
    /// cannot be subscribed, or the listener cannot bind.
    pub async fn serve(&self) -> Result<()> {
        self.config.validate()?;

        crate::metrics::init_metrics();

        let dispatcher = Dispatcher::new(self.orchestrator.clone())
            .start()
            .await
            .map_err(|e| cover_core::Error::Internal {
                message: format!("failed to start overflow dispatcher: {e}"),
            })?;

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let router = self.create_router();

        tracing::info!(
            http_port = self.config.http_port,
            q_max = self.config.q_max,
            default_tag = %self.config.default_tag,
            "Starting cover.run API server"
        );

        let listener =
            tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| cover_core::Error::Internal {
                    message: format!("failed to bind to {addr}: {e}"),
                })?;

        let gate = self.orchestrator.gate().clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::warn!(error = %e, "failed to listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
                tracing::info!("shutdown signal received");
                gate.close();
            })
            .await
            .map_err(|e| cover_core::Error::Internal {
                message: format!("server error: {e}"),
            })?;

        if let Err(e) = dispatcher.await {
            tracing::warn!(error = %e, "overflow dispatcher ended abnormally");
        }
        Ok(())
    }

    /// Creates a test router for the server.
    ///
    /// Routes share this server's orchestrator, so repeated calls observe
    /// the same cache and admission state.
    #[doc(hidden)]
    pub fn test_router(&self) -> Router {
        self.create_router()
    }
}

/// Builder for constructing a server.
pub struct ServerBuilder {
    config: Config,
    kv: Arc<dyn KvStore>,
    bus: Arc<dyn MessageBus>,
    runner: Option<Arc<dyn Runner>>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("kv", &"<KvStore>")
            .field("bus", &"<MessageBus>")
            .field("runner", &self.runner.as_ref().map(|_| "<Runner>"))
            .finish()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            kv: Arc::new(MemoryKv::new()),
            bus: Arc::new(MemoryBus::new()),
            runner: None,
        }
    }
}

impl ServerBuilder {
    /// Creates a new server builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets the HTTP port.
    #[must_use]
    pub fn http_port(mut self, port: u16) -> Self {
        self.config.http_port = port;
        self
    }

    /// Sets the number of simultaneous coverage runs.
    #[must_use]
    pub fn q_max(mut self, q_max: usize) -> Self {
        self.config.q_max = q_max;
        self
    }

    /// Sets the key-value store backing the cache and registry.
    ///
    /// Defaults to an in-memory store, which is per-process.
    #[must_use]
    pub fn kv_store(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = kv;
        self
    }

    /// Sets the bus carrying the overflow queue.
    #[must_use]
    pub fn message_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    /// Sets the runner. Defaults to [`ContainerRunner`] built from the config.
    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Builds the server.
    ///
    /// # Errors
    ///
    /// Returns an error if no runner was set and the container runner
    /// cannot be built.
    pub fn build(self) -> Result<Server> {
        let runner: Arc<dyn Runner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(
                ContainerRunner::new(
                    self.config.image_repo.clone(),
                    self.config.docker_bin.clone(),
                )
                .map_err(|e| cover_core::Error::Internal {
                    message: format!("failed to build container runner: {e}"),
                })?,
            ),
        };
        let queue = Arc::new(BusOverflowQueue::new(
            self.bus,
            self.config.queue_channel.clone(),
        ));
        let orchestrator = Orchestrator::new(
            self.config.orchestrator_config(),
            Arc::clone(&self.kv),
            queue,
            runner,
        );
        Ok(Server {
            config: self.config,
            kv: self.kv,
            orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use cover_test_utils::{RecordingKv, ScriptedRunner};

    fn test_server(kv: RecordingKv) -> Result<Server> {
        Ok(Server::builder()
            .kv_store(Arc::new(kv))
            .runner(Arc::new(ScriptedRunner::with_coverage(80.0)))
            .build()?)
    }

    #[tokio::test]
    async fn health_is_ok() -> Result<()> {
        let router = test_server(RecordingKv::new())?.test_router();
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await
            .map_err(|err| -> anyhow::Error { match err {} })?;

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await?;
        let health: HealthResponse =
            serde_json::from_slice(&bytes).context("parse health response")?;
        assert_eq!(health.status, "ok");
        Ok(())
    }

    #[tokio::test]
    async fn ready_reflects_store_health() -> Result<()> {
        let kv = RecordingKv::new();
        let server = test_server(kv.clone())?;

        let response = server
            .test_router()
            .oneshot(Request::builder().uri("/ready").body(Body::empty())?)
            .await
            .map_err(|err| -> anyhow::Error { match err {} })?;
        assert_eq!(response.status(), StatusCode::OK);

        kv.inject_failure(READY_CHECK_KEY);
        let response = server
            .test_router()
            .oneshot(Request::builder().uri("/ready").body(Body::empty())?)
            .await
            .map_err(|err| -> anyhow::Error { match err {} })?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), 1024).await?;
        let ready: ReadyResponse = serde_json::from_slice(&bytes)?;
        assert!(!ready.ready);
        assert!(ready.message.is_some());
        Ok(())
    }

    #[test]
    fn builder_derives_orchestrator_settings() -> Result<()> {
        let server = Server::builder()
            .q_max(2)
            .runner(Arc::new(ScriptedRunner::with_coverage(80.0)))
            .build()?;
        assert_eq!(server.orchestrator().gate().capacity(), 2);
        assert_eq!(server.config().q_max, 2);
        Ok(())
    }

    #[test]
    fn default_runner_is_built_from_config() -> Result<()> {
        let config = Config {
            docker_bin: "/usr/local/bin/docker".to_string(),
            ..Config::default()
        };
        let server = Server::new(config)?;
        assert_eq!(server.config().docker_bin, "/usr/local/bin/docker");
        Ok(())
    }
}
