//! `FluxServer`: axum HTTP and WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use flux_llm::ProviderRegistry;
use flux_selfmod::{ChangeEngine, ChangeRequest};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::code;
use crate::config::ServerConfig;
use crate::handler::SessionHandler;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_ORIGIN_REJECTIONS_TOTAL;
use crate::publish::PublishTarget;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::hub::ConnectionHub;
use crate::websocket::session::run_ws_session;

/// Collaborators the server is assembled from.
pub struct ServerDeps {
    /// Chat providers by id.
    pub providers: ProviderRegistry,
    /// Provider used when a request names none.
    pub default_provider: String,
    /// Change engine; `None` disables self-modification.
    pub engine: Option<Arc<ChangeEngine>>,
    /// Remote publishing; `None` applies approved changes locally only.
    pub publish_target: Option<PublishTarget>,
    /// Prometheus handle rendered on `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Live connections.
    pub hub: Arc<ConnectionHub>,
    /// Inbound message router.
    pub handler: Arc<SessionHandler>,
    /// Registered providers.
    pub providers: Arc<ProviderRegistry>,
    /// Change engine, if enabled.
    pub engine: Option<Arc<ChangeEngine>>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server was created.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Flux server.
pub struct FluxServer {
    state: AppState,
}

impl FluxServer {
    /// Assemble a server from its configuration and collaborators.
    pub fn new(config: ServerConfig, deps: ServerDeps) -> Self {
        let providers = Arc::new(deps.providers);
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let handler = Arc::new(
            SessionHandler::new(
                Arc::clone(&providers),
                deps.default_provider,
                deps.engine.clone(),
                deps.publish_target,
            )
            .with_publish_tracker(shutdown.tracker()),
        );
        let state = AppState {
            hub: Arc::new(ConnectionHub::new(config.outbound_buffer)),
            handler,
            providers,
            engine: deps.engine,
            config: Arc::new(config),
            shutdown,
            start_time: Instant::now(),
            metrics: deps.metrics,
        };
        Self { state }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/providers", get(providers_handler))
            .route("/api/selfmod/history", get(history_handler))
            .route("/api/code/tree", get(code::tree_handler))
            .route("/api/code/file", get(code::file_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let shutdown = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "flux server listening");
        Ok((addr, handle))
    }

    /// Connection hub.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.state.hub
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }
}

/// Body of `GET /api/providers`.
#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    /// Registered chat provider ids, sorted.
    pub llm: Vec<String>,
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.hub.connection_count(),
    ))
}

/// GET /api/providers
async fn providers_handler(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        llm: state.providers.ids(),
    })
}

/// GET /api/selfmod/history
async fn history_handler(State(state): State<AppState>) -> Json<Vec<ChangeRequest>> {
    Json(
        state
            .engine
            .as_ref()
            .map(|engine| engine.history())
            .unwrap_or_default(),
    )
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if !state.config.origin_allowed(origin) {
        warn!(origin = ?origin, "websocket origin rejected");
        counter!(WS_ORIGIN_REJECTIONS_TOTAL).increment(1);
        return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
    }

    let max = state.config.max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| {
            state.shutdown.track(run_ws_session(
                socket,
                state.hub,
                state.handler,
                state.config,
                state.shutdown.token(),
            ))
        })
}
