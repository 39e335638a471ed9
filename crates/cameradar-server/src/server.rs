use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use cameradar_core::ids::ConnectionId;
use cameradar_telemetry::MetricsRecorder;

use crate::connection::{self, ConnectionConfig, ConnectionContext, ConnectionHandle};
use crate::errors::UpgradeError;
use crate::pipeline::{DispatchPipeline, ScanDriver};
use crate::registry::ConnectionRegistry;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Ports scanned when a request omits them.
    pub default_ports: Vec<u16>,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7000,
            default_ports: vec![554, 8554],
            connection: ConnectionConfig::default(),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<ConnectionRegistry>,
    pipeline: DispatchPipeline,
    metrics: Arc<MetricsRecorder>,
    default_ports: Arc<[u16]>,
    connection: ConnectionConfig,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener, start the scan pipeline, and serve until shut down.
pub async fn start(
    config: ServerConfig,
    driver: ScanDriver,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "cameradar server listening");

    let shutdown = CancellationToken::new();
    let registry = Arc::new(ConnectionRegistry::new());

    let (pipeline, pipeline_task) = DispatchPipeline::spawn(
        driver,
        Arc::clone(&registry),
        Arc::clone(&metrics),
        shutdown.clone(),
    );

    let state = AppState {
        registry,
        pipeline,
        metrics,
        default_ports: config.default_ports.into(),
        connection: config.connection,
        shutdown: shutdown.clone(),
        started_at: Utc::now(),
    };

    let router = build_router(state);
    let graceful = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { graceful.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        shutdown,
        server: server_task,
        pipeline: pipeline_task,
    })
}

/// Handle returned by `start()`. Dropping it leaves the server running.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    pipeline: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting, close every connection, and wait for the pipeline to
    /// finish the scan in progress.
    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task failed");
        }
        if let Err(e) = self.pipeline.await {
            tracing::warn!(error = %e, "pipeline task failed");
        }
    }
}

async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => ws
            .on_failed_upgrade(|e| tracing::warn!(error = %e, "websocket upgrade failed"))
            .on_upgrade(move |socket| accept(socket, state))
            .into_response(),
        Err(rejection) => {
            let err = UpgradeError::from(rejection);
            tracing::warn!(status = %err.status, reason = %err.reason, "rejected websocket upgrade");
            state.metrics.counter_inc("upgrade.rejected.total", &[], 1);
            err.into_response()
        }
    }
}

/// Register a fresh connection and run it until it closes.
async fn accept(socket: WebSocket, state: AppState) {
    let id = ConnectionId::new();
    let (handle, rx) = ConnectionHandle::new(id.clone(), state.connection.send_queue_capacity);
    state.registry.register(&handle);
    state
        .metrics
        .gauge_set("connections.active", &[], state.registry.count() as f64);
    tracing::info!(connection_id = %id, "client connected");

    let ctx = ConnectionContext {
        registry: Arc::clone(&state.registry),
        pipeline: state.pipeline.clone(),
        default_ports: Arc::clone(&state.default_ports),
        config: state.connection.clone(),
        shutdown: state.shutdown.clone(),
    };
    connection::serve_connection(socket, Arc::clone(&handle), rx, ctx).await;

    state
        .metrics
        .gauge_set("connections.active", &[], state.registry.count() as f64);
    tracing::info!(
        connection_id = %id,
        state = ?handle.state(),
        dropped = handle.dropped_count(),
        "client disconnected"
    );
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = Utc::now().signed_duration_since(state.started_at);
    Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "queueDepth": state.pipeline.queue_depth(),
        "uptimeSecs": uptime.num_seconds(),
        "metrics": state.metrics.snapshot(),
    }))
}
