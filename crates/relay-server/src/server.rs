use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relay_bridge::Bridge;
use relay_core::errors::BridgeError;
use relay_core::events::ClientEvent;
use relay_core::ids::ThreadId;

use crate::connection;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub webhook_path: String,
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9091,
            webhook_path: "/webhook".to_string(),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route(webhook_path, post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind, serve, and start background tasks. Returns a handle to shut down.
pub async fn start(config: ServerConfig, bridge: Arc<Bridge>) -> Result<ServerHandle, std::io::Error> {
    let shutdown = CancellationToken::new();
    let sweep = bridge.start_sweep_task(config.sweep_interval, shutdown.clone());

    let router = build_router(AppState { bridge }, &config.webhook_path);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(addr = %local_addr, webhook_path = %config.webhook_path, "relay server started");

    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        port: local_addr.port(),
        shutdown,
        server,
        _sweep: sweep,
    })
}

/// Handle returned by `start()`; keeps background tasks alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    _sweep: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and let in-flight requests finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task ended abnormally");
        }
    }
}

#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
}

/// WebSocket upgrade handler. `?threadId=` joins an existing thread.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let thread_id = params
        .thread_id
        .filter(|t| !t.is_empty())
        .map(ThreadId::from_raw);
    ws.on_upgrade(move |socket| handle_socket(socket, state, thread_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, thread_id: Option<ThreadId>) {
    let (conn, rx) = match state.bridge.connect(thread_id) {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting connection");
            return;
        }
    };
    tracing::info!(connection_id = %conn.id, thread_id = %conn.thread_id, "client connected");
    conn.send(&ClientEvent::Connected {
        thread_id: conn.thread_id.clone(),
    });

    connection::run(socket, conn, rx, state.bridge).await;
}

/// Processor callback. Always acknowledged; processing happens in the background.
async fn webhook_handler(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => {
            let task = state.bridge.receive(payload);
            tokio::spawn(async move {
                match task.await {
                    Ok(outcome) => tracing::debug!(?outcome, "webhook processed"),
                    Err(e) => tracing::error!(error = %e, "webhook processing task failed"),
                }
            });
        }
        Err(e) => {
            let err = BridgeError::Parse(e.to_string());
            tracing::warn!(error = %err, bytes = body.len(), "webhook body is not JSON");
        }
    }
    Json(json!({"received": true}))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.bridge.stats();
    Json(json!({
        "status": "healthy",
        "connections": stats.connections,
        "threads": stats.threads,
        "pendingJobs": stats.pending_jobs,
        "metrics": state.bridge.metrics().snapshot(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_bridge::BridgeConfig;
    use relay_processor::MockProcessor;
    use relay_telemetry::MetricsRecorder;

    fn bridge() -> Arc<Bridge> {
        Arc::new(Bridge::new(
            Arc::new(MockProcessor::default()),
            BridgeConfig::default(),
            Arc::new(MetricsRecorder::new()),
        ))
    }

    #[test]
    fn build_router_with_custom_webhook_path() {
        let _router = build_router(AppState { bridge: bridge() }, "/hooks/agent");
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let handle = start(config, bridge()).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["pendingJobs"], 0);

        handle.shutdown().await;
    }
}
