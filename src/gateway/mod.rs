// ABOUTME: WebSocket server the chat gateway connects to: bearer token check
// ABOUTME: before upgrade, plus /healthz and Prometheus /metrics endpoints

pub mod connection;

use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::adapter::Adapter;
use crate::metrics;

/// Build the gateway router: the WebSocket endpoint at /, health at /healthz,
/// and Prometheus text at /metrics.
pub fn gateway_router(adapter: Arc<Adapter>, metrics_handle: Arc<PrometheusHandle>) -> Router {
    let ws_routes = Router::new().route("/", get(ws_handler)).with_state(adapter);

    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics_handle);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .merge(ws_routes)
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until the adapter's cancellation token fires.
pub async fn serve(adapter: Arc<Adapter>, metrics_handle: Arc<PrometheusHandle>) -> Result<()> {
    let addr = adapter.config().bind_addr();
    let cancel = adapter.cancel_token();
    let app = gateway_router(adapter, metrics_handle);

    tracing::info!(addr = %addr, "Starting gateway WebSocket server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .context("Gateway server error")?;

    tracing::info!("Gateway WebSocket server stopped");
    Ok(())
}

/// WebSocket upgrade handler. Auth happens here, before the upgrade, so a bad
/// token gets a plain HTTP 401 instead of a doomed socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(adapter): State<Arc<Adapter>>,
) -> Response {
    if let Some(expected) = adapter.config().expected_authorization() {
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected.as_str()) {
            tracing::warn!(peer = %peer, "Gateway connection rejected: bad or missing bearer token");
            metrics::record_auth_failure();
            return (StatusCode::UNAUTHORIZED, "Unauthorized\n").into_response();
        }
    }

    let max_frame_bytes = adapter.config().gateway.max_frame_bytes;
    ws.max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| connection::handle_gateway_socket(socket, peer, adapter))
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Renders Prometheus text format from the installed recorder.
async fn metrics_handler(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}
