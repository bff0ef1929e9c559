// ABOUTME: Per-connection read loop: classify inbound frames, feed events to
// ABOUTME: the queue, fulfill correlated responses, track liveness

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapter::Adapter;
use crate::dispatch::EventSender;
use crate::error::AdapterError;
use crate::frame::{classify, Classified};
use crate::metrics;
use crate::response::ResponsePool;
use crate::session::{GatewaySession, SessionTransport, WsTransport};

/// Drive one admitted gateway connection until the peer disconnects, the
/// socket errors, or shutdown cancels us.
pub(crate) async fn handle_gateway_socket(
    socket: WebSocket,
    peer: SocketAddr,
    adapter: Arc<Adapter>,
) {
    let (sink, mut stream) = socket.split();
    let transport = Arc::new(WsTransport::new(sink));
    let session = Arc::new(GatewaySession::new(
        Arc::clone(&transport) as Arc<dyn SessionTransport>
    ));
    adapter.install_session(Arc::clone(&session)).await;
    tracing::info!(peer = %peer, "Gateway connected");

    let queue_tx = adapter.queue_sender();
    let pool = adapter.pool();
    let cancel = adapter.cancel_token();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = session.close(1000, "server shutting down").await {
                    tracing::debug!(error = %e, "Failed to close session during shutdown");
                }
                break;
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        route_frame(text.as_str(), &session, &queue_tx, &pool).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => route_frame(text, &session, &queue_tx, &pool).await,
                        Err(e) => {
                            tracing::error!(error = %e, "Dropping non-UTF8 binary frame");
                            metrics::record_decode_error();
                        }
                    },
                    // Protocol-level ping/pong, answered by the library.
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(peer = %peer, "Gateway closed the connection");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(peer = %peer, error = %e, "Gateway socket error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    transport.mark_closed();
    adapter.clear_session(&session).await;
    tracing::info!(peer = %peer, "Gateway disconnected");
}

/// Classify one inbound frame and hand it to the right place. Only frames
/// that actually parse count toward session liveness; undecodable input is
/// logged and dropped without touching the clock.
async fn route_frame(
    raw: &str,
    session: &GatewaySession,
    queue_tx: &EventSender,
    pool: &ResponsePool,
) {
    match classify(raw) {
        Ok(Classified::Event(frame)) => {
            session.touch();
            metrics::record_frame_received(frame.kind.as_str());
            if queue_tx.send(frame).is_err() {
                tracing::warn!("Event queue closed; dropping frame");
            }
        }
        Ok(Classified::Response(response)) => {
            session.touch();
            metrics::record_frame_received("response");
            match response.echo {
                Some(echo) => pool.fulfill(&echo, response.payload).await,
                None => {
                    tracing::debug!("Response frame without correlation id dropped");
                    metrics::record_orphan_response();
                }
            }
        }
        Err(err @ AdapterError::UnknownKind { .. }) => {
            session.touch();
            tracing::warn!(code = err.code(), error = %err, "Dropping frame of unrecognized kind");
            metrics::record_unknown_kind();
        }
        Err(err) => {
            tracing::error!(code = err.code(), error = %err, "Failed to decode inbound frame");
            metrics::record_decode_error();
        }
    }
}
