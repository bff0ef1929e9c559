// ABOUTME: The single active gateway session and its transport capability trait
// ABOUTME: Tracks admission time and the last-frame instant the watchdog reads

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// What the adapter needs from the underlying connection. One implementation
/// per transport binding; liveness checks and closes go through here instead
/// of probing library-specific connection state.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Write one text frame.
    async fn send_text(&self, text: String) -> anyhow::Result<()>;

    /// Send a close frame with the given code and reason.
    async fn close(&self, code: u16, reason: &str) -> anyhow::Result<()>;

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// The single active gateway connection.
///
/// The last-frame instant is stored as elapsed milliseconds from an origin
/// captured at construction, so the watchdog reads it atomically without a
/// lock while the read loop updates it on every parsed frame.
pub struct GatewaySession {
    transport: Arc<dyn SessionTransport>,
    admitted_at: DateTime<Utc>,
    origin: Instant,
    last_frame_ms: AtomicI64,
}

impl GatewaySession {
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self {
            transport,
            admitted_at: Utc::now(),
            origin: Instant::now(),
            last_frame_ms: AtomicI64::new(0),
        }
    }

    pub fn admitted_at(&self) -> DateTime<Utc> {
        self.admitted_at
    }

    /// Record that a frame was just parsed on this session.
    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as i64;
        self.last_frame_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last parsed frame (admission counts as frame zero).
    pub fn idle_time(&self) -> Duration {
        let now = self.origin.elapsed().as_millis() as i64;
        let last = self.last_frame_ms.load(Ordering::Relaxed);
        Duration::from_millis((now - last).max(0) as u64)
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub async fn send_text(&self, text: String) -> anyhow::Result<()> {
        self.transport.send_text(text).await
    }

    pub async fn close(&self, code: u16, reason: &str) -> anyhow::Result<()> {
        self.transport.close(code, reason).await
    }
}

// =============================================================================
// WebSocket transport binding
// =============================================================================

type WsSink = SplitSink<WebSocket, Message>;

/// SessionTransport over the write half of an axum WebSocket.
///
/// The read half stays in the connection loop, which calls mark_closed when
/// the stream ends so is_open reflects remote closes too.
pub struct WsTransport {
    sink: Mutex<WsSink>,
    closed: AtomicBool,
}

impl WsTransport {
    pub fn new(sink: WsSink) -> Self {
        Self {
            sink: Mutex::new(sink),
            closed: AtomicBool::new(false),
        }
    }

    /// Called by the read loop when the peer closed or the stream errored.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionTransport for WsTransport {
    async fn send_text(&self, text: String) -> anyhow::Result<()> {
        if !self.is_open() {
            anyhow::bail!("gateway session is closed");
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .context("websocket send failed")
    }

    async fn close(&self, code: u16, reason: &str) -> anyhow::Result<()> {
        // First close wins; later calls are no-ops.
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sink = self.sink.lock().await;
        sink.send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await
        .context("websocket close failed")
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

/// Shared slot holding the active session. The connection loop installs into
/// it, the command sender reads from it, and a superseding connection swaps
/// it. Guards are never held across an await.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<Arc<GatewaySession>>>>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently active session, if any.
    pub async fn current(&self) -> Option<Arc<GatewaySession>> {
        self.inner.read().await.clone()
    }

    /// Install a new session, returning the one it superseded.
    pub async fn install(&self, session: Arc<GatewaySession>) -> Option<Arc<GatewaySession>> {
        self.inner.write().await.replace(session)
    }

    /// Clear the slot if it still holds `session`. The read loop calls this
    /// on exit; a superseding connection may already have swapped the slot,
    /// in which case the newer session stays put.
    pub async fn clear_if_current(&self, session: &Arc<GatewaySession>) {
        let mut guard = self.inner.write().await;
        if let Some(current) = guard.as_ref() {
            if Arc::ptr_eq(current, session) {
                *guard = None;
            }
        }
    }
}
