// ABOUTME: Composition root wiring sessions, dispatcher, response pool,
// ABOUTME: watchdog, and routing lifecycle; owns coordinated shutdown

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::dispatch::{event_queue, run_dispatcher, EventReceiver, EventSender, EventSink};
use crate::error::AdapterError;
use crate::metrics;
use crate::outbound::CommandSender;
use crate::response::{run_sweeper, ResponsePool};
use crate::routing::RoutingLayer;
use crate::session::{GatewaySession, SessionSlot};
use crate::watchdog::run_watchdog;

/// Close sent to an old session when a new connection takes its place.
const SUPERSEDE_CLOSE_CODE: u16 = 1000;
const SUPERSEDE_CLOSE_REASON: &str = "superseded by new connection";

/// Everything the adapter runs, under one cancellation token and one task
/// tracker. Connections install sessions into it, callers send commands
/// through it, and shutdown tears it all down in order.
pub struct Adapter {
    config: Config,
    slot: SessionSlot,
    queue_tx: EventSender,
    // Taken once by start(); holding it here keeps new() synchronous.
    queue_rx: Mutex<Option<EventReceiver>>,
    pool: Arc<ResponsePool>,
    sink: Arc<dyn EventSink>,
    routing: Arc<dyn RoutingLayer>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    shutdown_started: AtomicBool,
}

impl Adapter {
    pub fn new(config: Config, sink: Arc<dyn EventSink>, routing: Arc<dyn RoutingLayer>) -> Self {
        let (queue_tx, queue_rx) = event_queue();
        let pool = Arc::new(ResponsePool::new(config.response_timeout()));
        Self {
            config,
            slot: SessionSlot::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            pool,
            sink,
            routing,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            shutdown_started: AtomicBool::new(false),
        }
    }

    /// Start the routing layer and the background tasks. Call once.
    pub async fn start(&self) -> Result<()> {
        let queue_rx = self
            .queue_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .context("Adapter already started")?;

        self.routing
            .start()
            .await
            .context("Failed to start routing layer")?;

        let sink = Arc::clone(&self.sink);
        let cancel = self.cancel.clone();
        self.tracker
            .spawn(async move { run_dispatcher(queue_rx, sink, cancel).await });

        let pool = Arc::clone(&self.pool);
        let cancel = self.cancel.clone();
        self.tracker.spawn(run_sweeper(pool, cancel));

        tracing::info!("Adapter started");
        Ok(())
    }

    /// Install a freshly admitted session. Any previous session is closed
    /// politely; its read loop will see the close and unwind on its own.
    pub async fn install_session(&self, session: Arc<GatewaySession>) {
        if let Some(old) = self.slot.install(Arc::clone(&session)).await {
            tracing::info!("Existing gateway session superseded by new connection");
            metrics::record_session_superseded();
            tokio::spawn(async move {
                if let Err(e) = old.close(SUPERSEDE_CLOSE_CODE, SUPERSEDE_CLOSE_REASON).await {
                    tracing::debug!(error = %e, "Failed to close superseded session");
                }
            });
        }

        metrics::record_session_opened();
        let heartbeat = self.config.heartbeat_interval();
        let idle_timeout = self.config.idle_timeout();
        let cancel = self.cancel.clone();
        self.tracker
            .spawn(async move { run_watchdog(session, heartbeat, idle_timeout, cancel).await });
    }

    /// Drop the slot entry for a session whose read loop has ended, unless a
    /// newer session already replaced it.
    pub async fn clear_session(&self, session: &Arc<GatewaySession>) {
        self.slot.clear_if_current(session).await;
    }

    /// Whether a gateway session is currently installed.
    pub async fn has_session(&self) -> bool {
        self.slot.current().await.is_some()
    }

    pub fn command_sender(&self) -> CommandSender {
        CommandSender::new(self.slot.clone(), Arc::clone(&self.pool))
    }

    pub fn queue_sender(&self) -> EventSender {
        self.queue_tx.clone()
    }

    pub fn pool(&self) -> Arc<ResponsePool> {
        Arc::clone(&self.pool)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tear everything down: cancel tasks, wake pending waiters, wait out the
    /// grace period, then stop the routing layer. Never hangs and never
    /// fails; a second call is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutdown already in progress");
            return;
        }

        tracing::info!("Beginning graceful shutdown");
        self.cancel.cancel();

        let cancelled = self.pool.cancel_all().await;
        if cancelled > 0 {
            tracing::info!(count = cancelled, "Cancelled pending command waiters");
        }

        self.tracker.close();
        let grace = self.config.grace_period();
        if timeout(grace, self.tracker.wait()).await.is_err() {
            let err = AdapterError::Shutdown(format!(
                "tasks still running after {}s grace period",
                grace.as_secs()
            ));
            tracing::warn!(code = err.code(), error = %err, "Abandoning remaining tasks");
        }

        if let Err(e) = self.routing.stop().await {
            let err = AdapterError::Shutdown(format!("routing layer stop failed: {e:#}"));
            tracing::error!(code = err.code(), error = %err, "Routing layer did not stop cleanly");
        }

        tracing::info!("Graceful shutdown complete");
    }
}
