// ABOUTME: Liveness watchdog for the active gateway session
// ABOUTME: Force-closes the connection when no frames arrive past the idle threshold

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::AdapterError;
use crate::metrics;
use crate::session::GatewaySession;

/// Close code sent when the session is force-closed for inactivity.
pub const IDLE_CLOSE_CODE: u16 = 1011;
/// Reason string carried in the idle close frame.
pub const IDLE_CLOSE_REASON: &str = "No messages received for a long time";

/// Ceiling on the gap between liveness checks, whatever the heartbeat config.
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Watching,
    Stopped,
}

/// Monitor one admitted session until it dies or goes silent.
///
/// The gateway can drop without ever sending a close frame; when the session
/// has seen no frames for longer than `idle_timeout`, the watchdog closes it
/// one-sidedly so the gateway's reconnect logic kicks in. Runs in state
/// Watching and always terminates in Stopped: session closed, idle close
/// issued (even if the close itself fails), or cancellation.
pub async fn run_watchdog(
    session: Arc<GatewaySession>,
    heartbeat_interval: Duration,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> WatchdogState {
    let cadence = heartbeat_interval.min(MAX_CHECK_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(cadence) => {}
        }

        if !session.is_open() {
            tracing::info!("Gateway session closed, stopping connection watchdog");
            break;
        }

        let idle = session.idle_time();
        if idle > idle_timeout {
            tracing::error!(
                idle_ms = idle.as_millis() as u64,
                threshold_ms = idle_timeout.as_millis() as u64,
                "No frames from gateway past idle threshold, closing session to force a reconnect"
            );
            metrics::record_watchdog_close();
            if let Err(e) = session.close(IDLE_CLOSE_CODE, IDLE_CLOSE_REASON).await {
                let err = AdapterError::Close(e);
                tracing::error!(code = err.code(), error = %err, "Failed to close idle session");
            }
            break;
        }
    }

    tracing::debug!("Connection watchdog stopped");
    WatchdogState::Stopped
}
