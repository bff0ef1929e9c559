// ABOUTME: Outbound command path: register a correlation id, write the frame,
// ABOUTME: await the matching response; registrations are evicted on failure

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::frame::OutboundCommand;
use crate::metrics;
use crate::response::ResponsePool;
use crate::session::SessionSlot;

/// Sends commands to the connected gateway and awaits their correlated
/// responses. Cheap to clone; hand one to anything that needs to talk
/// upstream.
#[derive(Clone)]
pub struct CommandSender {
    slot: SessionSlot,
    pool: Arc<ResponsePool>,
}

impl CommandSender {
    pub fn new(slot: SessionSlot, pool: Arc<ResponsePool>) -> Self {
        Self { slot, pool }
    }

    /// Send a command under a fresh correlation id and wait for its response
    /// or timeout.
    pub async fn send_command(&self, action: &str, params: Value) -> Result<Value> {
        let echo = Uuid::new_v4().to_string();
        self.send_command_with_echo(action, params, &echo).await
    }

    /// Send a command under a caller-chosen correlation id.
    ///
    /// The id is registered before the write so the response cannot race past
    /// us. If there is no active session or the write fails, the registration
    /// is evicted and the id is immediately reusable.
    pub async fn send_command_with_echo(
        &self,
        action: &str,
        params: Value,
        echo: &str,
    ) -> Result<Value> {
        let handle = self.pool.register(echo).await?;

        let session = match self.slot.current().await {
            Some(session) => session,
            None => {
                self.pool.evict(echo).await;
                anyhow::bail!("no active gateway session");
            }
        };

        let command = OutboundCommand::new(action, params, echo);
        let text = match serde_json::to_string(&command) {
            Ok(text) => text,
            Err(e) => {
                self.pool.evict(echo).await;
                return Err(e).context("Failed to serialize outbound command");
            }
        };

        if let Err(e) = session.send_text(text).await {
            self.pool.evict(echo).await;
            return Err(e).context("Failed to write command to gateway");
        }

        tracing::debug!(action = %action, echo = %echo, "Command sent to gateway");
        metrics::record_command_sent(action);

        Ok(handle.wait().await?)
    }
}
