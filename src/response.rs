// ABOUTME: Correlation pool matching outbound commands to gateway responses
// ABOUTME: Pending entries are fulfilled by echo id, timed out by a sweeper, exactly once

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::AdapterError;
use crate::metrics;

/// How a pending command ended. Callers only ever see the payload or a
/// Timeout error, but the distinction matters for logging.
#[derive(Debug)]
enum Completion {
    Response(Value),
    TimedOut,
    Cancelled,
}

struct PendingRequest {
    slot: oneshot::Sender<Completion>,
    registered_at: Instant,
    deadline: Instant,
}

/// Handle returned by register; resolves when the matching response arrives
/// or the entry is evicted. Never hangs past pool teardown.
pub struct ResponseHandle {
    id: String,
    rx: oneshot::Receiver<Completion>,
}

impl ResponseHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> Result<Value, AdapterError> {
        match self.rx.await {
            Ok(Completion::Response(payload)) => Ok(payload),
            Ok(Completion::TimedOut) => Err(AdapterError::Timeout { id: self.id }),
            Ok(Completion::Cancelled) => {
                tracing::debug!(id = %self.id, "Pending command cancelled during shutdown");
                Err(AdapterError::Timeout { id: self.id })
            }
            // Pool dropped without completing the slot; same contract as a
            // timeout rather than an await that never returns.
            Err(_) => Err(AdapterError::Timeout { id: self.id }),
        }
    }
}

/// Table of outstanding commands awaiting correlated responses.
///
/// Each correlation id is pending at most once; an entry leaves the table
/// exactly one way (response, timeout sweep, or cancel_all), and its waiter
/// is completed at that moment.
pub struct ResponsePool {
    pending: Mutex<HashMap<String, PendingRequest>>,
    timeout: Duration,
}

impl ResponsePool {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Register a correlation id and get a handle to await the response.
    /// Fails if the id is already pending; the existing entry is untouched.
    pub async fn register(&self, id: &str) -> Result<ResponseHandle, AdapterError> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(id) {
            return Err(AdapterError::DuplicateCorrelation { id: id.to_string() });
        }

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        pending.insert(
            id.to_string(),
            PendingRequest {
                slot: tx,
                registered_at: now,
                deadline: now + self.timeout,
            },
        );
        metrics::set_pending_requests(pending.len());

        Ok(ResponseHandle {
            id: id.to_string(),
            rx,
        })
    }

    /// Complete the pending entry for `id` with a response payload.
    ///
    /// No pending entry (already timed out, evicted, or never registered) is
    /// expected under race with the sweeper and is dropped at debug level.
    pub async fn fulfill(&self, id: &str, payload: Value) {
        let entry = {
            let mut pending = self.pending.lock().await;
            let entry = pending.remove(id);
            metrics::set_pending_requests(pending.len());
            entry
        };

        match entry {
            Some(request) => {
                // The waiter may have dropped its handle; nothing to do then.
                let _ = request.slot.send(Completion::Response(payload));
            }
            None => {
                tracing::debug!(id = %id, "Response without a pending command, dropping");
                metrics::record_orphan_response();
            }
        }
    }

    /// Remove an entry without completing it. Used when the command frame
    /// never made it onto the wire.
    pub async fn evict(&self, id: &str) {
        let mut pending = self.pending.lock().await;
        pending.remove(id);
        metrics::set_pending_requests(pending.len());
    }

    /// Evict every entry whose deadline has passed, completing its waiter
    /// with a timeout. Returns how many were evicted.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock().await;
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, request)| request.deadline <= now)
                .map(|(id, _)| id.clone())
                .collect();
            let expired = ids
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|request| (id, request)))
                .collect();
            metrics::set_pending_requests(pending.len());
            expired
        };

        let count = expired.len();
        for (id, request) in expired {
            tracing::warn!(
                id = %id,
                age_ms = request.registered_at.elapsed().as_millis() as u64,
                "Pending command timed out, evicting"
            );
            metrics::record_command_timeout();
            let _ = request.slot.send(Completion::TimedOut);
        }
        count
    }

    /// Drain the table and wake every waiter; used at shutdown so nobody
    /// hangs on a response that can no longer arrive.
    pub async fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut pending = self.pending.lock().await;
            let drained = pending.drain().collect();
            metrics::set_pending_requests(0);
            drained
        };

        let count = drained.len();
        for (_, request) in drained {
            let _ = request.slot.send(Completion::Cancelled);
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    /// Sweep cadence: short enough that no entry overshoots its deadline by
    /// more than one tick, even with sub-second timeouts.
    pub fn sweep_interval(&self) -> Duration {
        self.timeout.min(Duration::from_secs(1))
    }
}

/// Background eviction loop; one per adapter, stopped by the token.
pub async fn run_sweeper(pool: Arc<ResponsePool>, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(pool.sweep_interval());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                pool.sweep_expired().await;
            }
        }
    }
    tracing::debug!("Response sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_fulfill() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let handle = pool.register("cmd-1").await.unwrap();

        pool.fulfill("cmd-1", json!({"data": "ok"})).await;

        let payload = handle.wait().await.unwrap();
        assert_eq!(payload["data"], "ok");
        assert_eq!(pool.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let first = pool.register("cmd-1").await.unwrap();

        match pool.register("cmd-1").await {
            Err(AdapterError::DuplicateCorrelation { id }) => assert_eq!(id, "cmd-1"),
            Err(other) => panic!("Expected DuplicateCorrelation, got {}", other),
            Ok(_) => panic!("Expected DuplicateCorrelation, got a handle"),
        }

        // The original entry still works.
        pool.fulfill("cmd-1", json!({"n": 1})).await;
        assert_eq!(first.wait().await.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_fulfill_unknown_id_is_noop() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let _handle = pool.register("cmd-1").await.unwrap();

        pool.fulfill("never-registered", json!({})).await;
        assert_eq!(pool.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_and_waiter_times_out() {
        let pool = ResponsePool::new(Duration::from_millis(10));
        let handle = pool.register("cmd-1").await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.sweep_expired().await, 1);
        assert_eq!(pool.pending_count().await, 0);

        match handle.wait().await {
            Err(AdapterError::Timeout { id }) => assert_eq!(id, "cmd-1"),
            other => panic!("Expected Timeout, got {:?}", other),
        }

        // A late response after eviction is silently dropped.
        pool.fulfill("cmd-1", json!({"data": "late"})).await;
        assert_eq!(pool.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_spares_unexpired_entries() {
        let pool = ResponsePool::new(Duration::from_secs(60));
        let handle = pool.register("cmd-1").await.unwrap();

        assert_eq!(pool.sweep_expired().await, 0);
        assert!(pool.is_pending("cmd-1").await);

        pool.fulfill("cmd-1", json!({"data": "ok"})).await;
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let first = pool.register("cmd-1").await.unwrap();
        let second = pool.register("cmd-2").await.unwrap();

        pool.fulfill("cmd-2", json!({"n": 2})).await;
        pool.fulfill("cmd-1", json!({"n": 1})).await;

        assert_eq!(second.wait().await.unwrap()["n"], 2);
        assert_eq!(first.wait().await.unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_every_waiter() {
        let pool = ResponsePool::new(Duration::from_secs(60));
        let first = pool.register("cmd-1").await.unwrap();
        let second = pool.register("cmd-2").await.unwrap();

        assert_eq!(pool.cancel_all().await, 2);
        assert_eq!(pool.pending_count().await, 0);

        assert!(matches!(
            first.wait().await,
            Err(AdapterError::Timeout { .. })
        ));
        assert!(matches!(
            second.wait().await,
            Err(AdapterError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_fulfill_with_dropped_handle_does_not_panic() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let handle = pool.register("cmd-1").await.unwrap();
        drop(handle);

        pool.fulfill("cmd-1", json!({"data": "ok"})).await;
        assert_eq!(pool.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_evict_removes_without_completing() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let handle = pool.register("cmd-1").await.unwrap();

        pool.evict("cmd-1").await;
        assert_eq!(pool.pending_count().await, 0);

        // The waiter resolves to Timeout because the sender side is gone.
        assert!(matches!(
            handle.wait().await,
            Err(AdapterError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_id_reuse_after_fulfillment() {
        let pool = ResponsePool::new(Duration::from_secs(5));
        let first = pool.register("cmd-1").await.unwrap();
        pool.fulfill("cmd-1", json!({"round": 1})).await;
        assert_eq!(first.wait().await.unwrap()["round"], 1);

        let second = pool.register("cmd-1").await.unwrap();
        pool.fulfill("cmd-1", json!({"round": 2})).await;
        assert_eq!(second.wait().await.unwrap()["round"], 2);
    }

    #[tokio::test]
    async fn test_sweeper_task_evicts_and_stops() {
        let pool = Arc::new(ResponsePool::new(Duration::from_millis(50)));
        let cancel = CancellationToken::new();
        let sweeper = tokio::spawn(run_sweeper(Arc::clone(&pool), cancel.clone()));

        let handle = pool.register("cmd-1").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .expect("sweeper should evict well before two seconds");
        assert!(matches!(result, Err(AdapterError::Timeout { .. })));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), sweeper)
            .await
            .expect("sweeper should stop on cancel")
            .unwrap();
    }
}
