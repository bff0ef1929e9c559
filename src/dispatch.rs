// ABOUTME: Ingress queue and the single-consumer dispatch loop over it
// ABOUTME: Events reach handlers strictly in arrival order, one at a time

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::AdapterError;
use crate::frame::{EventFrame, EventKind};
use crate::metrics;

/// Pause after each dispatched entry, bounding dispatch rate so a burst of
/// events cannot starve other scheduled work.
pub const DISPATCH_PAUSE: Duration = Duration::from_millis(50);

/// Where classified events land. One entry point per event kind; the
/// dispatcher awaits each call to completion before pulling the next entry.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn handle_meta_event(&self, payload: Value) -> anyhow::Result<()>;
    async fn handle_message(&self, payload: Value) -> anyhow::Result<()>;
    async fn handle_notice(&self, payload: Value) -> anyhow::Result<()>;
}

/// Sink that just logs each event. Default wiring for standalone runs.
#[derive(Debug, Default)]
pub struct TraceSink;

#[async_trait]
impl EventSink for TraceSink {
    async fn handle_meta_event(&self, payload: Value) -> anyhow::Result<()> {
        tracing::debug!(payload = %payload, "Meta event");
        Ok(())
    }

    async fn handle_message(&self, payload: Value) -> anyhow::Result<()> {
        tracing::info!(payload = %payload, "Message event");
        Ok(())
    }

    async fn handle_notice(&self, payload: Value) -> anyhow::Result<()> {
        tracing::info!(payload = %payload, "Notice event");
        Ok(())
    }
}

pub type EventSender = mpsc::UnboundedSender<EventFrame>;
pub type EventReceiver = mpsc::UnboundedReceiver<EventFrame>;

/// Unbounded FIFO between the connection read loop and the dispatcher.
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Single consumer of the ingress queue. Runs until cancelled or until every
/// sender is gone. Handler failures are isolated to their entry; the loop
/// never stops because of one.
pub async fn run_dispatcher(
    mut rx: EventReceiver,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        dispatch_one(sink.as_ref(), frame).await;
        tokio::time::sleep(DISPATCH_PAUSE).await;
    }
    tracing::debug!("Event dispatcher stopped");
}

async fn dispatch_one(sink: &dyn EventSink, frame: EventFrame) {
    let kind = frame.kind;
    let result = match kind {
        EventKind::MetaEvent => sink.handle_meta_event(frame.payload).await,
        EventKind::Message => sink.handle_message(frame.payload).await,
        EventKind::Notice => sink.handle_notice(frame.payload).await,
    };

    match result {
        Ok(()) => metrics::record_event_dispatched(kind.as_str()),
        Err(cause) => {
            let err = AdapterError::Handler {
                kind: kind.as_str(),
                cause,
            };
            tracing::error!(
                code = err.code(),
                kind = kind.as_str(),
                error = %err,
                "Event handler failed, continuing with next entry"
            );
            metrics::record_handler_error(kind.as_str());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records (kind, payload) pairs in the order handlers ran.
    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(String, Value)>>,
        fail_messages: bool,
    }

    impl RecordingSink {
        fn failing_messages() -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                fail_messages: true,
            }
        }

        fn record(&self, kind: &str, payload: Value) {
            self.seen.lock().unwrap().push((kind.to_string(), payload));
        }

        fn kinds(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|(kind, _)| kind.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn handle_meta_event(&self, payload: Value) -> anyhow::Result<()> {
            self.record("meta_event", payload);
            Ok(())
        }

        async fn handle_message(&self, payload: Value) -> anyhow::Result<()> {
            if self.fail_messages {
                anyhow::bail!("message handler exploded");
            }
            self.record("message", payload);
            Ok(())
        }

        async fn handle_notice(&self, payload: Value) -> anyhow::Result<()> {
            self.record("notice", payload);
            Ok(())
        }
    }

    fn frame(kind: EventKind, seq: u64) -> EventFrame {
        EventFrame {
            kind,
            payload: json!({"post_type": kind.as_str(), "seq": seq}),
        }
    }

    #[tokio::test]
    async fn test_events_dispatched_in_fifo_order() {
        let (tx, rx) = event_queue();
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(rx, Arc::clone(&sink) as _, cancel.clone()));

        tx.send(frame(EventKind::Message, 1)).unwrap();
        tx.send(frame(EventKind::MetaEvent, 2)).unwrap();
        tx.send(frame(EventKind::Notice, 3)).unwrap();
        tx.send(frame(EventKind::Message, 4)).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        let seen = sink.seen.lock().unwrap();
        let seqs: Vec<u64> = seen
            .iter()
            .map(|(_, payload)| payload["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_loop() {
        let (tx, rx) = event_queue();
        let sink = Arc::new(RecordingSink::failing_messages());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(rx, Arc::clone(&sink) as _, cancel.clone()));

        tx.send(frame(EventKind::Message, 1)).unwrap();
        tx.send(frame(EventKind::Notice, 2)).unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        // The failed message is dropped; the notice after it still ran.
        assert_eq!(sink.kinds(), vec!["notice"]);
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_queue_closes() {
        let (tx, rx) = event_queue();
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(rx, sink as _, cancel));

        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher should exit when all senders drop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_stops_on_cancel() {
        let (_tx, rx) = event_queue();
        let sink = Arc::new(RecordingSink::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_dispatcher(rx, sink as _, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("dispatcher should exit on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn test_trace_sink_accepts_all_kinds() {
        let sink = TraceSink;
        sink.handle_meta_event(json!({"a": 1})).await.unwrap();
        sink.handle_message(json!({"b": 2})).await.unwrap();
        sink.handle_notice(json!({"c": 3})).await.unwrap();
    }
}
