// ABOUTME: Lifecycle seam for the internal message-routing layer
// ABOUTME: Started after adapter wiring, stopped last during teardown

use async_trait::async_trait;

/// The internal routing layer the adapter feeds. The adapter only owns its
/// lifecycle: start when the adapter comes up, stop after every adapter task
/// has wound down. What it routes is its own business.
#[async_trait]
pub trait RoutingLayer: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// Routing layer that routes nowhere. Used for standalone runs and tests.
#[derive(Debug, Default)]
pub struct NullRouting;

#[async_trait]
impl RoutingLayer for NullRouting {
    async fn start(&self) -> anyhow::Result<()> {
        tracing::debug!("Null routing layer started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::debug!("Null routing layer stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_routing_layer_object_is_send_sync() {
        assert_send_sync::<Box<dyn RoutingLayer>>();
        assert_send_sync::<NullRouting>();
    }

    #[tokio::test]
    async fn test_null_routing_lifecycle() {
        let routing = NullRouting;
        routing.start().await.unwrap();
        routing.stop().await.unwrap();
    }
}
