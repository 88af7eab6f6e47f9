//! Order event fan-out to the notification/UI layer.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::events::OrderEvent;

#[async_trait]
pub trait OrderNotifier: Send + Sync + 'static {
    /// Best effort: failures are logged, never returned.
    async fn publish(&self, event: &OrderEvent);
}

/// Publishes JSON events on `<prefix>.<event>`, e.g. `orders.status_changed`.
pub struct NatsNotifier {
    client: async_nats::Client,
    prefix: String,
}

impl NatsNotifier {
    pub fn new(client: async_nats::Client) -> Self { Self { client, prefix: "orders".to_string() } }
}

#[async_trait]
impl OrderNotifier for NatsNotifier {
    async fn publish(&self, event: &OrderEvent) {
        let subject = format!("{}.{}", self.prefix, event.subject());
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode order event");
                return;
            }
        };
        if let Err(e) = self.client.publish(subject.clone(), payload.into()).await {
            warn!(%subject, order_id = event.order_id(), error = %e, "Failed to publish order event");
        }
    }
}

pub struct NoopNotifier;

#[async_trait]
impl OrderNotifier for NoopNotifier {
    async fn publish(&self, event: &OrderEvent) {
        debug!(order_id = event.order_id(), subject = event.subject(), "Order event (no bus configured)");
    }
}
