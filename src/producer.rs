use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use crate::coordination::CoordinationStore;
use crate::envelope::Envelope;
use crate::metrics::Metrics;

/// Publishes envelopes, fire-and-forget.
///
/// A publish returns once the broker has accepted the message.  Nothing is
/// retried: an envelope published while no subscriber is connected is gone.
#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn CoordinationStore>,
    metrics: Arc<Metrics>,
}

impl Producer {
    pub fn new(store: Arc<dyn CoordinationStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Serialize `envelope` and publish it on `channel`.  Returns how many
    /// subscribers the broker delivered it to.
    pub async fn publish(&self, channel: &str, envelope: &Envelope) -> Result<u64> {
        let message = envelope.encode()?;
        let receivers = self
            .store
            .publish(channel, &message)
            .await
            .with_context(|| format!("publish envelope {}", envelope.identifier()))?;

        self.metrics.envelopes_published.inc();
        if receivers == 0 {
            self.metrics.publishes_without_receivers.inc();
            warn!(
                %channel,
                identifier = %envelope.identifier(),
                "published with no subscribers connected, message dropped"
            );
        } else {
            debug!(%channel, identifier = %envelope.identifier(), receivers, "envelope published");
        }
        Ok(receivers)
    }

    /// Assign an identifier to `payload` and publish it on `channel`.
    pub async fn publish_payload(&self, channel: &str, payload: Value) -> Result<Envelope> {
        let envelope = Envelope::from_value(payload)?;
        self.publish(channel, &envelope).await?;
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::coordination::memory::MemoryStore;
    use crate::coordination::Delivery;
    use crate::metrics::MetricsRegistry;

    #[tokio::test]
    async fn published_envelope_reaches_subscriber() {
        let store = MemoryStore::new();
        let registry = MetricsRegistry::new();
        let producer = Producer::new(Arc::new(store.clone()), Arc::clone(&registry.metrics));
        let mut sub = store.subscribe("order_updates").await.unwrap();

        let envelope = producer
            .publish_payload("order_updates", json!({"item": "sku-42"}))
            .await
            .unwrap();

        let Some(Delivery::Message(msg)) = sub.next().await else {
            panic!("expected a message");
        };
        assert_eq!(msg.channel, "order_updates");
        assert_eq!(Envelope::decode(&msg.payload).unwrap(), envelope);
        assert_eq!(registry.metrics.envelopes_published.get(), 1);
    }

    #[tokio::test]
    async fn publish_without_subscribers_still_succeeds() {
        let store = MemoryStore::new();
        let registry = MetricsRegistry::new();
        let producer = Producer::new(Arc::new(store), Arc::clone(&registry.metrics));

        let envelope = Envelope::from_value(json!({"item": "sku-42"})).unwrap();
        let receivers = producer.publish("order_updates", &envelope).await.unwrap();

        assert_eq!(receivers, 0);
        assert_eq!(registry.metrics.publishes_without_receivers.get(), 1);
    }

    #[tokio::test]
    async fn non_object_payload_is_rejected_before_publishing() {
        let store = MemoryStore::new();
        let registry = MetricsRegistry::new();
        let producer = Producer::new(Arc::new(store), Arc::clone(&registry.metrics));

        assert!(producer.publish_payload("order_updates", json!("sku-42")).await.is_err());
        assert_eq!(registry.metrics.envelopes_published.get(), 0);
    }
}
