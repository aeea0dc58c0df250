use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::info;

use crate::dispatch::MessageHandler;
use crate::envelope::Envelope;

/// Default handler for `order_updates`: records the order and simulates the
/// inventory adjustment taking `processing_delay`.
pub struct OrderUpdateHandler {
    processing_delay: Duration,
}

impl OrderUpdateHandler {
    pub fn new(processing_delay: Duration) -> Self {
        Self { processing_delay }
    }
}

#[async_trait::async_trait]
impl MessageHandler for OrderUpdateHandler {
    async fn handle(&self, envelope: &Envelope) -> Result<()> {
        let order = envelope.payload();
        anyhow::ensure!(
            order.get("fail") != Some(&Value::Bool(true)),
            "order {} rejected by inventory",
            envelope.identifier()
        );

        let order_json = Value::Object(order.clone());
        info!(
            identifier = %envelope.identifier(),
            fields = order.len(),
            order = %order_json,
            "updating inventory for order"
        );
        tokio::time::sleep(self.processing_delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn logs_the_order_body() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let handler = OrderUpdateHandler::new(Duration::ZERO);
        let envelope = Envelope::from_value(json!({"item": "sku-42"})).unwrap();
        handler.handle(&envelope).await.unwrap();

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("updating inventory for order"));
        assert!(output.contains(r#""item":"sku-42""#));
    }

    #[tokio::test(start_paused = true)]
    async fn takes_the_configured_processing_time() {
        let handler = OrderUpdateHandler::new(Duration::from_millis(1000));
        let envelope = Envelope::from_value(json!({"item": "sku-42"})).unwrap();

        let started = tokio::time::Instant::now();
        handler.handle(&envelope).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn rejects_orders_flagged_to_fail() {
        let handler = OrderUpdateHandler::new(Duration::ZERO);
        let envelope = Envelope::from_value(json!({"item": "sku-42", "fail": true})).unwrap();

        let err = handler.handle(&envelope).await.unwrap_err();
        assert!(err.to_string().contains("rejected"));
    }
}
