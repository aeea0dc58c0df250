use std::sync::Arc;

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by orderbus.
pub struct Metrics {
    // -- dispatch --
    pub messages_received: Counter,
    pub messages_processed: Counter,
    pub duplicates_skipped: Counter,
    pub malformed_messages: Counter,
    pub handler_failures: Counter,
    pub handler_duration_seconds: Histogram,

    // -- locks --
    pub lock_acquisitions: Counter,
    pub lock_denials: Counter,
    pub lock_release_noops: Counter,
    pub lock_errors: Counter,

    // -- publishing --
    pub envelopes_published: Counter,
    pub publishes_without_receivers: Counter,

    // -- transport --
    pub transport_disconnects: Counter,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let messages_received = Counter::default();
        registry.register(
            "orderbus_messages_received",
            "Messages received on subscribed channels",
            messages_received.clone(),
        );

        let messages_processed = Counter::default();
        registry.register(
            "orderbus_messages_processed",
            "Messages whose handler completed successfully",
            messages_processed.clone(),
        );

        let duplicates_skipped = Counter::default();
        registry.register(
            "orderbus_duplicates_skipped",
            "Messages skipped because another instance held their lock",
            duplicates_skipped.clone(),
        );

        let malformed_messages = Counter::default();
        registry.register(
            "orderbus_malformed_messages",
            "Messages dropped because the envelope could not be decoded",
            malformed_messages.clone(),
        );

        let handler_failures = Counter::default();
        registry.register(
            "orderbus_handler_failures",
            "Handler invocations that returned an error or panicked",
            handler_failures.clone(),
        );

        let handler_duration_seconds = Histogram::new(exponential_buckets(0.005, 2.0, 14));
        registry.register(
            "orderbus_handler_duration_seconds",
            "Handler latency in seconds",
            handler_duration_seconds.clone(),
        );

        let lock_acquisitions = Counter::default();
        registry.register(
            "orderbus_lock_acquisitions",
            "Message locks acquired",
            lock_acquisitions.clone(),
        );

        let lock_denials = Counter::default();
        registry.register(
            "orderbus_lock_denials",
            "Message lock attempts denied because the key existed",
            lock_denials.clone(),
        );

        let lock_release_noops = Counter::default();
        registry.register(
            "orderbus_lock_release_noops",
            "Releases that found the lock expired or held by someone else",
            lock_release_noops.clone(),
        );

        let lock_errors = Counter::default();
        registry.register(
            "orderbus_lock_errors",
            "Lock operations that failed against the store",
            lock_errors.clone(),
        );

        let envelopes_published = Counter::default();
        registry.register(
            "orderbus_envelopes_published",
            "Envelopes accepted by the broker",
            envelopes_published.clone(),
        );

        let publishes_without_receivers = Counter::default();
        registry.register(
            "orderbus_publishes_without_receivers",
            "Envelopes published while no subscriber was connected",
            publishes_without_receivers.clone(),
        );

        let transport_disconnects = Counter::default();
        registry.register(
            "orderbus_transport_disconnects",
            "Subscriber connection losses",
            transport_disconnects.clone(),
        );

        Self {
            messages_received,
            messages_processed,
            duplicates_skipped,
            malformed_messages,
            handler_failures,
            handler_duration_seconds,
            lock_acquisitions,
            lock_denials,
            lock_release_noops,
            lock_errors,
            envelopes_published,
            publishes_without_receivers,
            transport_disconnects,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`crate::AppState`].
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)
            .map_err(|e| anyhow::anyhow!("metrics encoding failed: {e}"))?;
        Ok(buf)
    }
}
