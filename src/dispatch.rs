//! Deduplicating message dispatcher.
//!
//! Every running instance subscribes to the same channel and receives every
//! envelope.  Before handing an envelope to the business handler the
//! dispatcher takes the lock `<lock_prefix><identifier>`; only the instance
//! that creates the lock runs the handler, the others log a skipped
//! duplicate.  The lock is released after the handler finishes, whether it
//! succeeded, failed or panicked.
//!
//! Deduplication only lasts as long as the lock: a handler that runs past the
//! TTL lets a late duplicate through, and a message redelivered after the
//! lock is gone looks brand new.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::coordination::locks::LockManager;
use crate::coordination::{Delivery, InboundMessage, Subscription};
use crate::envelope::Envelope;
use crate::metrics::Metrics;

// ---------------------------------------------------------------------------
// Handler seam
// ---------------------------------------------------------------------------

/// Business logic run for each deduplicated envelope.
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: &Envelope) -> Result<()>;
}

/// What happened to a single inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// This instance held the lock and the handler succeeded.
    Processed { identifier: String },
    /// This instance held the lock and the handler returned an error or
    /// panicked.  The lock was released all the same.
    HandlerFailed { identifier: String },
    /// Another instance holds the lock.
    SkippedDuplicate { identifier: String },
    /// The message was not a valid envelope.
    Malformed,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    locks: LockManager,
    handler: Arc<dyn MessageHandler>,
    lock_prefix: String,
    lock_ttl: Duration,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        locks: LockManager,
        handler: Arc<dyn MessageHandler>,
        lock_prefix: impl Into<String>,
        lock_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            locks,
            handler,
            lock_prefix: lock_prefix.into(),
            lock_ttl,
            metrics,
        }
    }

    pub fn lock_key(&self, identifier: &str) -> String {
        format!("{}{identifier}", self.lock_prefix)
    }

    /// Consume `subscription` until it closes.
    ///
    /// Messages are handled one at a time in delivery order.  Per-message
    /// failures are logged and never stop the loop; the only way out is the
    /// subscription ending, which is reported as an error.
    pub async fn run(&self, mut subscription: Subscription) -> Result<()> {
        info!(
            channel = %subscription.channel(),
            holder = %self.locks.holder(),
            lock_ttl_ms = self.lock_ttl.as_millis() as u64,
            "dispatcher started"
        );

        while let Some(delivery) = subscription.next().await {
            match delivery {
                Delivery::Message(message) => {
                    if let Err(e) = self.dispatch(&message).await {
                        error!(
                            error = %format!("{e:#}"),
                            channel = %message.channel,
                            "message dropped: lock store unavailable"
                        );
                    }
                }
                Delivery::Disconnected { reason } => {
                    self.metrics.transport_disconnects.inc();
                    error!(
                        %reason,
                        channel = %subscription.channel(),
                        "subscriber connection lost, messages published before reconnect are lost"
                    );
                }
                Delivery::Reconnected => {
                    info!(channel = %subscription.channel(), "subscriber connection re-established");
                }
            }
        }

        anyhow::bail!("subscription to {} closed", subscription.channel())
    }

    /// Run one inbound message through the dedup protocol.
    ///
    /// Returns `Err` only when the lock could not be attempted at all (store
    /// unreachable); the message is then neither processed nor recorded as a
    /// duplicate.
    pub async fn dispatch(&self, message: &InboundMessage) -> Result<DispatchOutcome> {
        self.metrics.messages_received.inc();
        debug!(channel = %message.channel, payload = %message.payload, "received message");

        let envelope = match Envelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.malformed_messages.inc();
                warn!(
                    error = %format!("{e:#}"),
                    channel = %message.channel,
                    "dropping malformed message"
                );
                return Ok(DispatchOutcome::Malformed);
            }
        };

        let identifier = envelope.identifier().to_string();
        let lock_key = self.lock_key(&identifier);

        if !self.locks.acquire(&lock_key, self.lock_ttl).await? {
            self.metrics.duplicates_skipped.inc();
            warn!(%identifier, %lock_key, "skipping duplicate message");
            return Ok(DispatchOutcome::SkippedDuplicate { identifier });
        }

        info!(%identifier, channel = %message.channel, "processing message");
        let succeeded = self.invoke_handler(envelope).await;

        if let Err(e) = self.locks.release(&lock_key).await {
            error!(
                error = %format!("{e:#}"),
                %lock_key,
                "lock release failed, key will expire after its TTL"
            );
        }

        if succeeded {
            self.metrics.messages_processed.inc();
            Ok(DispatchOutcome::Processed { identifier })
        } else {
            Ok(DispatchOutcome::HandlerFailed { identifier })
        }
    }

    /// Run the handler on its own task so a panic surfaces as a join error
    /// instead of unwinding through the dispatcher and skipping the release.
    async fn invoke_handler(&self, envelope: Envelope) -> bool {
        let identifier = envelope.identifier().to_string();
        let handler = Arc::clone(&self.handler);
        let started = Instant::now();

        let result = tokio::spawn(async move { handler.handle(&envelope).await }).await;

        let elapsed = started.elapsed();
        self.metrics
            .handler_duration_seconds
            .observe(elapsed.as_secs_f64());
        if elapsed >= self.lock_ttl {
            warn!(
                %identifier,
                elapsed_ms = elapsed.as_millis() as u64,
                lock_ttl_ms = self.lock_ttl.as_millis() as u64,
                "handler outlived its lock, another instance may have processed this message too"
            );
        }

        match result {
            Ok(Ok(())) => {
                debug!(%identifier, elapsed_ms = elapsed.as_millis() as u64, "handler finished");
                true
            }
            Ok(Err(e)) => {
                self.metrics.handler_failures.inc();
                error!(error = %format!("{e:#}"), %identifier, "handler failed");
                false
            }
            Err(join_error) => {
                self.metrics.handler_failures.inc();
                error!(error = %join_error, %identifier, "handler panicked");
                false
            }
        }
    }
}
