//! Coordination layer backed by KeyDB (Redis-compatible).
//!
//! Everything multiple orderbus instances need to agree on lives in the
//! shared store: the pub/sub channels that carry order envelopes and the
//! `lock:` keyspace used to deduplicate them.  The store is reached through
//! the [`CoordinationStore`] capability trait so that the dispatcher and the
//! lock manager never depend on a concrete client.

pub mod locks;
pub mod memory;
pub mod node;
pub mod redis;

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Deliveries
// ---------------------------------------------------------------------------

/// A raw message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: String,
}

/// Everything a subscription can report to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Message(InboundMessage),
    /// The receiving connection dropped.  Messages published until the
    /// matching [`Delivery::Reconnected`] are lost.
    Disconnected { reason: String },
    Reconnected,
}

/// A live subscription to a single channel.
///
/// The receiving side of a forwarding task that owns the dedicated
/// connection.  Dropping the subscription closes the channel, which makes the
/// task unsubscribe and close its connection.
pub struct Subscription {
    channel: String,
    rx: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(channel: String, rx: mpsc::Receiver<Delivery>) -> Self {
        Self { channel, rx }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next delivery.  `None` means the subscription is closed
    /// and will never deliver again.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Buffer between a forwarding task and its [`Subscription`].
pub(crate) const SUBSCRIPTION_BUFFER: usize = 256;

/// Capabilities the deduplication protocol needs from the shared store.
///
/// Any key/value store with pub/sub and an atomic conditional set with
/// expiry can implement this.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Publish `payload` on `channel`.  Returns the number of subscribers the
    /// broker handed the message to; zero means it was dropped.
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64>;

    /// Open a dedicated receiving connection subscribed to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Atomically create `key = value` with expiry `ttl`, only if `key` does
    /// not exist.  Returns `true` iff this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically delete `key` only if it currently holds `value`.  Returns
    /// `true` iff a key was deleted.
    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool>;

    /// Round-trip to the store, used by health checks.
    async fn ping(&self) -> Result<()>;
}
