//! Single-process implementation of [`CoordinationStore`].
//!
//! Selected with `keydb.endpoint: memory://`.  Expiry uses
//! [`tokio::time::Instant`], so tests running with paused time can move a lock
//! past its TTL with `tokio::time::advance`.  Only instances sharing one
//! `MemoryStore` coordinate with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{CoordinationStore, Delivery, InboundMessage, Subscription, SUBSCRIPTION_BUFFER};

/// Per-channel broadcast capacity; slower subscribers lag past this.
const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Entry>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the guard cannot leave `Inner` half-updated;
        // every mutation is a single map operation.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current value of `key`, if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.lock()
            .keys
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryStore {
    async fn publish(&self, channel: &str, payload: &str) -> Result<u64> {
        let inner = self.lock();
        let receivers = match inner.channels.get(channel) {
            // `send` only fails when nobody is subscribed.
            Some(sender) => sender.send(payload.to_string()).unwrap_or(0),
            None => 0,
        };
        Ok(receivers as u64)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut messages = self
            .lock()
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let name = channel.to_string();
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    () = tx.closed() => break,
                    received = messages.recv() => match received {
                        Ok(payload) => Delivery::Message(InboundMessage {
                            channel: name.clone(),
                            payload,
                        }),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(channel = %name, skipped, "subscriber lagged, messages lost");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if tx.send(delivery).await.is_err() {
                    break;
                }
            }
            debug!(channel = %name, "in-memory subscription closed");
        });

        Ok(Subscription::new(channel.to_string(), rx))
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.lock();
        if inner.keys.get(key).is_some_and(|entry| entry.is_live(now)) {
            return Ok(false);
        }
        inner.keys.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete_if_value(&self, key: &str, value: &str) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.lock();
        match inner.keys.get(key) {
            Some(entry) if entry.is_live(now) && entry.value == value => {
                inner.keys.remove(key);
                Ok(true)
            }
            Some(entry) if !entry.is_live(now) => {
                inner.keys.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let store = MemoryStore::new();
        assert_eq!(store.publish("order_updates", "{}").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives_every_message() {
        let store = MemoryStore::new();
        let mut first = store.subscribe("order_updates").await.unwrap();
        let mut second = store.subscribe("order_updates").await.unwrap();

        assert_eq!(store.publish("order_updates", "a").await.unwrap(), 2);
        assert_eq!(store.publish("order_updates", "b").await.unwrap(), 2);

        for sub in [&mut first, &mut second] {
            for expected in ["a", "b"] {
                let delivery = sub.next().await.unwrap();
                assert_eq!(
                    delivery,
                    Delivery::Message(InboundMessage {
                        channel: "order_updates".into(),
                        payload: expected.into(),
                    })
                );
            }
        }
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let store = MemoryStore::new();
        let _orders = store.subscribe("order_updates").await.unwrap();
        assert_eq!(store.publish("inventory_updates", "x").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_if_absent_respects_expiry() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(100);

        assert!(store.set_if_absent("lock:a", "one", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:a", "two", ttl).await.unwrap());
        assert_eq!(store.get("lock:a").as_deref(), Some("one"));

        tokio::time::advance(Duration::from_millis(101)).await;
        assert!(!store.contains_key("lock:a"));
        assert!(store.set_if_absent("lock:a", "two", ttl).await.unwrap());
        assert_eq!(store.get("lock:a").as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn delete_if_value_only_matches_current_value() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);
        store.set_if_absent("lock:a", "one", ttl).await.unwrap();

        assert!(!store.delete_if_value("lock:a", "two").await.unwrap());
        assert!(store.contains_key("lock:a"));
        assert!(store.delete_if_value("lock:a", "one").await.unwrap());
        assert!(!store.contains_key("lock:a"));
        assert!(!store.delete_if_value("lock:a", "one").await.unwrap());
    }
}
