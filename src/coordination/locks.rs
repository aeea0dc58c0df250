use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use super::CoordinationStore;
use crate::metrics::Metrics;

/// Acquires and releases per-message locks in the shared store.
///
/// Every lock this manager creates stores its `holder` token, and release
/// only deletes a key that still carries that token.  Once a lock has expired
/// and been taken by another instance, a late release from the previous
/// holder is a no-op instead of stealing the new holder's lock.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn CoordinationStore>,
    holder: String,
    metrics: Arc<Metrics>,
}

impl LockManager {
    pub fn new(store: Arc<dyn CoordinationStore>, holder: String, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            holder,
            metrics,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Attempt to acquire `key` for `ttl` using an atomic `SET NX PX`.
    ///
    /// Returns `true` if this call created the lock, `false` if it is already
    /// held.  Store errors are returned as-is; they mean neither.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let acquired = match self.store.set_if_absent(key, &self.holder, ttl).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.metrics.lock_errors.inc();
                return Err(e.context(format!("acquire lock {key}")));
            }
        };
        if acquired {
            self.metrics.lock_acquisitions.inc();
        } else {
            self.metrics.lock_denials.inc();
        }
        debug!(%key, holder = %self.holder, acquired, ?ttl, "acquire_lock");
        Ok(acquired)
    }

    /// Release `key` if this manager still holds it.
    ///
    /// Releasing a lock that has expired, was never acquired, or now belongs
    /// to another holder leaves the store untouched and is not an error.
    pub async fn release(&self, key: &str) -> Result<()> {
        let released = match self.store.delete_if_value(key, &self.holder).await {
            Ok(released) => released,
            Err(e) => {
                self.metrics.lock_errors.inc();
                return Err(e.context(format!("release lock {key}")));
            }
        };
        if released {
            debug!(%key, holder = %self.holder, "lock released");
        } else {
            self.metrics.lock_release_noops.inc();
            warn!(%key, holder = %self.holder, "lock release: key missing or owned by another holder");
        }
        Ok(())
    }
}
