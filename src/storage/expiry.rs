//! Background expiration sweeper.
//!
//! Each store gets one sweeper task. It subscribes to updates on the
//! expiration bucket so fresh deadlines that are already due get evicted
//! immediately, and it re-scans the whole bucket on a one second tick to
//! catch deadlines that were in the future when their update arrived.
//!
//! Eviction takes the store's serializing mutex around the purge pair
//! (primary key, then expiration key), so clients never observe a key that
//! has been decided expired. The mutex is never held while waiting on the
//! watch stream.
//!
//! A failed purge is logged and left in place; the next tick retries it.

use super::backend::{KvBackend, WatchEvent};
use super::store::{unix_now, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Interval between full re-scans of the expiration bucket.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A handle to a running sweeper.
///
/// Dropping the handle stops the background task.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper for `store`.
    pub fn start<B: KvBackend>(store: Arc<Store<B>>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(bucket = %store.name(), "expiration sweeper started");
        tokio::spawn(sweeper_loop(store, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the sweeper. Called automatically on drop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop<B: KvBackend>(store: Arc<Store<B>>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(SWEEP_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let mut updates = match store.watch_expirations().await {
            Ok(updates) => updates,
            Err(err) => {
                warn!(bucket = %store.name(), error = %err, "expiration watch unavailable");
                if wait_or_shutdown(&mut shutdown_rx, SWEEP_INTERVAL).await {
                    return;
                }
                continue;
            }
        };

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(bucket = %store.name(), "expiration sweeper stopped");
                        return;
                    }
                }
                event = updates.recv() => {
                    match event {
                        Some(event) => handle_event(&store, event).await,
                        // Watch stream closed; fall back to the outer loop
                        // and resubscribe.
                        None => break,
                    }
                }
                _ = tick.tick() => {
                    sweep_once(&store).await;
                }
            }
        }

        if wait_or_shutdown(&mut shutdown_rx, SWEEP_INTERVAL).await {
            return;
        }
    }
}

/// Reacts to a single expiration-bucket update.
async fn handle_event<B: KvBackend>(store: &Store<B>, event: WatchEvent) {
    // Delete events carry no value; entries that do not parse as a
    // deadline cannot be acted on either way.
    let Some(raw) = event.value else { return };
    let Ok(deadline) = String::from_utf8_lossy(&raw).parse::<i64>() else {
        return;
    };

    if unix_now() >= deadline {
        if let Err(err) = store.purge_expired(&event.key).await {
            warn!(bucket = %store.name(), key = %event.key, error = %err, "expired key purge failed");
        }
    }
}

/// One full pass over the expiration bucket.
async fn sweep_once<B: KvBackend>(store: &Store<B>) {
    let due = match store.overdue_keys(unix_now()).await {
        Ok(due) => due,
        Err(err) => {
            warn!(bucket = %store.name(), error = %err, "expiration scan failed");
            return;
        }
    };

    for key in due {
        if let Err(err) = store.purge_expired(&key).await {
            warn!(bucket = %store.name(), key = %key, error = %err, "expired key purge failed");
        }
    }
}

/// Sleeps for `delay` unless shutdown is signalled first.
///
/// Returns true when the sweeper should exit.
async fn wait_or_shutdown(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_err() || *shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryBackend;
    use super::*;

    async fn open_store() -> Arc<Store<MemoryBackend>> {
        Store::open(MemoryBackend::new(), "sweep-0", false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn evicts_key_once_deadline_passes() {
        let store = open_store().await;
        store.set("k", "v").await.unwrap();
        store.expire("k", 1).await.unwrap();

        let _sweeper = ExpirySweeper::start(Arc::clone(&store));

        // Deadline is one second out; give the tick re-scan time to fire.
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(!store.contains("k").await.unwrap());
        assert!(matches!(
            store.ttl("k").await,
            Err(crate::storage::StoreError::KeyNotFound)
        ));
    }

    #[tokio::test]
    async fn already_due_update_is_evicted_promptly() {
        let store = open_store().await;
        let _sweeper = ExpirySweeper::start(Arc::clone(&store));
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.set("k", "v").await.unwrap();
        store.expire("k", 0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!store.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn keys_without_deadlines_survive() {
        let store = open_store().await;
        store.set("keep", "v").await.unwrap();
        store.set("drop", "v").await.unwrap();
        store.expire("drop", 1).await.unwrap();

        let _sweeper = ExpirySweeper::start(Arc::clone(&store));
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert!(store.contains("keep").await.unwrap());
        assert!(!store.contains("drop").await.unwrap());
    }

    #[tokio::test]
    async fn stops_on_drop() {
        let store = open_store().await;

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&store));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Sweeper is gone; a due deadline set afterwards stays put.
        store.set("k", "v").await.unwrap();
        store.expire("k", -1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(store.contains("k").await.unwrap());
    }
}
