//! In-memory [`KvBackend`] used by tests.
//!
//! Buckets are plain hash maps behind a mutex. Watchers get a bounded
//! channel per subscription; events that do not fit are dropped, which the
//! sweeper tolerates because its periodic re-scan covers missed updates.

use super::backend::{BackendError, KvBackend, WatchEvent};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const WATCH_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    buckets: HashMap<String, HashMap<String, Bytes>>,
    watchers: HashMap<String, Vec<mpsc::Sender<WatchEvent>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(state: &mut State, bucket: &str, event: WatchEvent) {
        if let Some(senders) = state.watchers.get_mut(bucket) {
            senders.retain(|tx| !tx.is_closed());
            for tx in senders.iter() {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

impl KvBackend for MemoryBackend {
    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        let entries = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
        entries.insert(key.to_string(), value.clone());
        Self::notify(
            &mut state,
            bucket,
            WatchEvent {
                key: key.to_string(),
                value: Some(value),
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, BackendError> {
        let state = self.inner.lock().unwrap();
        let entries = state
            .buckets
            .get(bucket)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn purge(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        let entries = state
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
        entries.remove(key);
        Self::notify(
            &mut state,
            bucket,
            WatchEvent {
                key: key.to_string(),
                value: None,
            },
        );
        Ok(())
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, BackendError> {
        let state = self.inner.lock().unwrap();
        let entries = state
            .buckets
            .get(bucket)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
        Ok(entries.keys().cloned().collect())
    }

    async fn watch(&self, bucket: &str) -> Result<mpsc::Receiver<WatchEvent>, BackendError> {
        let mut state = self.inner.lock().unwrap();
        if !state.buckets.contains_key(bucket) {
            return Err(BackendError::BucketNotFound(bucket.to_string()));
        }
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        state
            .watchers
            .entry(bucket.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        let mut state = self.inner.lock().unwrap();
        state.buckets.remove(bucket);
        state.watchers.remove(bucket);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_purge() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b").await.unwrap();

        backend.put("b", "k", Bytes::from("v")).await.unwrap();
        assert_eq!(backend.get("b", "k").await.unwrap(), Some(Bytes::from("v")));

        backend.purge("b", "k").await.unwrap();
        assert_eq!(backend.get("b", "k").await.unwrap(), None);

        // Purging an absent key is fine.
        backend.purge("b", "k").await.unwrap();
    }

    #[tokio::test]
    async fn missing_bucket_is_an_error() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.get("nope", "k").await,
            Err(BackendError::BucketNotFound(_))
        ));
    }

    #[tokio::test]
    async fn watch_sees_updates() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b").await.unwrap();
        let mut updates = backend.watch("b").await.unwrap();

        backend.put("b", "k", Bytes::from("1")).await.unwrap();
        let event = updates.recv().await.unwrap();
        assert_eq!(event.key, "k");
        assert_eq!(event.value, Some(Bytes::from("1")));

        backend.purge("b", "k").await.unwrap();
        let event = updates.recv().await.unwrap();
        assert_eq!(event.key, "k");
        assert!(event.value.is_none());
    }

    #[tokio::test]
    async fn delete_bucket_drops_contents() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b").await.unwrap();
        backend.put("b", "k", Bytes::from("v")).await.unwrap();

        backend.delete_bucket("b").await.unwrap();
        backend.create_bucket("b").await.unwrap();
        assert!(backend.list_keys("b").await.unwrap().is_empty());
    }
}
