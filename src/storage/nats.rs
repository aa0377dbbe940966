//! NATS JetStream implementation of the backend contract.
//!
//! Buckets map one-to-one onto JetStream key-value stores. Handles are
//! cached after the first lookup so per-command operations do not repeat
//! the bucket discovery round-trip.

use super::backend::{BackendError, KvBackend, WatchEvent};
use async_nats::jetstream::{self, kv};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{info, warn};

const WATCH_CHANNEL_CAPACITY: usize = 64;

/// A JetStream-backed [`KvBackend`].
#[derive(Clone)]
pub struct NatsBackend {
    jetstream: jetstream::Context,
    handles: Arc<Mutex<HashMap<String, kv::Store>>>,
}

impl NatsBackend {
    /// Connects to the NATS server at `url`.
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|err| BackendError::Connection(err.to_string()))?;
        info!(url, "connected to NATS server");

        Ok(Self {
            jetstream: jetstream::new(client),
            handles: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn bucket(&self, name: &str) -> Result<kv::Store, BackendError> {
        if let Some(store) = self.handles.lock().unwrap().get(name) {
            return Ok(store.clone());
        }

        let store = self
            .jetstream
            .get_key_value(name)
            .await
            .map_err(|_| BackendError::BucketNotFound(name.to_string()))?;

        self.handles
            .lock()
            .unwrap()
            .insert(name.to_string(), store.clone());
        Ok(store)
    }
}

fn request_failed(err: impl std::fmt::Display) -> BackendError {
    BackendError::Request(err.to_string())
}

impl KvBackend for NatsBackend {
    async fn put(&self, bucket: &str, key: &str, value: Bytes) -> Result<(), BackendError> {
        let store = self.bucket(bucket).await?;
        store.put(key, value).await.map_err(request_failed)?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>, BackendError> {
        let store = self.bucket(bucket).await?;
        store.get(key).await.map_err(request_failed)
    }

    async fn purge(&self, bucket: &str, key: &str) -> Result<(), BackendError> {
        let store = self.bucket(bucket).await?;
        store.purge(key).await.map_err(request_failed)
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, BackendError> {
        let store = self.bucket(bucket).await?;
        let mut keys = store.keys().await.map_err(request_failed)?;

        let mut all = Vec::new();
        while let Some(key) = keys.try_next().await.map_err(request_failed)? {
            all.push(key);
        }
        Ok(all)
    }

    async fn watch(&self, bucket: &str) -> Result<mpsc::Receiver<WatchEvent>, BackendError> {
        let store = self.bucket(bucket).await?;
        let mut entries = store.watch_all().await.map_err(request_failed)?;

        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let bucket = bucket.to_string();
        tokio::spawn(async move {
            while let Some(entry) = entries.next().await {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        warn!(bucket = %bucket, error = %err, "bucket watch stream failed");
                        break;
                    }
                };

                let value = match entry.operation {
                    kv::Operation::Put => Some(entry.value),
                    kv::Operation::Delete | kv::Operation::Purge => None,
                };

                let event = WatchEvent {
                    key: entry.key,
                    value,
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        let store = self
            .jetstream
            .create_key_value(kv::Config {
                bucket: bucket.to_string(),
                ..Default::default()
            })
            .await
            .map_err(request_failed)?;

        self.handles
            .lock()
            .unwrap()
            .insert(bucket.to_string(), store);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), BackendError> {
        self.handles.lock().unwrap().remove(bucket);

        match self.jetstream.delete_key_value(bucket).await {
            Ok(_) => Ok(()),
            // An absent bucket is fine; anything else is a real failure.
            Err(err) if err.to_string().to_lowercase().contains("not found") => Ok(()),
            Err(err) => Err(request_failed(err)),
        }
    }
}
