//! The per-database store.
//!
//! A [`Store`] maps Redis data-type semantics onto two flat byte-keyed
//! buckets of a [`KvBackend`]: a primary bucket holding user data and an
//! expiration bucket holding absolute deadlines (ASCII Unix seconds) for
//! keys with a TTL.
//!
//! ## Value encodings in the primary bucket
//!
//! - strings: the raw bytes of the value
//! - counters: an ASCII decimal integer, parsed by `INCR`/`DECR`
//! - hashes: a JSON object mapping field to value
//! - lists: a JSON array of strings
//!
//! Values carry no type tag. A key written by one family of commands and
//! read by another shows up as a JSON parse failure, which the dispatcher
//! reports as a generic command failure.
//!
//! ## Serialization discipline
//!
//! Each store owns a single async mutex. The command dispatcher holds it
//! for the whole span of a command and the expiration sweeper holds it
//! around each purge, so all effects on one database are totally ordered
//! and a command never observes a half-expired key. The mutex guards no
//! data directly; every composite mutation is read-modify-write against
//! the backend, and the lock is what makes that sequence atomic.

use super::backend::{BackendError, KvBackend, WatchEvent};
use super::pattern;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::info;

/// Failures and not-found signals from store operations.
///
/// The first three variants are signals, not errors: the dispatcher turns
/// them into null bulks, zeroes or `-1` replies. Everything else becomes a
/// generic command failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key is absent from the primary bucket.
    #[error("key not found")]
    KeyNotFound,

    /// The hash exists but the field does not.
    #[error("field not found")]
    FieldNotFound,

    /// The key exists but carries no expiration deadline.
    #[error("no expiration set")]
    ExpirationMissing,

    /// A counter value did not parse as an integer.
    #[error("value is not an integer")]
    InvalidInteger,

    /// A stored composite value did not parse as JSON.
    #[error("malformed stored value: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The backend reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// One Redis-style database backed by a primary and an expiration bucket.
pub struct Store<B> {
    backend: B,
    bucket: String,
    expiration_bucket: String,
    mutex: Mutex<()>,
}

impl<B: KvBackend> Store<B> {
    /// Creates the buckets and returns the store.
    ///
    /// With `persist` disabled both buckets are deleted first, so every
    /// start begins from an empty database.
    pub async fn open(
        backend: B,
        bucket: impl Into<String>,
        persist: bool,
    ) -> Result<Arc<Self>, StoreError> {
        let bucket = bucket.into();
        let expiration_bucket = format!("EXP-{bucket}");

        if !persist {
            backend.delete_bucket(&bucket).await?;
            backend.delete_bucket(&expiration_bucket).await?;
        }

        backend.create_bucket(&bucket).await?;
        info!(bucket = %bucket, "key-value store ready");
        backend.create_bucket(&expiration_bucket).await?;
        info!(bucket = %expiration_bucket, "expiration store ready");

        Ok(Arc::new(Self {
            backend,
            bucket,
            expiration_bucket,
            mutex: Mutex::new(()),
        }))
    }

    /// The primary bucket name.
    pub fn name(&self) -> &str {
        &self.bucket
    }

    /// Acquires the store's serializing mutex.
    ///
    /// Held by the dispatcher for the span of one command and by the
    /// sweeper around each purge.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().await
    }

    // ------------------------------------------------------------------
    // Strings and counters
    // ------------------------------------------------------------------

    /// Stores a raw string value.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.backend
            .put(&self.bucket, key, Bytes::from(value.as_bytes().to_vec()))
            .await?;
        Ok(())
    }

    /// Stores consecutive `key value` pairs.
    pub async fn mset(&self, pairs: &[String]) -> Result<(), StoreError> {
        for pair in pairs.chunks(2) {
            self.set(&pair[0], &pair[1]).await?;
        }
        Ok(())
    }

    /// Fetches a raw string value.
    pub async fn get(&self, key: &str) -> Result<String, StoreError> {
        let raw = self
            .backend
            .get(&self.bucket, key)
            .await?
            .ok_or(StoreError::KeyNotFound)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Fetches multiple values; missing keys yield empty strings.
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<String>, StoreError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match self.get(key).await {
                Ok(value) => values.push(value),
                Err(StoreError::KeyNotFound) => values.push(String::new()),
                Err(err) => return Err(err),
            }
        }
        Ok(values)
    }

    /// Returns true when `key` exists in the primary bucket.
    pub async fn contains(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.backend.get(&self.bucket, key).await?.is_some())
    }

    /// Counts how many of the given keys exist, duplicates included.
    pub async fn exists(&self, keys: &[String]) -> Result<i64, StoreError> {
        let mut found = 0;
        for key in keys {
            if self.contains(key).await? {
                found += 1;
            }
        }
        Ok(found)
    }

    /// Purges each key that currently exists; returns the number purged.
    pub async fn del(&self, keys: &[String]) -> Result<i64, StoreError> {
        let mut deleted = 0;
        for key in keys {
            if !self.contains(key).await? {
                continue;
            }
            self.backend.purge(&self.bucket, key).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Lists every key matching the glob `pattern`.
    pub async fn keys(&self, pattern_str: &str) -> Result<Vec<String>, StoreError> {
        let all = self.backend.list_keys(&self.bucket).await?;
        Ok(all
            .into_iter()
            .filter(|key| pattern::matches(key, pattern_str))
            .collect())
    }

    /// Increments the counter at `key` by one, treating absence as zero.
    pub async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, 1).await
    }

    /// Decrements the counter at `key` by one, treating absence as zero.
    pub async fn decr(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, -1).await
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let current = match self.get(key).await {
            Ok(value) => value,
            Err(StoreError::KeyNotFound) => "0".to_string(),
            Err(err) => return Err(err),
        };

        let value = current
            .parse::<i64>()
            .map_err(|_| StoreError::InvalidInteger)?
            + delta;

        self.set(key, &value.to_string()).await?;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Hashes (JSON objects in a single value)
    // ------------------------------------------------------------------

    /// Sets hash fields from consecutive `field value` pairs.
    ///
    /// Returns the number of fields that were new, counted against the
    /// pre-image; updating an existing field does not count.
    pub async fn hset(&self, key: &str, pairs: &[String]) -> Result<i64, StoreError> {
        let mut hash = self.read_hash(key).await?.unwrap_or_default();

        let mut added = 0;
        for pair in pairs.chunks(2) {
            if !hash.contains_key(&pair[0]) {
                added += 1;
            }
            hash.insert(pair[0].clone(), pair[1].clone());
        }

        self.write_hash(key, &hash).await?;
        Ok(added)
    }

    /// Fetches one hash field.
    pub async fn hget(&self, key: &str, field: &str) -> Result<String, StoreError> {
        let hash = self.read_hash(key).await?.ok_or(StoreError::KeyNotFound)?;
        hash.get(field).cloned().ok_or(StoreError::FieldNotFound)
    }

    /// Removes hash fields; returns how many were present.
    pub async fn hdel(&self, key: &str, fields: &[String]) -> Result<i64, StoreError> {
        let mut hash = self.read_hash(key).await?.ok_or(StoreError::KeyNotFound)?;

        let mut deleted = 0;
        for field in fields {
            if hash.remove(field).is_some() {
                deleted += 1;
            }
        }

        self.write_hash(key, &hash).await?;
        Ok(deleted)
    }

    /// Fetches the whole hash.
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.read_hash(key).await?.ok_or(StoreError::KeyNotFound)
    }

    /// Fetches the hash's field names.
    pub async fn hkeys(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let hash = self.read_hash(key).await?.ok_or(StoreError::KeyNotFound)?;
        Ok(hash.into_keys().collect())
    }

    /// Number of fields in the hash.
    pub async fn hlen(&self, key: &str) -> Result<i64, StoreError> {
        let hash = self.read_hash(key).await?.ok_or(StoreError::KeyNotFound)?;
        Ok(hash.len() as i64)
    }

    /// Returns true when the hash has the field.
    pub async fn hexists(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let hash = self.read_hash(key).await?.ok_or(StoreError::KeyNotFound)?;
        Ok(hash.contains_key(field))
    }

    async fn read_hash(&self, key: &str) -> Result<Option<HashMap<String, String>>, StoreError> {
        match self.backend.get(&self.bucket, key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_hash(
        &self,
        key: &str,
        hash: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(hash)?;
        self.backend.put(&self.bucket, key, Bytes::from(raw)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lists (JSON arrays in a single value)
    // ------------------------------------------------------------------

    /// Prepends each value in argument order, so the last argument ends up
    /// at the head. Returns the new list length.
    pub async fn lpush(&self, key: &str, values: &[String]) -> Result<i64, StoreError> {
        let mut list = self.read_list(key).await?.unwrap_or_default();

        for value in values {
            list.insert(0, value.clone());
        }

        self.write_list(key, &list).await?;
        Ok(list.len() as i64)
    }

    /// Removes and returns up to `count` elements from the head.
    pub async fn lpop(&self, key: &str, count: usize) -> Result<Vec<String>, StoreError> {
        let mut list = self.read_list(key).await?.ok_or(StoreError::KeyNotFound)?;

        let take = count.min(list.len());
        let popped: Vec<String> = list.drain(..take).collect();

        self.write_list(key, &list).await?;
        Ok(popped)
    }

    /// Returns the inclusive slice `[start, stop]` with Redis-style
    /// negative indexing.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let list = self.read_list(key).await?.ok_or(StoreError::KeyNotFound)?;
        let len = list.len() as i64;

        let mut start = if start < 0 { len + start } else { start };
        if start < 0 {
            start = 0;
        }
        if start >= len {
            return Ok(Vec::new());
        }

        let mut stop = if stop < 0 { len + stop } else { stop };
        if stop >= len {
            stop = len - 1;
        }
        if stop < start {
            return Ok(Vec::new());
        }

        Ok(list[start as usize..=stop as usize].to_vec())
    }

    async fn read_list(&self, key: &str) -> Result<Option<Vec<String>>, StoreError> {
        match self.backend.get(&self.bucket, key).await? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn write_list(&self, key: &str, list: &[String]) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(list)?;
        self.backend.put(&self.bucket, key, Bytes::from(raw)).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Expiration
    // ------------------------------------------------------------------

    /// Records an absolute deadline `ttl_secs` from now for an existing key.
    pub async fn expire(&self, key: &str, ttl_secs: i64) -> Result<(), StoreError> {
        if !self.contains(key).await? {
            return Err(StoreError::KeyNotFound);
        }

        let deadline = unix_now() + ttl_secs;
        info!(bucket = %self.bucket, key, deadline, "setting expiration");
        self.backend
            .put(
                &self.expiration_bucket,
                key,
                Bytes::from(deadline.to_string()),
            )
            .await?;
        Ok(())
    }

    /// Seconds until the key's deadline.
    ///
    /// Signals [`StoreError::KeyNotFound`] when the key is absent and
    /// [`StoreError::ExpirationMissing`] when it exists without a deadline.
    pub async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        if !self.contains(key).await? {
            return Err(StoreError::KeyNotFound);
        }

        let raw = self
            .backend
            .get(&self.expiration_bucket, key)
            .await?
            .ok_or(StoreError::ExpirationMissing)?;

        let deadline = String::from_utf8_lossy(&raw)
            .parse::<i64>()
            .map_err(|_| StoreError::InvalidInteger)?;

        Ok(deadline - unix_now())
    }

    // ------------------------------------------------------------------
    // Sweeper support
    // ------------------------------------------------------------------

    /// Subscribes to updates on the expiration bucket.
    pub(crate) async fn watch_expirations(
        &self,
    ) -> Result<mpsc::Receiver<WatchEvent>, BackendError> {
        self.backend.watch(&self.expiration_bucket).await
    }

    /// Scans the expiration bucket for deadlines at or before `now`.
    ///
    /// Entries with unparsable deadlines are skipped; they are either
    /// tombstones from concurrent purges or garbage nothing can act on.
    pub(crate) async fn overdue_keys(&self, now: i64) -> Result<Vec<String>, StoreError> {
        let mut due = Vec::new();
        for key in self.backend.list_keys(&self.expiration_bucket).await? {
            let Some(raw) = self.backend.get(&self.expiration_bucket, &key).await? else {
                continue;
            };
            let Ok(deadline) = String::from_utf8_lossy(&raw).parse::<i64>() else {
                continue;
            };
            if now >= deadline {
                due.push(key);
            }
        }
        Ok(due)
    }

    /// Evicts one expired key under the store mutex.
    ///
    /// The primary purge is idempotent, so an expiration entry whose
    /// primary key has already vanished is simply dropped.
    pub(crate) async fn purge_expired(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock().await;
        info!(bucket = %self.bucket, key, "key expired");
        self.backend.purge(&self.bucket, key).await?;
        self.backend.purge(&self.expiration_bucket, key).await?;
        Ok(())
    }
}

/// Wall-clock seconds since the Unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
