//! The key-value backend contract.
//!
//! The store and the expiration sweeper never talk to NATS directly; they
//! consume this trait. The production implementation lives in
//! [`crate::storage::nats`]; tests run against an in-memory implementation.

use bytes::Bytes;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;

/// A single update observed on a watched bucket.
///
/// `value` is `None` for delete and purge events.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub key: String,
    pub value: Option<Bytes>,
}

/// Failures at the backend boundary.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The named bucket does not exist.
    #[error("bucket {0} not found")]
    BucketNotFound(String),

    /// Could not reach the backend.
    #[error("failed to connect to backend: {0}")]
    Connection(String),

    /// Any other backend-reported failure.
    #[error("backend request failed: {0}")]
    Request(String),
}

/// A bucketed byte-to-byte key-value backend.
///
/// Removal is modelled as a purge and is idempotent: purging an absent key
/// succeeds. `delete_bucket` is likewise a no-op when the bucket is absent.
pub trait KvBackend: Send + Sync + 'static {
    /// Stores `value` at `key` in `bucket`, overwriting any prior value.
    fn put(
        &self,
        bucket: &str,
        key: &str,
        value: Bytes,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Fetches the value at `key`, or `None` when the key is absent.
    fn get(
        &self,
        bucket: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Bytes>, BackendError>> + Send;

    /// Removes `key` from `bucket`. Succeeds when the key is absent.
    fn purge(&self, bucket: &str, key: &str)
        -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Lists every key currently present in `bucket`.
    fn list_keys(&self, bucket: &str)
        -> impl Future<Output = Result<Vec<String>, BackendError>> + Send;

    /// Subscribes to updates on `bucket`.
    ///
    /// The receiver yields one [`WatchEvent`] per update and closes when the
    /// underlying subscription ends.
    fn watch(
        &self,
        bucket: &str,
    ) -> impl Future<Output = Result<mpsc::Receiver<WatchEvent>, BackendError>> + Send;

    /// Creates `bucket` if it does not already exist.
    fn create_bucket(&self, bucket: &str)
        -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Deletes `bucket` and all of its contents, if it exists.
    fn delete_bucket(&self, bucket: &str)
        -> impl Future<Output = Result<(), BackendError>> + Send;
}
