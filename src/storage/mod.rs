//! Storage layer.
//!
//! A [`Store`] is one Redis-style database: a primary bucket for values, an
//! expiration bucket for deadlines, a serializing mutex and a background
//! [`ExpirySweeper`]. The server owns a fixed pool of stores, one per
//! database index, all talking to the same NATS deployment through the
//! [`KvBackend`] contract.
//!
//! ```text
//! SELECT n ──> Store n ──┬── primary bucket   <prefix>-n
//!                        ├── expiration bucket EXP-<prefix>-n
//!                        ├── mutex (one command at a time)
//!                        └── sweeper (deadline eviction)
//! ```

pub mod backend;
pub mod expiry;
#[cfg(test)]
pub mod memory;
pub mod nats;
pub mod pattern;
pub mod store;

pub use backend::{BackendError, KvBackend, WatchEvent};
pub use expiry::ExpirySweeper;
pub use nats::NatsBackend;
pub use store::{Store, StoreError};
