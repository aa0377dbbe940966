//! # RelayKV
//!
//! RelayKV is a protocol-translation gateway. It speaks the Redis wire
//! protocol (RESP) on a TCP port and keeps all of its state in NATS
//! JetStream key-value buckets, so any standard Redis client can read and
//! write data that actually lives in JetStream.
//!
//! ```text
//! redis client ──RESP──> connection ──> dispatcher ──> store ──> JetStream
//!                             │              │            │
//!                        frame decode   verb match   per-database mutex
//!                        reply encode   arity check  JSON composite codec
//!                                                    expiration sweeper
//! ```
//!
//! The gateway itself is stateless beyond open connections: each Redis
//! database index maps to a pair of JetStream buckets (`<prefix>-<i>` and
//! `EXP-<prefix>-<i>`), and everything a client stores goes straight to
//! the backend. Strings are raw bytes, counters are ASCII integers, and
//! hashes and lists are JSON blobs rewritten on every mutation.
//!
//! ## Supported commands
//!
//! - Strings and counters: `SET` (with `NX`/`XX`), `SETNX`, `GET`, `MSET`,
//!   `MGET`, `DEL`, `EXISTS`, `KEYS`, `INCR`, `DECR`
//! - Hashes: `HSET`, `HGET`, `HDEL`, `HGETALL`, `HKEYS`, `HLEN`, `HEXISTS`
//! - Lists: `LPUSH`, `LPOP`, `LRANGE`
//! - Expiration: `EXPIRE`, `TTL`
//! - Connection: `PING`, `SELECT`
//!
//! ## Module overview
//!
//! - [`protocol`]: RESP frame decoding and reply encoding
//! - [`commands`]: the per-connection command dispatcher
//! - [`storage`]: the backend contract, the JetStream implementation, the
//!   per-database store and the expiration sweeper
//! - [`connection`]: per-client socket handling
//! - [`server`]: listener bootstrap and accept loop
//! - [`config`]: file- and environment-driven configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod server;
pub mod storage;

pub use commands::CommandDispatcher;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use error::CommandError;
pub use protocol::Reply;
pub use server::Server;
pub use storage::{ExpirySweeper, KvBackend, NatsBackend, Store};

/// Version of RelayKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
