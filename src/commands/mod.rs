//! Command processing layer.
//!
//! Sits between the RESP decoder and the storage pool:
//!
//! ```text
//! decoded frame ──> CommandDispatcher ──> Store (selected database)
//!                        │
//!                        └─> Reply or CommandError
//! ```
//!
//! The dispatcher is per-connection state; the pool behind it is shared.

pub mod dispatcher;

pub use dispatcher::CommandDispatcher;
