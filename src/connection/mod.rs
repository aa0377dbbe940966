//! Client connection management.
//!
//! The server spawns one task per accepted socket; the task owns the
//! socket, a fresh command dispatcher bound to the shared storage pool
//! and the request/reply loop. Connection state never outlives the task.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
