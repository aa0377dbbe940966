//! RESP protocol support.
//!
//! Two halves with different shapes, matching how the gateway uses them:
//!
//! - `parser`: a streaming, line-oriented decoder for inbound command
//!   frames (always arrays of bulk strings).
//! - `types`: the [`Reply`] enum covering the five reply kinds the gateway
//!   emits, with its wire serialization.

pub mod parser;
pub mod types;

pub use parser::{read_command, DecodeError};
pub use types::Reply;
