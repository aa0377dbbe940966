//! Command-level error kinds.
//!
//! Every failure a client can observe is one of these variants. The
//! connection layer turns each of them into exactly one RESP error frame
//! (`-ERR <message>\r\n`) and keeps the connection open; only socket I/O
//! failures terminate a connection.

use thiserror::Error;

/// Errors surfaced to clients as RESP error frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The outer RESP array was malformed.
    #[error("invalid command")]
    InvalidCommand,

    /// A bulk string header or payload inside the array was malformed.
    #[error("invalid bulk data")]
    InvalidBulkData,

    /// The verb is not in the command table.
    #[error("command not supported")]
    CommandNotSupported,

    /// The verb is known but the argument count is wrong.
    #[error("wrong number of arguments")]
    WrongNumArgs,

    /// SELECT index was non-numeric or outside the storage pool.
    #[error("invalid database index")]
    InvalidDb,

    /// Any backend or value-parse failure during execution.
    #[error("command failed")]
    CmdFailed,
}
