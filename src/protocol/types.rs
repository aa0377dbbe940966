//! RESP reply types and wire encoding.
//!
//! The gateway only ever sends five reply kinds to clients: simple strings,
//! errors, integers, bulk strings (including the null bulk) and flat arrays
//! of bulk strings. Requests are decoded separately by the parser module.
//!
//! ## Wire format
//!
//! Simple string: `+OK\r\n`
//! Error: `-ERR command failed\r\n`
//! Integer: `:1000\r\n`
//! Bulk string: `$5\r\nhello\r\n`
//! Null bulk string: `$-1\r\n`
//! Array: `*2\r\n$1\r\na\r\n$1\r\nb\r\n`
//!
//! An empty string inside an array is encoded as a null bulk, which is how
//! `MGET` reports missing keys.

use std::fmt;

/// The CRLF terminator used by RESP.
pub const CRLF: &[u8] = b"\r\n";

/// A reply frame sent back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Non-binary status line, e.g. `OK` or `PONG`.
    Simple(String),

    /// Error message. The encoder prefixes it with `-ERR `.
    Error(String),

    /// 64-bit signed integer.
    Integer(i64),

    /// String value.
    Bulk(String),

    /// The null bulk string, Redis's "no value here".
    Null,

    /// Flat array of bulk strings. Empty elements encode as null bulks.
    Array(Vec<String>),
}

impl Reply {
    /// The canonical `+OK` reply.
    pub fn ok() -> Self {
        Reply::Simple("OK".to_string())
    }

    /// The canonical `+PONG` reply.
    pub fn pong() -> Self {
        Reply::Simple("PONG".to_string())
    }

    /// Creates an error reply.
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(message.into())
    }

    /// Creates an integer reply.
    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a bulk string reply.
    pub fn bulk(value: impl Into<String>) -> Self {
        Reply::Bulk(value.into())
    }

    /// Creates an array reply from any iterable of strings.
    pub fn array<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Reply::Array(values.into_iter().map(Into::into).collect())
    }

    /// Serializes the reply to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the reply into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Error(message) => {
                buf.extend_from_slice(b"-ERR ");
                buf.extend_from_slice(message.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(CRLF);
            }
            Reply::Bulk(value) => write_bulk(buf, value),
            Reply::Null => write_null(buf),
            Reply::Array(values) => {
                buf.push(b'*');
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    if value.is_empty() {
                        write_null(buf);
                    } else {
                        write_bulk(buf, value);
                    }
                }
            }
        }
    }

    /// Returns true if this reply is the null bulk.
    pub fn is_null(&self) -> bool {
        matches!(self, Reply::Null)
    }
}

fn write_bulk(buf: &mut Vec<u8>, value: &str) {
    buf.push(b'$');
    buf.extend_from_slice(value.len().to_string().as_bytes());
    buf.extend_from_slice(CRLF);
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(CRLF);
}

fn write_null(buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"$-1");
    buf.extend_from_slice(CRLF);
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => write!(f, "{}", s),
            Reply::Error(message) => write!(f, "(error) {}", message),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(value) => write!(f, "\"{}\"", value),
            Reply::Null => write!(f, "(nil)"),
            Reply::Array(values) => write!(f, "(array of {})", values.len()),
        }
    }
}
