//! Streaming decoder for inbound RESP command frames.
//!
//! Every client request is a RESP array of bulk strings:
//!
//! ```text
//! *<n>\r\n ( $<len>\r\n <payload>\r\n ){n}
//! ```
//!
//! The decoder works line by line over a buffered reader. Each line is read
//! up to `\n` and trimmed of surrounding whitespace, so clients sending bare
//! `\n` terminators are accepted; replies always use `\r\n`. Payload lines
//! are taken verbatim after trimming, and the declared bulk length is not
//! checked against the payload.
//!
//! A malformed frame produces [`DecodeError::InvalidCommand`] (bad array
//! header) or [`DecodeError::InvalidBulkData`] (bad bulk header, bad length
//! or the stream ending mid-frame). Both leave the connection usable; the
//! caller sends an error frame and keeps reading. An I/O failure or EOF on
//! a frame boundary ends the connection instead.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Errors produced while decoding a command frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The outer array header was missing or malformed.
    #[error("invalid command")]
    InvalidCommand,

    /// A bulk string header or payload was malformed, or the stream ended
    /// in the middle of a frame.
    #[error("invalid bulk data")]
    InvalidBulkData,

    /// I/O failure on the frame boundary. Terminates the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads one command frame from `reader`.
///
/// Returns `Ok(Some(parts))` with the verb and its arguments, or `Ok(None)`
/// on a clean EOF between frames.
pub async fn read_command<R>(reader: &mut R) -> Result<Option<Vec<String>>, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let header = match read_line(reader).await? {
        Some(line) => line,
        None => return Ok(None),
    };

    let count = header
        .strip_prefix('*')
        .and_then(|n| n.parse::<i64>().ok())
        .filter(|n| *n > 0)
        .ok_or(DecodeError::InvalidCommand)?;

    let mut parts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let bulk_header = read_line(reader)
            .await
            .map_err(|_| DecodeError::InvalidBulkData)?
            .ok_or(DecodeError::InvalidBulkData)?;

        bulk_header
            .strip_prefix('$')
            .and_then(|len| len.parse::<i64>().ok())
            .filter(|len| *len > 0)
            .ok_or(DecodeError::InvalidBulkData)?;

        let payload = read_line(reader)
            .await
            .map_err(|_| DecodeError::InvalidBulkData)?
            .ok_or(DecodeError::InvalidBulkData)?;

        parts.push(payload);
    }

    Ok(Some(parts))
}

/// Reads a single line up to `\n` and trims surrounding whitespace.
///
/// Returns `Ok(None)` when the stream is at EOF.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    let n = reader.read_until(b'\n', &mut raw).await?;
    if n == 0 {
        return Ok(None);
    }

    let line = String::from_utf8_lossy(&raw).trim().to_string();
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(input: &[u8]) -> Result<Option<Vec<String>>, DecodeError> {
        let mut reader = BufReader::new(input);
        read_command(&mut reader).await
    }

    #[tokio::test]
    async fn parse_ping() {
        let frame = decode(b"*1\r\n$4\r\nPING\r\n").await.unwrap().unwrap();
        assert_eq!(frame, vec!["PING"]);
    }

    #[tokio::test]
    async fn parse_set() {
        let frame = decode(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec!["SET", "foo", "bar"]);
    }

    #[tokio::test]
    async fn parse_bare_newline_terminators() {
        let frame = decode(b"*2\n$3\nGET\n$3\nfoo\n").await.unwrap().unwrap();
        assert_eq!(frame, vec!["GET", "foo"]);
    }

    #[tokio::test]
    async fn parse_does_not_verify_bulk_length() {
        // The declared length is 1 but the payload is longer; the decoder
        // takes the whole line.
        let frame = decode(b"*2\r\n$3\r\nGET\r\n$1\r\nlonger\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec!["GET", "longer"]);
    }

    #[tokio::test]
    async fn eof_between_frames_is_clean() {
        assert!(decode(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_array_prefix() {
        let err = decode(b"PING\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidCommand));
    }

    #[tokio::test]
    async fn non_numeric_array_length() {
        let err = decode(b"*x\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidCommand));
    }

    #[tokio::test]
    async fn non_positive_array_length() {
        assert!(matches!(
            decode(b"*0\r\n").await.unwrap_err(),
            DecodeError::InvalidCommand
        ));
        assert!(matches!(
            decode(b"*-1\r\n").await.unwrap_err(),
            DecodeError::InvalidCommand
        ));
    }

    #[tokio::test]
    async fn missing_bulk_prefix() {
        let err = decode(b"*1\r\nPING\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBulkData));
    }

    #[tokio::test]
    async fn non_positive_bulk_length() {
        let err = decode(b"*1\r\n$0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBulkData));
    }

    #[tokio::test]
    async fn eof_mid_frame() {
        let err = decode(b"*2\r\n$3\r\nGET\r\n").await.unwrap_err();
        assert!(matches!(err, DecodeError::InvalidBulkData));
    }

    #[tokio::test]
    async fn consecutive_frames_from_one_stream() {
        let mut reader = BufReader::new(&b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n"[..]);
        let first = read_command(&mut reader).await.unwrap().unwrap();
        let second = read_command(&mut reader).await.unwrap().unwrap();
        assert_eq!(first, vec!["PING"]);
        assert_eq!(second, vec!["GET", "k"]);
        assert!(read_command(&mut reader).await.unwrap().is_none());
    }
}
