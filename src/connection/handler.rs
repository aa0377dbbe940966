//! Per-client connection handling.
//!
//! Each accepted socket gets its own task running a plain request/reply
//! loop: decode one command frame, execute it, write the reply, flush.
//! Command failures of any kind become a single error frame and the loop
//! keeps going; only EOF or a socket error ends the connection.
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ read frame ──> dispatch ──> write reply ──┐ │
//! │     ▲                                     │ │
//! │     └─────────────────────────────────────┘ │
//! └─────────────────────────────────────────────┘
//! ```

use crate::commands::CommandDispatcher;
use crate::protocol::{parser, DecodeError, Reply};
use crate::storage::{KvBackend, Store};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted.
    pub connections_accepted: AtomicU64,
    /// Currently active connections.
    pub active_connections: AtomicU64,
    /// Total commands processed.
    pub commands_processed: AtomicU64,
    /// Total bytes written to clients.
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Socket-level failure on the read or write path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owns one client socket and its command loop.
pub struct ConnectionHandler<B> {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    addr: SocketAddr,
    dispatcher: CommandDispatcher<B>,
    reply_buf: Vec<u8>,
    stats: Arc<ConnectionStats>,
}

impl<B: KvBackend> ConnectionHandler<B> {
    /// Wraps an accepted socket with a fresh dispatcher on database 0.
    pub fn new(
        stream: TcpStream,
        addr: SocketAddr,
        pool: Arc<Vec<Arc<Store<B>>>>,
        timeout: Duration,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();
        let (read_half, write_half) = stream.into_split();

        Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            addr,
            dispatcher: CommandDispatcher::new(pool, timeout),
            reply_buf: Vec::with_capacity(256),
            stats,
        }
    }

    /// Runs the connection to completion.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "client connected");

        let result = self.command_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "client disconnected"),
            Err(ConnectionError::Io(err))
                if err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.addr, "connection reset by client")
            }
            Err(err) => warn!(client = %self.addr, error = %err, "connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn command_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let frame = match parser::read_command(&mut self.reader).await {
                Ok(Some(frame)) => frame,
                // Clean EOF between frames.
                Ok(None) => return Ok(()),
                Err(DecodeError::Io(err)) => return Err(err.into()),
                Err(err) => {
                    debug!(client = %self.addr, error = %err, "malformed frame");
                    self.send_reply(&Reply::error(err.to_string())).await?;
                    continue;
                }
            };

            let reply = match self.dispatcher.execute(frame).await {
                Ok(reply) => reply,
                Err(err) => {
                    debug!(client = %self.addr, error = %err, "command error");
                    Reply::error(err.to_string())
                }
            };

            self.stats.command_processed();
            self.send_reply(&reply).await?;
        }
    }

    async fn send_reply(&mut self, reply: &Reply) -> Result<(), ConnectionError> {
        self.reply_buf.clear();
        reply.serialize_into(&mut self.reply_buf);

        self.writer.write_all(&self.reply_buf).await?;
        self.writer.flush().await?;
        self.stats.bytes_written(self.reply_buf.len());
        Ok(())
    }
}

/// Runs a connection handler and swallows its exit status.
///
/// Connection endings are already logged inside [`ConnectionHandler::run`];
/// the accept loop has nothing further to do with them.
pub async fn handle_connection<B: KvBackend>(
    stream: TcpStream,
    addr: SocketAddr,
    pool: Arc<Vec<Arc<Store<B>>>>,
    timeout: Duration,
    stats: Arc<ConnectionStats>,
) {
    let handler = ConnectionHandler::new(stream, addr, pool, timeout, stats);
    let _ = handler.run().await;
}
