//! Server bootstrap and accept loop.
//!
//! `start` connects one store per database index (bucket `<prefix>-<i>`
//! plus its `EXP-` companion), starts an expiration sweeper for each, then
//! accepts sockets and spawns a connection task per client. A stop signal
//! wakes the accept loop and `start` returns; dropping the sweeper handles
//! on the way out stops the background tasks.

use crate::config::Config;
use crate::connection::{handle_connection, ConnectionStats};
use crate::storage::{ExpirySweeper, KvBackend, NatsBackend, Store};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// The RESP gateway server.
pub struct Server {
    config: Config,
    stop_tx: watch::Sender<bool>,
}

impl Server {
    /// Creates a server from its configuration. Nothing is bound or
    /// connected until [`Server::start`].
    pub fn new(config: Config) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self { config, stop_tx }
    }

    /// Binds the listener, builds the storage pool and serves until
    /// [`Server::stop`] is called.
    pub async fn start(&self) -> Result<()> {
        let address = self.config.listen_address();
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("binding RESP listener on {address}"))?;
        info!(address = %address, "RelayKV server is running");

        let mut pool = Vec::with_capacity(self.config.server.num_databases);
        let mut sweepers = Vec::with_capacity(self.config.server.num_databases);
        for index in 0..self.config.server.num_databases {
            let bucket = format!("{}-{}", self.config.nats.bucket_prefix, index);
            let backend = NatsBackend::connect(&self.config.nats.url)
                .await
                .with_context(|| format!("connecting store for bucket {bucket}"))?;
            let store = Store::open(backend, bucket, self.config.nats.persist)
                .await
                .context("creating storage buckets")?;
            sweepers.push(ExpirySweeper::start(Arc::clone(&store)));
            pool.push(store);
        }

        let stop_rx = self.stop_tx.subscribe();
        run_accept_loop(
            listener,
            Arc::new(pool),
            self.config.timeout(),
            Arc::new(ConnectionStats::new()),
            stop_rx,
        )
        .await;

        // Dropping the handles stops the sweepers.
        drop(sweepers);
        Ok(())
    }

    /// Signals the accept loop to exit.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Accepts sockets until the stop signal fires.
async fn run_accept_loop<B: KvBackend>(
    listener: TcpListener,
    pool: Arc<Vec<Arc<Store<B>>>>,
    timeout: Duration,
    stats: Arc<ConnectionStats>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    info!("stop signal received, closing listener");
                    return;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            Arc::clone(&pool),
                            timeout,
                            Arc::clone(&stats),
                        ));
                    }
                    Err(err) => error!(error = %err, "failed to accept connection"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryBackend;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn spawn_gateway(databases: usize) -> (SocketAddr, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let backend = MemoryBackend::new();
        let mut pool = Vec::new();
        for index in 0..databases {
            pool.push(
                Store::open(backend.clone(), format!("srv-{index}"), false)
                    .await
                    .unwrap(),
            );
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(run_accept_loop(
            listener,
            Arc::new(pool),
            Duration::from_secs(5),
            Arc::new(ConnectionStats::new()),
            stop_rx,
        ));

        (addr, stop_tx)
    }

    async fn read_reply(client: &mut TcpStream) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    async fn send(client: &mut TcpStream, parts: &[&str]) -> Vec<u8> {
        let mut frame = format!("*{}\r\n", parts.len()).into_bytes();
        for part in parts {
            frame.extend_from_slice(format!("${}\r\n{}\r\n", part.len(), part).as_bytes());
        }
        client.write_all(&frame).await.unwrap();
        read_reply(client).await
    }

    #[tokio::test]
    async fn serves_multiple_clients() {
        let (addr, _stop) = spawn_gateway(1).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        assert_eq!(send(&mut a, &["SET", "shared", "1"]).await, b"+OK\r\n");
        assert_eq!(send(&mut b, &["GET", "shared"]).await, b"$1\r\n1\r\n");
    }

    #[tokio::test]
    async fn concurrent_incr_loses_no_updates() {
        let (addr, _stop) = spawn_gateway(1).await;

        let clients = 20;
        let per_client = 25;

        let mut tasks = Vec::new();
        for _ in 0..clients {
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(addr).await.unwrap();
                for _ in 0..per_client {
                    let reply = send(&mut client, &["INCR", "n"]).await;
                    assert_eq!(reply[0], b':');
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut client = TcpStream::connect(addr).await.unwrap();
        let expected = (clients * per_client).to_string();
        assert_eq!(
            send(&mut client, &["GET", "n"]).await,
            format!("${}\r\n{}\r\n", expected.len(), expected).into_bytes()
        );
    }

    #[tokio::test]
    async fn databases_are_isolated_per_connection() {
        let (addr, _stop) = spawn_gateway(2).await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        assert_eq!(send(&mut a, &["SELECT", "0"]).await, b"+OK\r\n");
        assert_eq!(send(&mut a, &["SET", "k", "v"]).await, b"+OK\r\n");

        let mut b = TcpStream::connect(addr).await.unwrap();
        assert_eq!(send(&mut b, &["SELECT", "1"]).await, b"+OK\r\n");
        assert_eq!(send(&mut b, &["GET", "k"]).await, b"$-1\r\n");
    }

    #[tokio::test]
    async fn stop_signal_ends_the_accept_loop() {
        let (addr, stop) = spawn_gateway(1).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        assert_eq!(send(&mut client, &["PING"]).await, b"+PONG\r\n");

        stop.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // New connections are refused once the listener is gone; accepted
        // ones keep running.
        assert!(TcpStream::connect(addr).await.is_err());
        assert_eq!(send(&mut client, &["PING"]).await, b"+PONG\r\n");
    }
}
