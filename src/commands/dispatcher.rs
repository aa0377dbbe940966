//! Command dispatch.
//!
//! One [`CommandDispatcher`] exists per client connection. It holds the
//! connection's selected database index, matches the verb (uppercased, so
//! dispatch is case-insensitive), validates arity, runs the handler against
//! the selected store and translates store signals into replies.
//!
//! Before a handler touches the store the dispatcher takes that store's
//! mutex and holds it until the reply is built, which serializes commands
//! per database across every connection. Each command also runs under the
//! configured backend timeout; an elapsed deadline is reported to the
//! client as a command failure, never as a dropped connection.

use crate::error::CommandError;
use crate::protocol::Reply;
use crate::storage::{KvBackend, Store, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Executes commands for a single connection.
pub struct CommandDispatcher<B> {
    pool: Arc<Vec<Arc<Store<B>>>>,
    current: usize,
    timeout: Duration,
}

impl<B: KvBackend> CommandDispatcher<B> {
    /// Creates a dispatcher bound to the storage pool, starting on
    /// database 0.
    pub fn new(pool: Arc<Vec<Arc<Store<B>>>>, timeout: Duration) -> Self {
        Self {
            pool,
            current: 0,
            timeout,
        }
    }

    /// The currently selected database index.
    pub fn current_db(&self) -> usize {
        self.current
    }

    /// Executes one decoded command frame.
    pub async fn execute(&mut self, frame: Vec<String>) -> Result<Reply, CommandError> {
        let Some((verb, args)) = frame.split_first() else {
            return Err(CommandError::InvalidCommand);
        };
        let verb = verb.to_uppercase();
        debug!(command = %verb, db = self.current, "received command");

        // SELECT only touches connection state, never the store.
        if verb == "SELECT" {
            return self.cmd_select(args);
        }

        let store = Arc::clone(&self.pool[self.current]);
        let _guard = store.lock().await;

        match tokio::time::timeout(self.timeout, self.dispatch(&store, &verb, args)).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    async fn dispatch(
        &self,
        store: &Store<B>,
        verb: &str,
        args: &[String],
    ) -> Result<Reply, CommandError> {
        match verb {
            "PING" => Ok(Reply::pong()),

            "SET" => self.cmd_set(store, args).await,
            "SETNX" => self.cmd_setnx(store, args).await,
            "GET" => self.cmd_get(store, args).await,
            "MSET" => self.cmd_mset(store, args).await,
            "MGET" => self.cmd_mget(store, args).await,
            "DEL" => self.cmd_del(store, args).await,
            "EXISTS" => self.cmd_exists(store, args).await,
            "KEYS" => self.cmd_keys(store, args).await,
            "INCR" => self.cmd_incr(store, args).await,
            "DECR" => self.cmd_decr(store, args).await,

            "HSET" => self.cmd_hset(store, args).await,
            "HGET" => self.cmd_hget(store, args).await,
            "HDEL" => self.cmd_hdel(store, args).await,
            "HGETALL" => self.cmd_hgetall(store, args).await,
            "HKEYS" => self.cmd_hkeys(store, args).await,
            "HLEN" => self.cmd_hlen(store, args).await,
            "HEXISTS" => self.cmd_hexists(store, args).await,

            "LPUSH" => self.cmd_lpush(store, args).await,
            "LPOP" => self.cmd_lpop(store, args).await,
            "LRANGE" => self.cmd_lrange(store, args).await,

            "EXPIRE" => self.cmd_expire(store, args).await,
            "TTL" => self.cmd_ttl(store, args).await,

            _ => Err(CommandError::CommandNotSupported),
        }
    }

    // ------------------------------------------------------------------
    // Connection state
    // ------------------------------------------------------------------

    /// SELECT index
    fn cmd_select(&mut self, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        let index: usize = args[0].parse().map_err(|_| CommandError::InvalidDb)?;
        if index >= self.pool.len() {
            return Err(CommandError::InvalidDb);
        }

        self.current = index;
        Ok(Reply::ok())
    }

    // ------------------------------------------------------------------
    // Strings and counters
    // ------------------------------------------------------------------

    /// SET key value [NX|XX]
    async fn cmd_set(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() < 2 {
            return Err(CommandError::WrongNumArgs);
        }
        let (key, value) = (&args[0], &args[1]);

        let mut nx = false;
        let mut xx = false;
        for option in &args[2..] {
            match option.to_uppercase().as_str() {
                "NX" => nx = true,
                "XX" => xx = true,
                _ => return Err(CommandError::CommandNotSupported),
            }
        }

        if nx || xx {
            let exists = store
                .contains(key)
                .await
                .map_err(|_| CommandError::CmdFailed)?;
            if (xx && !exists) || (nx && exists) {
                return Ok(Reply::Null);
            }
        }

        store.set(key, value).await.map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::ok())
    }

    /// SETNX key value
    async fn cmd_setnx(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongNumArgs);
        }

        let exists = store
            .contains(&args[0])
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        if exists {
            return Ok(Reply::Null);
        }

        store
            .set(&args[0], &args[1])
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::ok())
    }

    /// GET key
    async fn cmd_get(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.get(&args[0]).await {
            Ok(value) => Ok(Reply::bulk(value)),
            Err(StoreError::KeyNotFound) => Ok(Reply::Null),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// MSET key value [key value ...]
    async fn cmd_mset(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() % 2 != 0 {
            return Err(CommandError::WrongNumArgs);
        }

        store.mset(args).await.map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::ok())
    }

    /// MGET key [key ...]
    async fn cmd_mget(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.is_empty() {
            return Err(CommandError::WrongNumArgs);
        }

        let values = store.mget(args).await.map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::Array(values))
    }

    /// DEL [key ...]
    async fn cmd_del(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        let deleted = store.del(args).await.map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::integer(deleted))
    }

    /// EXISTS [key ...]
    async fn cmd_exists(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        let found = store.exists(args).await.map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::integer(found))
    }

    /// KEYS [pattern]
    async fn cmd_keys(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        let pattern = args.first().map(String::as_str).unwrap_or("*");

        let keys = store
            .keys(pattern)
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::Array(keys))
    }

    /// INCR key
    async fn cmd_incr(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        let value = store
            .incr(&args[0])
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::integer(value))
    }

    /// DECR key
    async fn cmd_decr(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        let value = store
            .decr(&args[0])
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::integer(value))
    }

    // ------------------------------------------------------------------
    // Hashes
    // ------------------------------------------------------------------

    /// HSET key field value [field value ...]
    async fn cmd_hset(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.is_empty() || (args.len() - 1) % 2 != 0 {
            return Err(CommandError::WrongNumArgs);
        }

        let added = store
            .hset(&args[0], &args[1..])
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::integer(added))
    }

    /// HGET key field
    async fn cmd_hget(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.hget(&args[0], &args[1]).await {
            Ok(value) => Ok(Reply::bulk(value)),
            Err(StoreError::KeyNotFound) | Err(StoreError::FieldNotFound) => Ok(Reply::Null),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// HDEL key field [field ...]
    async fn cmd_hdel(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() < 2 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.hdel(&args[0], &args[1..]).await {
            Ok(deleted) => Ok(Reply::integer(deleted)),
            Err(StoreError::KeyNotFound) => Ok(Reply::integer(0)),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// HGETALL key
    async fn cmd_hgetall(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.hgetall(&args[0]).await {
            Ok(hash) => {
                let mut flat = Vec::with_capacity(hash.len() * 2);
                for (field, value) in hash {
                    flat.push(field);
                    flat.push(value);
                }
                Ok(Reply::Array(flat))
            }
            Err(StoreError::KeyNotFound) => Ok(Reply::Array(Vec::new())),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// HKEYS key
    async fn cmd_hkeys(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.hkeys(&args[0]).await {
            Ok(fields) => Ok(Reply::Array(fields)),
            Err(StoreError::KeyNotFound) => Ok(Reply::Array(Vec::new())),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// HLEN key
    async fn cmd_hlen(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.hlen(&args[0]).await {
            Ok(len) => Ok(Reply::integer(len)),
            Err(StoreError::KeyNotFound) => Ok(Reply::integer(0)),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// HEXISTS key field
    async fn cmd_hexists(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.hexists(&args[0], &args[1]).await {
            Ok(true) => Ok(Reply::integer(1)),
            Ok(false) | Err(StoreError::KeyNotFound) => Ok(Reply::integer(0)),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    // ------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------

    /// LPUSH key value [value ...]
    async fn cmd_lpush(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() < 2 {
            return Err(CommandError::WrongNumArgs);
        }

        let len = store
            .lpush(&args[0], &args[1..])
            .await
            .map_err(|_| CommandError::CmdFailed)?;
        Ok(Reply::integer(len))
    }

    /// LPOP key [count]
    async fn cmd_lpop(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.is_empty() || args.len() > 2 {
            return Err(CommandError::WrongNumArgs);
        }

        let with_count = args.len() == 2;
        let count: usize = if with_count {
            args[1].parse().map_err(|_| CommandError::CmdFailed)?
        } else {
            1
        };

        match store.lpop(&args[0], count).await {
            Ok(mut popped) => {
                if with_count {
                    Ok(Reply::Array(popped))
                } else if popped.is_empty() {
                    Ok(Reply::Null)
                } else {
                    Ok(Reply::bulk(popped.remove(0)))
                }
            }
            Err(StoreError::KeyNotFound) => {
                if with_count {
                    Ok(Reply::Array(Vec::new()))
                } else {
                    Ok(Reply::Null)
                }
            }
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// LRANGE key start stop
    async fn cmd_lrange(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 3 {
            return Err(CommandError::WrongNumArgs);
        }

        let start: i64 = args[1].parse().map_err(|_| CommandError::CmdFailed)?;
        let stop: i64 = args[2].parse().map_err(|_| CommandError::CmdFailed)?;

        match store.lrange(&args[0], start, stop).await {
            Ok(values) => Ok(Reply::Array(values)),
            Err(StoreError::KeyNotFound) => Ok(Reply::Array(Vec::new())),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    // ------------------------------------------------------------------
    // Expiration
    // ------------------------------------------------------------------

    /// EXPIRE key seconds
    async fn cmd_expire(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::WrongNumArgs);
        }

        let ttl: i64 = args[1].parse().map_err(|_| CommandError::CmdFailed)?;

        match store.expire(&args[0], ttl).await {
            Ok(()) => Ok(Reply::integer(1)),
            Err(StoreError::KeyNotFound) => Ok(Reply::integer(0)),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }

    /// TTL key
    async fn cmd_ttl(&self, store: &Store<B>, args: &[String]) -> Result<Reply, CommandError> {
        if args.len() != 1 {
            return Err(CommandError::WrongNumArgs);
        }

        match store.ttl(&args[0]).await {
            Ok(remaining) => Ok(Reply::integer(remaining)),
            Err(StoreError::ExpirationMissing) => Ok(Reply::integer(-1)),
            Err(StoreError::KeyNotFound) => Ok(Reply::integer(-2)),
            Err(_) => Err(CommandError::CmdFailed),
        }
    }
}
