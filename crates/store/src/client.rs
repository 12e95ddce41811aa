//! `StoreClient`: a thin, cloneable capability over a pooled connection to
//! the backing store.
//!
//! `redis::aio::ConnectionManager` is the Rust-idiomatic analogue of the
//! original's `redis.Pool` / the teacher's `ConnectionManager`-wrapped
//! `RedisClient`: it multiplexes commands over a small set of reconnecting
//! connections, so "acquire on every call, release on every exit path" is
//! handled for us rather than hand-rolled.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use msq_common::{Result, StoreError};

use crate::config::StoreConfig;

/// Pooled capability over the backing store: `PING`, `GET/SET/DEL`, JSON
/// put/scan, key scan, plus whatever raw command a caller needs via
/// [`StoreClient::exec`].
#[derive(Clone)]
pub struct StoreClient {
    manager: ConnectionManager,
}

impl StoreClient {
    /// Connect and verify the connection with an initial `PING`.
    ///
    /// Construction fails if that `PING` fails, matching the contract that
    /// `NewRediStoreWithPool` established in the original.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        info!(address = %config.address, "connecting to store");
        let client = redis::Client::open(config.redis_url())?;
        let manager = ConnectionManager::new(client).await?;
        let mut store = Self { manager };
        if !store.ping().await? {
            return Err(StoreError::Redis(
                redis::RedisError::from((redis::ErrorKind::ResponseError, "initial PING failed")),
            ));
        }
        Ok(store)
    }

    /// Wrap an already-connected manager (used by tests and by crates that
    /// build their own `redis::Client`).
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Execute an arbitrary command, returning the raw reply.
    ///
    /// Typed helpers below cover the common cases; `exec` exists for the
    /// rare command this crate doesn't wrap.
    pub async fn exec(&self, cmd: &str, args: &[&str]) -> Result<redis::Value> {
        let mut c = redis::cmd(cmd);
        for a in args {
            c.arg(*a);
        }
        let value = c.query_async(&mut self.manager.clone()).await?;
        Ok(value)
    }

    /// `PING`; returns `true` iff the store replies `PONG`.
    pub async fn ping(&mut self) -> Result<bool> {
        let reply: String = redis::cmd("PING").query_async(&mut self.manager).await?;
        Ok(reply == "PONG")
    }

    /// `GET key`. Returns [`StoreError::NotFound`] when the key is absent.
    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut conn = self.manager.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        value.ok_or(StoreError::NotFound)
    }

    /// `SET key value [PX ttl_ms]`. A zero `ttl` sets without expiry.
    pub async fn set(&self, key: &str, value: &[u8], ttl: std::time::Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        if ttl.is_zero() {
            let _: () = conn.set(key, value).await?;
        } else {
            let _: () = conn.pset_ex(key, value, ttl.as_millis() as u64).await?;
        }
        Ok(())
    }

    /// `DEL key`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// JSON-encode `value` and store it under `key` (optionally with TTL).
    pub async fn put_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: std::time::Duration,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, &bytes, ttl).await
    }

    /// Fetch and JSON-decode the value stored under `key`.
    pub async fn scan_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let bytes = self.get(key).await?;
        let value = serde_json::from_slice(&bytes)?;
        Ok(value)
    }

    /// Iterate keys via the store's cursor-based `SCAN`.
    ///
    /// Returns [`StoreError::NotFound`] exactly when both the next cursor is
    /// `0` and the returned batch is empty (end of iteration with no data),
    /// matching the contract in `spec.md` §4.1.
    pub async fn scan_key(
        &self,
        cursor: u64,
        pattern: &str,
        limit: usize,
    ) -> Result<(u64, Vec<String>)> {
        let mut conn = self.manager.clone();
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        if next_cursor == 0 && keys.is_empty() {
            return Err(StoreError::NotFound);
        }
        Ok((next_cursor, keys))
    }

    /// Borrow the underlying connection manager, for use by `StreamOps` and
    /// `Lock`, which need direct access to issue stream/script commands this
    /// client doesn't itself wrap.
    pub(crate) fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }
}
