//! The store client seam and the fixed-size connection pool.
//!
//! The executor only sees the [`StoreConn`] trait, so the remote protocol stays a black box and
//! tests can substitute an instrumented in-memory store. The shipped implementation,
//! [`RedisStore`], speaks to any Redis-compatible endpoint through the `redis` crate's tokio
//! multiplexed connection.

use async_trait::async_trait;
use futures::future::join_all;
use log::debug;
use redis::AsyncCommands;
use thiserror::Error;

use crate::StressError;

/// An error surfaced by the store transport. Final for the operation that hit it; the executor
/// performs no retries on top of the transport.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0}")]
    Other(String),
}

/// A factory for independent connections to one target store.
#[async_trait]
pub trait StoreClient: Send + Sync + 'static {
    type Conn: StoreConn + Clone;

    /// Establish one new connection.
    async fn connect(&self) -> Result<Self::Conn, StoreError>;
}

/// One addressable session to the target store.
///
/// The pool's round-robin routing and the batch discipline in [`crate::bench`] keep the number
/// of operations outstanding on one connection bounded; the connection itself only needs to
/// complete each call with a success or an error.
#[async_trait]
pub trait StoreConn: Send + Sync + 'static {
    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError>;

    async fn incr(&mut self, key: &str) -> Result<i64, StoreError>;

    async fn lpush(&mut self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Close the session. The default is a no-op for transports that tear down on drop.
    async fn close(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// A fixed-size pool of independent connections with round-robin acquisition.
///
/// The connection list is read-only after [`Pool::connect`]: no connection is ever replaced or
/// reconnected mid-run.
pub struct Pool<C> {
    conns: Vec<C>,
}

impl<C: StoreConn + Clone> Pool<C> {
    /// Establish `size` connections concurrently and wait for all attempts to finish.
    ///
    /// There is no degraded mode: routing assumes a dense pool of exactly `size` entries, so a
    /// single failed connection fails the whole startup.
    pub async fn connect<S>(client: &S, size: usize) -> Result<Self, StressError>
    where
        S: StoreClient<Conn = C>,
    {
        let attempts = (0..size).map(|_| client.connect());
        let mut conns = Vec::with_capacity(size);
        for result in join_all(attempts).await {
            conns.push(result.map_err(StressError::Connect)?);
        }
        debug!("connected {} store connections", conns.len());
        Ok(Self { conns })
    }

    pub fn size(&self) -> usize {
        self.conns.len()
    }

    /// The connection at `index mod size`. Infallible: the pool is never empty post-construction.
    pub fn get(&self, index: u64) -> C {
        self.conns[(index % self.conns.len() as u64) as usize].clone()
    }

    /// Close all connections, best-effort. Individual close failures are logged and ignored.
    pub async fn disconnect_all(mut self) {
        for (i, conn) in self.conns.iter_mut().enumerate() {
            if let Err(e) = conn.close().await {
                debug!("closing connection {} failed: {}", i, e);
            }
        }
        debug!("disconnected all store connections");
    }
}

/// A [`StoreClient`] for Redis-compatible endpoints.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Parse the target URL. No connection is attempted here.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StoreClient for RedisStore {
    type Conn = RedisConn;

    async fn connect(&self) -> Result<RedisConn, StoreError> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(RedisConn { conn })
    }
}

/// One multiplexed session to a Redis-compatible store.
#[derive(Clone)]
pub struct RedisConn {
    conn: redis::aio::MultiplexedConnection,
}

#[async_trait]
impl StoreConn for RedisConn {
    async fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: () = self.conn.set(key, value).await?;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.conn.get(key).await?)
    }

    async fn incr(&mut self, key: &str) -> Result<i64, StoreError> {
        Ok(self.conn.incr(key, 1i64).await?)
    }

    async fn lpush(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = self.conn.lpush(key, value).await?;
        Ok(())
    }

    async fn hset(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let _: i64 = self.conn.hset(key, field, value).await?;
        Ok(())
    }
}
