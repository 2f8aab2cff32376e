//! Redis implementation of [`KeyValueStore`].
//!
//! Only available with the `redis` feature. Connections come from an `r2d2`
//! pool sized after the writer pool: every writer thread can hold one
//! connection, with headroom for gauges and ad-hoc queries. The pool connects
//! lazily, so constructing the store never blocks on the network.

use std::fmt;

use redis::Commands;

use super::kv::{KeyValueStore, WriteOp};
use crate::error::{CacheError, ConfigError, Result};

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    pool: r2d2::Pool<redis::Client>,
    endpoint: String,
}

impl RedisKeyValueStore {
    /// Creates a store for `hostname:port` sized for `writer_threads` concurrent users.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] if the address cannot be
    /// turned into a Redis connection URL.
    pub fn connect(hostname: &str, port: u16, writer_threads: usize) -> Result<Self> {
        let endpoint = format!("redis://{hostname}:{port}/");
        let client = redis::Client::open(endpoint.as_str()).map_err(|e| ConfigError::InvalidEndpoint {
            reason: format!("{endpoint}: {e}"),
        })?;

        let min_idle = u32::try_from(writer_threads.max(1)).unwrap_or(u32::MAX);
        let pool = r2d2::Pool::builder()
            .min_idle(Some(min_idle))
            .max_size(min_idle.saturating_mul(4))
            .build_unchecked(client);

        tracing::debug!(%endpoint, min_idle, "created redis connection pool");
        Ok(Self { pool, endpoint })
    }

    /// The connection URL this store talks to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn connection(&self) -> Result<r2d2::PooledConnection<redis::Client>> {
        self.pool.get().map_err(|e| CacheError::Pool(e).into())
    }
}

impl fmt::Debug for RedisKeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisKeyValueStore")
            .field("endpoint", &self.endpoint)
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl KeyValueStore for RedisKeyValueStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        let value: Option<Vec<u8>> = conn.get(key).map_err(CacheError::Redis)?;
        Ok(value)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut conn = self.connection()?;
        let () = conn.set(key, value).map_err(CacheError::Redis)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut conn = self.connection()?;
        let () = conn.del(key).map_err(CacheError::Redis)?;
        Ok(())
    }

    fn list(&self, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut conn = self.connection()?;
        let items: Vec<Vec<u8>> = conn.lrange(key, 0, -1).map_err(CacheError::Redis)?;
        Ok(items)
    }

    fn apply_atomic(&self, ops: &[WriteOp]) -> Result<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.set(key.as_slice(), value.as_slice()).ignore();
                }
                WriteOp::ListPush { key, value } => {
                    pipe.lpush(key.as_slice(), value.as_slice()).ignore();
                }
            }
        }

        let mut conn = self.connection()?;
        let () = pipe.query(&mut *conn).map_err(CacheError::Redis)?;
        Ok(())
    }

    fn key_count(&self) -> Result<u64> {
        let mut conn = self.connection()?;
        let count: u64 = redis::cmd("DBSIZE")
            .query(&mut *conn)
            .map_err(CacheError::Redis)?;
        Ok(count)
    }
}
