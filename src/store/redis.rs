//! Redis Backend
//!
//! Pooled access to a real Redis server. Each pooled connection is a
//! multiplexed connection that is only ever used by the session currently
//! holding it, so WATCH state on the underlying socket belongs to that session.
//!
//! ## Health checks
//! - **Borrow**: with `test_on_borrow`, bb8 pings a connection before handing it out.
//! - **Return**: with `test_on_return`, a connection that saw an I/O failure while
//!   borrowed is reported as broken and dropped instead of being recycled.
//! - **Armed WATCH**: a connection returned between `WATCH` and `EXEC`/`UNWATCH`
//!   (an error or a cancelled future cut the transaction short) is always
//!   dropped. Recycled, its stale watch would abort the next borrower's `EXEC`.

use super::backend::{Backend, Session};
use super::types::{Commit, KeyType, ScanPage, WriteOp};
use crate::config::{MapConfig, PoolConfig};
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use bb8::{ManageConnection, Pool, PooledConnection, RunError};
use redis::aio::MultiplexedConnection;
use redis::{FromRedisValue, Value};
use std::time::Duration;

/// A pooled connection plus the state consulted on return.
pub struct RedisConnection {
    inner: MultiplexedConnection,
    /// Set after an I/O failure or a dropped connection.
    broken: bool,
    /// Set between `WATCH` and the `EXEC`/`UNWATCH` that releases it.
    watching: bool,
}

pub struct RedisConnectionManager {
    /// Parsed server address; connections are opened lazily by the pool.
    client: redis::Client,
    /// Whether I/O failures retire a connection on return.
    test_on_return: bool,
}

impl RedisConnectionManager {
    pub fn new(url: &str, test_on_return: bool) -> StoreResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            test_on_return,
        })
    }

    /// Whether a returned connection must be dropped instead of recycled.
    pub(crate) fn discards(&self, broken: bool, watching: bool) -> bool {
        watching || (self.test_on_return && broken)
    }
}

#[async_trait]
impl ManageConnection for RedisConnectionManager {
    type Connection = RedisConnection;
    type Error = redis::RedisError;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        let inner = self.client.get_multiplexed_async_connection().await?;
        Ok(RedisConnection {
            inner,
            broken: false,
            watching: false,
        })
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        let pong: String = redis::cmd("PING").query_async(&mut conn.inner).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(redis::RedisError::from((
                redis::ErrorKind::ResponseError,
                "unexpected PING reply",
                pong,
            )))
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.discards(conn.broken, conn.watching)
    }
}

/// Backend backed by a bb8 pool of Redis connections.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool<RedisConnectionManager>,
    /// Server address, reported by `describe`.
    url: String,
    /// Checkout timeout, echoed in `PoolTimeout`.
    max_wait: Duration,
}

impl RedisBackend {
    /// Builds the pool and opens `min_idle` connections eagerly.
    pub async fn connect(config: &MapConfig) -> StoreResult<Self> {
        let manager = RedisConnectionManager::new(&config.redis_url, config.pool.test_on_return)?;
        let pool = build_pool(&config.pool)
            .build(manager)
            .await
            .map_err(StoreError::Redis)?;

        tracing::info!(
            "Connected to {} (pool max_total={}, min_idle={})",
            config.redis_url,
            config.pool.max_total,
            config.pool.min_idle
        );

        Ok(Self {
            pool,
            url: config.redis_url.clone(),
            max_wait: config.pool.max_wait,
        })
    }
}

fn build_pool(pool: &PoolConfig) -> bb8::Builder<RedisConnectionManager> {
    // bb8 keeps up to max_size connections idle, which is the configured max_idle
    // whenever max_idle == max_total (the default).
    Pool::builder()
        .max_size(pool.max_total)
        .min_idle(Some(pool.min_idle))
        .test_on_check_out(pool.test_on_borrow)
        .connection_timeout(pool.max_wait)
        .idle_timeout(Some(pool.idle_timeout))
}

#[async_trait]
impl Backend for RedisBackend {
    async fn session(&self) -> StoreResult<Box<dyn Session>> {
        match self.pool.get_owned().await {
            Ok(conn) => Ok(Box::new(RedisSession { conn })),
            Err(RunError::User(e)) => Err(StoreError::Redis(e)),
            Err(RunError::TimedOut) => Err(StoreError::PoolTimeout {
                wait_ms: self.max_wait.as_millis(),
            }),
        }
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

struct RedisSession {
    conn: PooledConnection<'static, RedisConnectionManager>,
}

impl RedisSession {
    async fn query<T: FromRedisValue>(&mut self, cmd: &redis::Cmd) -> StoreResult<T> {
        let result: redis::RedisResult<T> = cmd.query_async(&mut self.conn.inner).await;
        self.track(result)
    }

    fn track<T>(&mut self, result: redis::RedisResult<T>) -> StoreResult<T> {
        if let Err(e) = &result {
            if e.is_io_error() || e.is_connection_dropped() {
                self.conn.broken = true;
            }
        }
        Ok(result?)
    }
}

fn stage(pipe: &mut redis::Pipeline, op: &WriteOp) {
    match op {
        WriteOp::HSet { key, field, value } => {
            pipe.cmd("HSET").arg(key).arg(field).arg(value).ignore();
        }
        WriteOp::HSetMany { key, pairs } => {
            pipe.cmd("HSET").arg(key);
            for (field, value) in pairs {
                pipe.arg(field).arg(value);
            }
            pipe.ignore();
        }
        WriteOp::HDel { key, field } => {
            pipe.cmd("HDEL").arg(key).arg(field).ignore();
        }
        WriteOp::Unlink { key } => {
            pipe.cmd("UNLINK").arg(key).ignore();
        }
        WriteOp::Del { key } => {
            pipe.cmd("DEL").arg(key).ignore();
        }
        WriteOp::Expire { key, ttl } => {
            pipe.cmd("PEXPIRE").arg(key).arg(ttl.as_millis() as u64).ignore();
        }
    }
}

#[async_trait]
impl Session for RedisSession {
    async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("HGET").arg(key).arg(field)).await
    }

    async fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let _: i64 = self
            .query(redis::cmd("HSET").arg(key).arg(field).arg(value))
            .await?;
        Ok(())
    }

    async fn hset_multiple(&mut self, key: &str, pairs: &[(String, String)]) -> StoreResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (field, value) in pairs {
            cmd.arg(field).arg(value);
        }
        let _: i64 = self.query(&cmd).await?;
        Ok(())
    }

    async fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.query(redis::cmd("HDEL").arg(key).arg(fields)).await
    }

    async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        self.query(redis::cmd("HEXISTS").arg(key).arg(field)).await
    }

    async fn hlen(&mut self, key: &str) -> StoreResult<u64> {
        self.query(redis::cmd("HLEN").arg(key)).await
    }

    async fn hscan(&mut self, key: &str, cursor: u64, count: usize) -> StoreResult<ScanPage> {
        let (cursor, flat): (u64, Vec<String>) = self
            .query(
                redis::cmd("HSCAN")
                    .arg(key)
                    .arg(cursor)
                    .arg("COUNT")
                    .arg(count),
            )
            .await?;

        let mut entries = Vec::with_capacity(flat.len() / 2);
        let mut iter = flat.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            entries.push((field, value));
        }

        Ok(ScanPage { cursor, entries })
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn key_type(&mut self, key: &str) -> StoreResult<KeyType> {
        let raw: String = self.query(redis::cmd("TYPE").arg(key)).await?;
        Ok(KeyType::parse(&raw))
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.query(
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl.as_millis() as u64),
        )
        .await
    }

    async fn incr(&mut self, key: &str) -> StoreResult<i64> {
        self.query(redis::cmd("INCR").arg(key)).await
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn del(&mut self, key: &str) -> StoreResult<bool> {
        let removed: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn watch(&mut self, key: &str) -> StoreResult<()> {
        // Armed before sending: a cancelled WATCH may still have reached the server.
        self.conn.watching = true;
        let _: () = self.query(redis::cmd("WATCH").arg(key)).await?;
        Ok(())
    }

    async fn unwatch(&mut self) -> StoreResult<()> {
        let _: () = self.query(&redis::cmd("UNWATCH")).await?;
        self.conn.watching = false;
        Ok(())
    }

    async fn exec(&mut self, ops: &[WriteOp]) -> StoreResult<Commit> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            stage(&mut pipe, op);
        }

        let result: redis::RedisResult<Value> = pipe.query_async(&mut self.conn.inner).await;
        let reply = self.track(result)?;
        self.conn.watching = false;
        // EXEC replies nil when a watched key changed.
        match reply {
            Value::Nil => Ok(Commit::Aborted),
            _ => Ok(Commit::Applied),
        }
    }
}
