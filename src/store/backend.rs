//! Backing Store Seam
//!
//! Everything above this module talks to the remote store exclusively through
//! [`Backend`] and [`Session`]. A session owns one pooled connection for as long
//! as it lives, which is what makes WATCH/MULTI/EXEC meaningful: the watch is
//! registered on the same connection that later commits.

use super::types::{Commit, KeyType, ScanPage, WriteOp};
use crate::error::StoreResult;

use async_trait::async_trait;
use std::time::Duration;

/// A source of pooled sessions against one store.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Borrows a connection, blocking up to the pool's `max_wait`.
    async fn session(&self) -> StoreResult<Box<dyn Session>>;

    /// Short human-readable description used in logs.
    fn describe(&self) -> String;
}

/// One borrowed connection. Dropping it returns the connection to the pool.
#[async_trait]
pub trait Session: Send {
    async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()>;

    /// Sets several fields in one atomic command.
    async fn hset_multiple(&mut self, key: &str, pairs: &[(String, String)]) -> StoreResult<()>;

    /// Returns the number of fields actually removed.
    async fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64>;

    async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool>;

    async fn hlen(&mut self, key: &str) -> StoreResult<u64>;

    /// One incremental scan step; `count` is a hint, not a bound.
    async fn hscan(&mut self, key: &str, cursor: u64, count: usize) -> StoreResult<ScanPage>;

    async fn exists(&mut self, key: &str) -> StoreResult<bool>;

    async fn key_type(&mut self, key: &str) -> StoreResult<KeyType>;

    /// Resets the expiration of `key`. Returns false if the key does not exist.
    async fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool>;

    async fn incr(&mut self, key: &str) -> StoreResult<i64>;

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>>;

    async fn del(&mut self, key: &str) -> StoreResult<bool>;

    /// Registers an optimistic watch on `key` for the next `exec`.
    async fn watch(&mut self, key: &str) -> StoreResult<()>;

    async fn unwatch(&mut self) -> StoreResult<()>;

    /// Runs `ops` inside MULTI/EXEC. Watches are released either way.
    async fn exec(&mut self, ops: &[WriteOp]) -> StoreResult<Commit>;
}
