//! In-Process Store
//!
//! A single-process stand-in for the Redis server that reproduces the
//! behaviour the map protocols depend on:
//!
//! - **WATCH**: every write bumps a per-key version; `exec` aborts if any watched
//!   version moved (expiry and `expire` count as writes, as in Redis).
//! - **Expiry**: keys carry an optional deadline and are purged lazily on access,
//!   plus a periodic sweep on session checkout that also forgets the versions
//!   of deleted keys.
//! - **Empty hashes vanish**: deleting the last field deletes the key.
//! - **HSCAN**: small hashes use a compact encoding and are returned whole with
//!   cursor 0. Larger ones live in a power-of-two bucket table that grows and
//!   shrinks eagerly and is walked with the reverse-binary cursor, so a scan that
//!   spans a shrink can see the same field twice.
//! - **Pool**: a semaphore bounds concurrent sessions and acquisition times out
//!   after `max_wait`.

use super::backend::{Backend, Session};
use super::types::{Commit, KeyType, ScanPage, WriteOp, SCAN_START};
use crate::config::PoolConfig;
use crate::error::{StoreError, StoreResult};

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Hashes with at most this many fields keep the compact encoding.
const COMPACT_LIMIT: usize = 128;
const MIN_BUCKETS: usize = 4;
/// Shrink once fewer than one bucket in ten is used.
const MIN_FILL_RATIO: usize = 10;
/// Minimum spacing of active expiry sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// --- Hash encodings ---

#[derive(Debug)]
enum Encoding {
    Compact(Vec<(String, String)>),
    Table(BucketTable),
}

#[derive(Debug)]
struct BucketTable {
    buckets: Vec<Vec<(String, String)>>,
    len: usize,
}

impl BucketTable {
    fn with_entries(entries: Vec<(String, String)>) -> Self {
        let size = entries.len().next_power_of_two().max(MIN_BUCKETS);
        let mut table = Self {
            buckets: vec![Vec::new(); size],
            len: 0,
        };
        for (field, value) in entries {
            let idx = table.bucket_of(&field);
            table.buckets[idx].push((field, value));
            table.len += 1;
        }
        table
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }

    fn bucket_of(&self, field: &str) -> usize {
        (hash_field(field) as usize) & self.mask()
    }

    fn get(&self, field: &str) -> Option<&String> {
        self.buckets[self.bucket_of(field)]
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    fn insert(&mut self, field: String, value: String) -> bool {
        let idx = self.bucket_of(&field);
        if let Some(slot) = self.buckets[idx].iter_mut().find(|(f, _)| *f == field) {
            slot.1 = value;
            return false;
        }
        self.buckets[idx].push((field, value));
        self.len += 1;
        if self.len > self.buckets.len() {
            self.resize(self.len.next_power_of_two());
        }
        true
    }

    fn remove(&mut self, field: &str) -> bool {
        let idx = self.bucket_of(field);
        let bucket = &mut self.buckets[idx];
        match bucket.iter().position(|(f, _)| f == field) {
            Some(pos) => {
                bucket.swap_remove(pos);
                self.len -= 1;
                if self.buckets.len() > MIN_BUCKETS && self.len * MIN_FILL_RATIO < self.buckets.len()
                {
                    self.resize(self.len.next_power_of_two().max(MIN_BUCKETS));
                }
                true
            }
            None => false,
        }
    }

    fn resize(&mut self, size: usize) {
        let entries: Vec<(String, String)> = self.buckets.drain(..).flatten().collect();
        self.buckets = vec![Vec::new(); size];
        for (field, value) in entries {
            let idx = self.bucket_of(&field);
            self.buckets[idx].push((field, value));
        }
    }

    /// Walks buckets in reverse-binary cursor order until `count` entries were
    /// collected or the cursor wrapped to zero.
    fn scan(&self, cursor: u64, count: usize) -> ScanPage {
        let mask = self.mask() as u64;
        let mut cursor = cursor;
        let mut entries = Vec::new();
        let mut budget = count.saturating_mul(10).max(1);

        loop {
            entries.extend(self.buckets[(cursor & mask) as usize].iter().cloned());

            cursor |= !mask;
            cursor = cursor.reverse_bits();
            cursor = cursor.wrapping_add(1);
            cursor = cursor.reverse_bits();

            budget -= 1;
            if cursor == SCAN_START || budget == 0 || entries.len() >= count {
                break;
            }
        }

        ScanPage { cursor, entries }
    }

    fn entries(&self) -> impl Iterator<Item = &(String, String)> {
        self.buckets.iter().flatten()
    }
}

fn hash_field(field: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    field.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
struct HashValue {
    encoding: Encoding,
}

impl HashValue {
    fn new() -> Self {
        Self {
            encoding: Encoding::Compact(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match &self.encoding {
            Encoding::Compact(entries) => entries.len(),
            Encoding::Table(table) => table.len,
        }
    }

    fn get(&self, field: &str) -> Option<&String> {
        match &self.encoding {
            Encoding::Compact(entries) => entries.iter().find(|(f, _)| f == field).map(|(_, v)| v),
            Encoding::Table(table) => table.get(field),
        }
    }

    fn insert(&mut self, field: String, value: String) {
        match &mut self.encoding {
            Encoding::Compact(entries) => {
                if let Some(slot) = entries.iter_mut().find(|(f, _)| *f == field) {
                    slot.1 = value;
                    return;
                }
                entries.push((field, value));
                // Conversion is one-way, as with Redis listpacks.
                if entries.len() > COMPACT_LIMIT {
                    let table = BucketTable::with_entries(std::mem::take(entries));
                    self.encoding = Encoding::Table(table);
                }
            }
            Encoding::Table(table) => {
                table.insert(field, value);
            }
        }
    }

    fn remove(&mut self, field: &str) -> bool {
        match &mut self.encoding {
            Encoding::Compact(entries) => match entries.iter().position(|(f, _)| f == field) {
                Some(pos) => {
                    entries.remove(pos);
                    true
                }
                None => false,
            },
            Encoding::Table(table) => table.remove(field),
        }
    }

    fn scan(&self, cursor: u64, count: usize) -> ScanPage {
        match &self.encoding {
            Encoding::Compact(entries) => ScanPage {
                cursor: SCAN_START,
                entries: entries.clone(),
            },
            Encoding::Table(table) => table.scan(cursor, count),
        }
    }

    fn contains_value(&self, value: &str) -> bool {
        match &self.encoding {
            Encoding::Compact(entries) => entries.iter().any(|(_, v)| v == value),
            Encoding::Table(table) => table.entries().any(|(_, v)| v == value),
        }
    }
}

// --- Keyspace ---

#[derive(Debug)]
enum StoredValue {
    Hash(HashValue),
    Str(String),
}

#[derive(Debug)]
struct Slot {
    value: StoredValue,
    expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Keyspace {
    slots: HashMap<String, Slot>,
    /// Last write per key. Only live keys and keys deleted since the last
    /// sweep have an entry.
    versions: HashMap<String, u64>,
    /// Version reported for keys without an entry. Raised whenever entries are
    /// forgotten, so a watch taken before a sweep never matches after it.
    version_floor: u64,
    clock: u64,
    next_sweep: Option<Instant>,
}

impl Keyspace {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn version(&self, key: &str) -> u64 {
        self.versions
            .get(key)
            .copied()
            .unwrap_or(self.version_floor)
    }

    /// Drops every expired key and the versions of keys that no longer exist.
    fn sweep_if_due(&mut self) {
        let now = Instant::now();
        if matches!(self.next_sweep, Some(due) if now < due) {
            return;
        }
        self.next_sweep = Some(now + SWEEP_INTERVAL);

        let expired: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.expires_at.map_or(false, |deadline| deadline <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.slots.remove(key);
        }

        let before = self.versions.len();
        let slots = &self.slots;
        self.versions.retain(|key, _| slots.contains_key(key));
        if self.versions.len() != before || !expired.is_empty() {
            self.clock += 1;
            self.version_floor = self.clock;
            tracing::trace!(
                "Swept {} expired keys, forgot {} versions",
                expired.len(),
                before - self.versions.len()
            );
        }
    }

    /// Drops `key` if its deadline has passed.
    fn purge(&mut self, key: &str) {
        let expired = self
            .slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|deadline| deadline <= Instant::now())
            .unwrap_or(false);
        if expired {
            self.slots.remove(key);
            self.touch(key);
            tracing::trace!("Key {} expired", key);
        }
    }

    fn hash(&mut self, key: &str) -> StoreResult<Option<&HashValue>> {
        self.purge(key);
        match self.slots.get(key) {
            None => Ok(None),
            Some(Slot {
                value: StoredValue::Hash(hash),
                ..
            }) => Ok(Some(hash)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hash_for_write(&mut self, key: &str) -> StoreResult<&mut HashValue> {
        self.purge(key);
        let slot = self.slots.entry(key.to_string()).or_insert_with(|| Slot {
            value: StoredValue::Hash(HashValue::new()),
            expires_at: None,
        });
        match &mut slot.value {
            StoredValue::Hash(hash) => Ok(hash),
            StoredValue::Str(_) => Err(wrong_type(key)),
        }
    }

    fn hset(&mut self, key: &str, pairs: &[(String, String)]) -> StoreResult<()> {
        let hash = self.hash_for_write(key)?;
        for (field, value) in pairs {
            hash.insert(field.clone(), value.clone());
        }
        self.touch(key);
        Ok(())
    }

    fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
        self.purge(key);
        let (removed, now_empty) = match self.slots.get_mut(key) {
            None => return Ok(0),
            Some(Slot {
                value: StoredValue::Hash(hash),
                ..
            }) => {
                let removed = fields.iter().filter(|field| hash.remove(field)).count() as u64;
                (removed, hash.len() == 0)
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            self.slots.remove(key);
        }
        if removed > 0 {
            self.touch(key);
        }
        Ok(removed)
    }

    fn delete(&mut self, key: &str) -> bool {
        self.purge(key);
        let removed = self.slots.remove(key).is_some();
        if removed {
            self.touch(key);
        }
        removed
    }

    fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        self.purge(key);
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                self.touch(key);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, op: &WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::HSet { key, field, value } => {
                self.hset(key, &[(field.clone(), value.clone())])
            }
            WriteOp::HSetMany { key, pairs } => self.hset(key, pairs),
            WriteOp::HDel { key, field } => self.hdel(key, std::slice::from_ref(field)).map(|_| ()),
            WriteOp::Unlink { key } | WriteOp::Del { key } => {
                self.delete(key);
                Ok(())
            }
            WriteOp::Expire { key, ttl } => {
                self.expire(key, *ttl);
                Ok(())
            }
        }
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

// --- Backend ---

/// In-process backend sharing one keyspace between all of its sessions.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Shared by every session; commands lock it one at a time.
    keyspace: Arc<Mutex<Keyspace>>,
    /// One permit per pooled connection.
    permits: Arc<Semaphore>,
    /// Longest a checkout waits for a permit.
    max_wait: Duration,
}

impl MemoryBackend {
    pub fn new(pool: &PoolConfig) -> Self {
        Self {
            keyspace: Arc::new(Mutex::new(Keyspace::default())),
            permits: Arc::new(Semaphore::new(pool.max_total as usize)),
            max_wait: pool.max_wait,
        }
    }

    /// Stores a plain string value, e.g. to occupy a key with a non-hash type.
    pub async fn insert_string(&self, key: &str, value: &str) {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.slots.insert(
            key.to_string(),
            Slot {
                value: StoredValue::Str(value.to_string()),
                expires_at: None,
            },
        );
        keyspace.touch(key);
    }

    /// Remaining time to live of `key`, if it exists and has a deadline.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge(key);
        keyspace
            .slots
            .get(key)
            .and_then(|slot| slot.expires_at)
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// True if any field of the hash at `key` holds `value`.
    pub async fn hash_contains_value(&self, key: &str, value: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace
            .hash(key)?
            .map(|hash| hash.contains_value(value))
            .unwrap_or(false))
    }

    pub fn available_sessions(&self) -> usize {
        self.permits.available_permits()
    }

    #[cfg(test)]
    pub(crate) async fn tracked_versions(&self) -> usize {
        self.keyspace.lock().await.versions.len()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn session(&self) -> StoreResult<Box<dyn Session>> {
        let permit = match tokio::time::timeout(self.max_wait, self.permits.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StoreError::Pool("session pool closed".into())),
            Err(_) => {
                return Err(StoreError::PoolTimeout {
                    wait_ms: self.max_wait.as_millis(),
                })
            }
        };

        self.keyspace.lock().await.sweep_if_due();

        Ok(Box::new(MemorySession {
            keyspace: self.keyspace.clone(),
            watched: Vec::new(),
            _permit: permit,
        }))
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}

struct MemorySession {
    keyspace: Arc<Mutex<Keyspace>>,
    watched: Vec<(String, u64)>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Session for MemorySession {
    async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.hash(key)?.and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.hset(key, &[(field.to_string(), value.to_string())])
    }

    async fn hset_multiple(&mut self, key: &str, pairs: &[(String, String)]) -> StoreResult<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut keyspace = self.keyspace.lock().await;
        keyspace.hset(key, pairs)
    }

    async fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.hdel(key, fields)
    }

    async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace
            .hash(key)?
            .map(|hash| hash.get(field).is_some())
            .unwrap_or(false))
    }

    async fn hlen(&mut self, key: &str) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.hash(key)?.map(|hash| hash.len() as u64).unwrap_or(0))
    }

    async fn hscan(&mut self, key: &str, cursor: u64, count: usize) -> StoreResult<ScanPage> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace
            .hash(key)?
            .map(|hash| hash.scan(cursor, count))
            .unwrap_or_default())
    }

    async fn exists(&mut self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge(key);
        Ok(keyspace.slots.contains_key(key))
    }

    async fn key_type(&mut self, key: &str) -> StoreResult<KeyType> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge(key);
        Ok(match keyspace.slots.get(key) {
            None => KeyType::None,
            Some(Slot {
                value: StoredValue::Hash(_),
                ..
            }) => KeyType::Hash,
            Some(Slot {
                value: StoredValue::Str(_),
                ..
            }) => KeyType::String,
        })
    }

    async fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.expire(key, ttl))
    }

    async fn incr(&mut self, key: &str) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge(key);
        let next = match keyspace.slots.get_mut(key) {
            None => {
                keyspace.slots.insert(
                    key.to_string(),
                    Slot {
                        value: StoredValue::Str("1".to_string()),
                        expires_at: None,
                    },
                );
                1
            }
            Some(Slot {
                value: StoredValue::Str(raw),
                ..
            }) => {
                let current: i64 = raw.parse().map_err(|_| StoreError::NotAnInteger {
                    key: key.to_string(),
                })?;
                let next = current.checked_add(1).ok_or_else(|| StoreError::NotAnInteger {
                    key: key.to_string(),
                })?;
                *raw = next.to_string();
                next
            }
            Some(_) => return Err(wrong_type(key)),
        };
        keyspace.touch(key);
        Ok(next)
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge(key);
        match keyspace.slots.get(key) {
            None => Ok(None),
            Some(Slot {
                value: StoredValue::Str(raw),
                ..
            }) => Ok(Some(raw.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn del(&mut self, key: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.delete(key))
    }

    async fn watch(&mut self, key: &str) -> StoreResult<()> {
        let mut keyspace = self.keyspace.lock().await;
        keyspace.purge(key);
        let version = keyspace.version(key);
        self.watched.push((key.to_string(), version));
        Ok(())
    }

    async fn unwatch(&mut self) -> StoreResult<()> {
        self.watched.clear();
        Ok(())
    }

    async fn exec(&mut self, ops: &[WriteOp]) -> StoreResult<Commit> {
        let watched = std::mem::take(&mut self.watched);
        let mut keyspace = self.keyspace.lock().await;

        for (key, version) in &watched {
            keyspace.purge(key);
            if keyspace.version(key) != *version {
                return Ok(Commit::Aborted);
            }
        }

        // Like Redis, a failing command does not roll back the others.
        let mut first_error = None;
        for op in ops {
            if let Err(e) = keyspace.apply(op) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Commit::Applied),
        }
    }
}
