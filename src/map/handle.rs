use super::views::{Keys, Values};
use crate::error::Result;
use crate::fields::{FieldStore, Value};
use crate::lifecycle::Lease;
use crate::registry::MapKey;
use crate::scan::{Entry, ScanIterator};
use crate::store::Backend;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Decrements the owning client's live-handle count on drop.
pub(crate) struct LiveHandle {
    counter: Arc<AtomicUsize>,
}

impl LiveHandle {
    pub(crate) fn new(counter: Arc<AtomicUsize>) -> Self {
        Self { counter }
    }
}

impl Drop for LiveHandle {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A handle on one shared backing hash.
///
/// Keys and values are nullable strings. Single-field operations are atomic per
/// field; bulk operations and iteration are weakly consistent. Other handles,
/// in this process or elsewhere, may use the same hash concurrently.
///
/// Dropping the handle stops its lease. The hash itself is left to expire.
pub struct RedisMap {
    key: MapKey,
    /// Single-field and bulk writes against the backing hash.
    fields: FieldStore,
    /// Used to open scans.
    backend: Arc<dyn Backend>,
    /// Renewal task; aborted when the handle drops.
    lease: Lease,
    ttl: Duration,
    scan_batch_size: usize,
    _live: LiveHandle,
}

impl RedisMap {
    pub(crate) fn new(
        key: MapKey,
        fields: FieldStore,
        backend: Arc<dyn Backend>,
        lease: Lease,
        ttl: Duration,
        scan_batch_size: usize,
        live: LiveHandle,
    ) -> Self {
        Self {
            key,
            fields,
            backend,
            lease,
            ttl,
            scan_batch_size,
            _live: live,
        }
    }

    pub fn key(&self) -> &MapKey {
        &self.key
    }

    /// Expiration horizon the lease keeps resetting.
    pub fn time_to_live(&self) -> Duration {
        self.ttl
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    /// Stops renewing the backing hash without dropping the handle.
    pub fn stop_renewal(&self) {
        self.lease.stop();
    }

    // --- Queries ---

    pub async fn size(&self) -> Result<usize> {
        self.fields.size().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    pub async fn contains_key(&self, key: Option<&str>) -> Result<bool> {
        self.fields.contains_key(key).await
    }

    /// Scans the whole hash.
    pub async fn contains_value(&self, value: Option<&str>) -> Result<bool> {
        let mut entries = self.entries();
        while let Some((_, v)) = entries.try_next().await? {
            if v.as_deref() == value {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The value mapped to `key`; `None` both when absent and when mapped to null.
    pub async fn get(&self, key: Option<&str>) -> Result<Value> {
        Ok(self.fields.get(key).await?.flatten())
    }

    /// Like `get`, but tells an absent key (`None`) from a null mapping (`Some(None)`).
    pub async fn lookup(&self, key: Option<&str>) -> Result<Option<Value>> {
        self.fields.get(key).await
    }

    pub async fn get_or_default(&self, key: Option<&str>, default: Option<&str>) -> Result<Value> {
        Ok(match self.fields.get(key).await? {
            Some(value) => value,
            None => default.map(str::to_string),
        })
    }

    // --- Single-field writes ---

    /// Returns the previous mapping, `None` if there was none.
    pub async fn put(&self, key: Option<&str>, value: Option<&str>) -> Result<Option<Value>> {
        self.fields.put(key, value).await
    }

    pub async fn put_if_absent(
        &self,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Option<Value>> {
        self.fields.put_if_absent(key, value).await
    }

    pub async fn remove(&self, key: Option<&str>) -> Result<Option<Value>> {
        self.fields.remove(key).await
    }

    /// Removes `key` only while it maps to `value`.
    pub async fn remove_entry(&self, key: Option<&str>, value: Option<&str>) -> Result<bool> {
        self.fields.remove_if(key, value).await
    }

    pub async fn replace(&self, key: Option<&str>, value: Option<&str>) -> Result<Option<Value>> {
        self.fields.replace(key, value).await
    }

    pub async fn replace_if(
        &self,
        key: Option<&str>,
        old: Option<&str>,
        new: Option<&str>,
    ) -> Result<bool> {
        self.fields.replace_if(key, old, new).await
    }

    pub async fn compute<F>(&self, key: Option<&str>, remapping: F) -> Result<Value>
    where
        F: FnMut(Option<&str>, Option<&str>) -> Value + Send,
    {
        self.fields.compute(key, remapping).await
    }

    pub async fn compute_if_absent<F>(&self, key: Option<&str>, mapping: F) -> Result<Value>
    where
        F: FnOnce(Option<&str>) -> Value + Send,
    {
        self.fields.compute_if_absent(key, mapping).await
    }

    pub async fn compute_if_present<F>(&self, key: Option<&str>, remapping: F) -> Result<Value>
    where
        F: FnMut(Option<&str>, &str) -> Value + Send,
    {
        self.fields.compute_if_present(key, remapping).await
    }

    pub async fn merge<F>(&self, key: Option<&str>, value: Option<&str>, remapping: F) -> Result<Value>
    where
        F: FnMut(&str, &str) -> Value + Send,
    {
        self.fields.merge(key, value, remapping).await
    }

    // --- Bulk operations ---

    /// Writes all pairs in one `HSET`, committed with the marker and expiration.
    pub async fn put_all(&self, entries: &[(Value, Value)]) -> Result<()> {
        self.fields.put_all(entries).await
    }

    /// Deletes the given keys in one command. Returns how many existed.
    pub async fn remove_keys(&self, keys: &[Value]) -> Result<u64> {
        self.fields.remove_all(keys).await
    }

    /// Rewrites every key seen by a scan with `function(key, value)`.
    ///
    /// Each rewrite is its own optimistic commit against the value current at
    /// that moment; keys removed in the meantime are skipped.
    pub async fn replace_all<F>(&self, mut function: F) -> Result<()>
    where
        F: FnMut(Option<&str>, Option<&str>) -> Value + Send,
    {
        let mut keys = self.keys();
        while let Some(key) = keys.try_next().await? {
            self.fields
                .replace_with(key.as_deref(), &mut function)
                .await?;
        }
        Ok(())
    }

    /// Calls `action` for every scanned entry whose key still exists.
    pub async fn for_each<F>(&self, mut action: F) -> Result<()>
    where
        F: FnMut(Option<&str>, Option<&str>) + Send,
    {
        let mut entries = self.entries();
        while let Some((key, value)) = entries.try_next().await? {
            if self.fields.contains_key(key.as_deref()).await? {
                action(key.as_deref(), value.as_deref());
            }
        }
        Ok(())
    }

    /// Removes every scanned entry for which `keep` returns false.
    pub async fn retain<F>(&self, mut keep: F) -> Result<u64>
    where
        F: FnMut(Option<&str>, Option<&str>) -> bool + Send,
    {
        let mut doomed = Vec::new();
        let mut entries = self.entries();
        while let Some((key, value)) = entries.try_next().await? {
            if !keep(key.as_deref(), value.as_deref()) {
                doomed.push(key);
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }
        self.fields.remove_all(&doomed).await
    }

    /// Atomically empties the hash and resets its expiration.
    pub async fn clear(&self) -> Result<()> {
        self.fields.clear().await
    }

    // --- Iteration ---

    pub fn entries(&self) -> ScanIterator {
        ScanIterator::new(self.backend.clone(), self.fields.key(), self.scan_batch_size)
    }

    pub fn keys(&self) -> Keys {
        Keys::new(self.entries())
    }

    pub fn values(&self) -> Values {
        Values::new(self.entries())
    }

    /// Weakly consistent copy of the current contents.
    pub async fn to_hash_map(&self) -> Result<HashMap<Value, Value>> {
        let entries: Vec<Entry> = self.entries().collect_remaining().await?;
        Ok(entries.into_iter().collect())
    }

    /// True if both maps hold the same mappings, compared via snapshots.
    pub async fn content_eq(&self, other: &RedisMap) -> Result<bool> {
        if self.key == other.key {
            return Ok(true);
        }
        if self.size().await? != other.size().await? {
            return Ok(false);
        }
        Ok(self.to_hash_map().await? == other.to_hash_map().await?)
    }

    /// Renders `"<key> {k=v, ...}"`, with nulls shown as `null`.
    pub async fn render(&self) -> Result<String> {
        let mut out = format!("{} {{", self.key);
        let mut entries = self.entries();
        let mut first = true;
        while let Some((key, value)) = entries.try_next().await? {
            if !first {
                out.push_str(", ");
            }
            first = false;
            out.push_str(key.as_deref().unwrap_or("null"));
            out.push('=');
            out.push_str(value.as_deref().unwrap_or("null"));
        }
        out.push('}');
        Ok(out)
    }
}

impl fmt::Display for RedisMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

impl fmt::Debug for RedisMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisMap")
            .field("key", &self.key.to_string())
            .field("ttl", &self.ttl)
            .field("renewing", &self.lease.is_running())
            .finish()
    }
}
