//! Optimistic field operations on one backing hash.
//!
//! Every read-modify-write runs the same loop on one pooled session:
//!
//! 1. `WATCH` the hash key.
//! 2. `HGET` the field and decode it.
//! 3. Ask the operation's rule what to do.
//! 4. Stage the `HSET`/`HDEL` in `MULTI`/`EXEC`.
//! 5. If `EXEC` aborts, start over.
//!
//! Every `HSET` is staged together with the empty marker and a fresh expiration.
//! A hash that expired under a live handle is thereby recreated whole instead
//! of coming back without its marker and without a deadline.
//!
//! The watch covers the whole key, so a competing `clear`, an expiry, a lease
//! renewal or a write to another field all cause a retry. Retries are unbounded
//! and have no backoff: under sustained contention on one hash an operation can
//! spin for as long as the contention lasts.

use super::rules::{self, Step};
use super::tokens::{self, EMPTY_FIELD_TOKEN};
use super::Value;
use crate::error::{MapError, Result};
use crate::registry::MapKey;
use crate::store::{Backend, Commit, WriteOp};

use std::sync::Arc;
use std::time::Duration;

pub struct FieldStore {
    /// Store holding the backing hash.
    backend: Arc<dyn Backend>,
    /// Rendered hash key, e.g. `redis-map:42`.
    key: String,
    /// Expiration applied whenever this store recreates or clears the hash.
    ttl: Duration,
}

impl FieldStore {
    pub fn new(backend: Arc<dyn Backend>, key: &MapKey, ttl: Duration) -> Self {
        Self {
            backend,
            key: key.to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Marker write plus expiration, staged after every field write.
    fn keep_alive_ops(&self) -> [WriteOp; 2] {
        [
            WriteOp::HSet {
                key: self.key.clone(),
                field: EMPTY_FIELD_TOKEN.to_string(),
                value: EMPTY_FIELD_TOKEN.to_string(),
            },
            WriteOp::Expire {
                key: self.key.clone(),
                ttl: self.ttl,
            },
        ]
    }

    /// Runs an unwatched transaction until it is applied.
    ///
    /// Without a watch EXEC has nothing to abort on, but a connection that
    /// still carries a stale watch would report `Aborted` and apply nothing.
    async fn commit_unwatched(&self, ops: &[WriteOp]) -> Result<()> {
        let mut session = self.backend.session().await?;
        loop {
            session.unwatch().await?;
            match session.exec(ops).await? {
                Commit::Applied => return Ok(()),
                Commit::Aborted => {
                    tracing::debug!("Unwatched commit on {} aborted, retrying", self.key);
                }
            }
        }
    }

    /// Inserts the empty marker. Idempotent.
    pub async fn initialize(&self) -> Result<()> {
        let mut session = self.backend.session().await?;
        session
            .hset(&self.key, EMPTY_FIELD_TOKEN, EMPTY_FIELD_TOKEN)
            .await?;
        Ok(())
    }

    /// Field count without the marker, floored at zero.
    pub async fn size(&self) -> Result<usize> {
        let mut session = self.backend.session().await?;
        let raw = session.hlen(&self.key).await?;
        Ok(usize::try_from(raw.saturating_sub(1)).unwrap_or(usize::MAX))
    }

    /// Reads one field: `None` if absent, `Some(None)` if mapped to null.
    pub async fn get(&self, key: Option<&str>) -> Result<Option<Value>> {
        let mut session = self.backend.session().await?;
        let raw = session.hget(&self.key, &tokens::encode(key)).await?;
        Ok(raw.map(tokens::decode))
    }

    pub async fn contains_key(&self, key: Option<&str>) -> Result<bool> {
        let mut session = self.backend.session().await?;
        Ok(session.hexists(&self.key, &tokens::encode(key)).await?)
    }

    pub async fn put(&self, key: Option<&str>, value: Option<&str>) -> Result<Option<Value>> {
        let value = value.map(str::to_string);
        self.read_modify_write(key, |current| rules::put(current, value.clone()))
            .await
    }

    pub async fn put_if_absent(
        &self,
        key: Option<&str>,
        value: Option<&str>,
    ) -> Result<Option<Value>> {
        let value = value.map(str::to_string);
        self.read_modify_write(key, |current| rules::put_if_absent(current, value.clone()))
            .await
    }

    pub async fn remove(&self, key: Option<&str>) -> Result<Option<Value>> {
        self.read_modify_write(key, rules::remove).await
    }

    /// Removes the field only if it currently maps to `expected`.
    pub async fn remove_if(&self, key: Option<&str>, expected: Option<&str>) -> Result<bool> {
        let expected = expected.map(str::to_string);
        self.read_modify_write(key, |current| rules::remove_if(current, &expected))
            .await
    }

    pub async fn replace(&self, key: Option<&str>, value: Option<&str>) -> Result<Option<Value>> {
        let value = value.map(str::to_string);
        self.read_modify_write(key, |current| rules::replace(current, value.clone()))
            .await
    }

    /// Sets the field to `value` only if it currently maps to `expected`.
    pub async fn replace_if(
        &self,
        key: Option<&str>,
        expected: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        let expected = expected.map(str::to_string);
        let value = value.map(str::to_string);
        self.read_modify_write(key, |current| {
            rules::replace_if(current, &expected, value.clone())
        })
        .await
    }

    /// `mapping` runs at most once, even if the commit has to be retried.
    pub async fn compute_if_absent<F>(&self, key: Option<&str>, mapping: F) -> Result<Value>
    where
        F: FnOnce(Option<&str>) -> Value + Send,
    {
        let mut mapping = Some(mapping);
        let mut computed: Option<Value> = None;
        self.read_modify_write(key, |current| {
            rules::compute_if_absent(current, || {
                computed
                    .get_or_insert_with(|| mapping.take().and_then(|f| f(key)))
                    .clone()
            })
        })
        .await
    }

    /// `remapping` may run once per attempt.
    pub async fn compute_if_present<F>(&self, key: Option<&str>, mut remapping: F) -> Result<Value>
    where
        F: FnMut(Option<&str>, &str) -> Value + Send,
    {
        self.read_modify_write(key, |current| {
            rules::compute_if_present(current, |old| remapping(key, old))
        })
        .await
    }

    /// `remapping` may run once per attempt.
    pub async fn compute<F>(&self, key: Option<&str>, mut remapping: F) -> Result<Value>
    where
        F: FnMut(Option<&str>, Option<&str>) -> Value + Send,
    {
        self.read_modify_write(key, |current| {
            rules::compute(current, |old| remapping(key, old))
        })
        .await
    }

    /// Fails with `NullArgument` if `value` is `None`.
    pub async fn merge<F>(
        &self,
        key: Option<&str>,
        value: Option<&str>,
        mut remapping: F,
    ) -> Result<Value>
    where
        F: FnMut(&str, &str) -> Value + Send,
    {
        let value = value.ok_or(MapError::NullArgument("value"))?;
        self.read_modify_write(key, |current| {
            rules::merge(current, value, &mut remapping)
        })
        .await
    }

    /// Overwrites the field with `remapping(key, old)` if it exists.
    pub async fn replace_with<F>(&self, key: Option<&str>, mut remapping: F) -> Result<bool>
    where
        F: FnMut(Option<&str>, Option<&str>) -> Value + Send,
    {
        self.read_modify_write(key, |current| {
            rules::replace_with(current, |old| remapping(key, old))
        })
        .await
    }

    /// Writes every pair with one multi-field `HSET`.
    pub async fn put_all(&self, entries: &[(Value, Value)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let pairs: Vec<(String, String)> = entries
            .iter()
            .map(|(k, v)| (tokens::encode(k.as_deref()), tokens::encode(v.as_deref())))
            .collect();

        let [marker, expire] = self.keep_alive_ops();
        let ops = [
            WriteOp::HSetMany {
                key: self.key.clone(),
                pairs,
            },
            marker,
            expire,
        ];
        self.commit_unwatched(&ops).await
    }

    /// Deletes the given fields with one `HDEL`. Returns how many existed.
    pub async fn remove_all(&self, keys: &[Value]) -> Result<u64> {
        let fields: Vec<String> = keys.iter().map(|k| tokens::encode(k.as_deref())).collect();
        let mut session = self.backend.session().await?;
        Ok(session.hdel(&self.key, &fields).await?)
    }

    /// Drops the hash and recreates it holding only the marker, in one transaction.
    pub async fn clear(&self) -> Result<()> {
        let [marker, expire] = self.keep_alive_ops();
        let ops = [
            WriteOp::Unlink {
                key: self.key.clone(),
            },
            marker,
            expire,
        ];

        self.commit_unwatched(&ops).await?;
        tracing::debug!("Cleared {}", self.key);
        Ok(())
    }

    /// The WATCH/MULTI/EXEC loop shared by every conditional write.
    async fn read_modify_write<T, F>(&self, key: Option<&str>, mut decide: F) -> Result<T>
    where
        F: FnMut(Option<Value>) -> Step<T> + Send,
        T: Send,
    {
        let field = tokens::encode(key);
        let mut session = self.backend.session().await?;
        let mut attempts: u64 = 0;

        loop {
            attempts += 1;
            session.watch(&self.key).await?;
            let current = session.hget(&self.key, &field).await?.map(tokens::decode);

            let (ops, result) = match decide(current) {
                Step::Keep(result) => {
                    session.unwatch().await?;
                    return Ok(result);
                }
                Step::Write(value, result) => {
                    let [marker, expire] = self.keep_alive_ops();
                    let write = WriteOp::HSet {
                        key: self.key.clone(),
                        field: field.clone(),
                        value: tokens::encode(value.as_deref()),
                    };
                    (vec![write, marker, expire], result)
                }
                Step::Delete(result) => (
                    vec![WriteOp::HDel {
                        key: self.key.clone(),
                        field: field.clone(),
                    }],
                    result,
                ),
            };

            match session.exec(&ops).await? {
                Commit::Applied => {
                    if attempts > 1 {
                        tracing::trace!(
                            "Write to {}[{}] committed after {} attempts",
                            self.key,
                            field,
                            attempts
                        );
                    }
                    return Ok(result);
                }
                Commit::Aborted => {
                    tracing::trace!("Write to {}[{}] conflicted, retrying", self.key, field);
                }
            }
        }
    }
}
