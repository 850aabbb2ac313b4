//! Key and value views.
//!
//! Thin adapters over a [`ScanIterator`]; each one starts its own scan and
//! caches nothing beyond the batch the iterator is holding.

use crate::error::{MapError, Result};
use crate::fields::Value;
use crate::scan::ScanIterator;

pub struct Keys {
    inner: ScanIterator,
}

impl Keys {
    pub(crate) fn new(inner: ScanIterator) -> Self {
        Self { inner }
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next().await
    }

    pub async fn next(&mut self) -> Result<Value> {
        self.try_next().await?.ok_or(MapError::Exhausted)
    }

    pub async fn try_next(&mut self) -> Result<Option<Value>> {
        Ok(self.inner.try_next().await?.map(|(key, _)| key))
    }

    /// Removes the key last returned by `next` from the map.
    pub async fn remove(&mut self) -> Result<()> {
        self.inner.remove().await
    }

    pub async fn collect_remaining(&mut self) -> Result<Vec<Value>> {
        let mut keys = Vec::new();
        while let Some(key) = self.try_next().await? {
            keys.push(key);
        }
        Ok(keys)
    }
}

pub struct Values {
    inner: ScanIterator,
}

impl Values {
    pub(crate) fn new(inner: ScanIterator) -> Self {
        Self { inner }
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next().await
    }

    pub async fn next(&mut self) -> Result<Value> {
        self.try_next().await?.ok_or(MapError::Exhausted)
    }

    pub async fn try_next(&mut self) -> Result<Option<Value>> {
        Ok(self.inner.try_next().await?.map(|(_, value)| value))
    }

    /// Removes the entry whose value was last returned by `next`.
    pub async fn remove(&mut self) -> Result<()> {
        self.inner.remove().await
    }

    pub async fn collect_remaining(&mut self) -> Result<Vec<Value>> {
        let mut values = Vec::new();
        while let Some(value) = self.try_next().await? {
            values.push(value);
        }
        Ok(values)
    }
}
