use crate::error::{MapError, Result};
use crate::fields::tokens;
use crate::fields::Value;
use crate::store::{Backend, SCAN_START};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// One decoded field/value pair.
pub type Entry = (Value, Value);

/// Pull-based `HSCAN` cursor over one backing hash.
///
/// One batch is buffered at a time and the next one is only requested once the
/// buffer drains. Every field already handed out is remembered, because a scan
/// that spans a shrink followed by a regrow can resurface fields.
pub struct ScanIterator {
    /// Store holding the scanned hash; one session is borrowed per batch.
    backend: Arc<dyn Backend>,
    /// Hash being scanned.
    key: String,
    /// `COUNT` hint passed to every `HSCAN`.
    batch_size: usize,
    /// Cursor for the next `HSCAN` call.
    cursor: u64,
    /// Set once the server returned cursor 0.
    exhausted: bool,
    /// Raw pairs of the current batch not yet handed out.
    buffer: VecDeque<(String, String)>,
    /// Raw fields already handed out or buffered.
    seen: HashSet<String>,
    /// Raw field of the last element returned by `next`, cleared by `remove`.
    current: Option<String>,
}

impl ScanIterator {
    pub fn new(backend: Arc<dyn Backend>, key: impl Into<String>, batch_size: usize) -> Self {
        Self {
            backend,
            key: key.into(),
            batch_size,
            cursor: SCAN_START,
            exhausted: false,
            buffer: VecDeque::new(),
            seen: HashSet::new(),
            current: None,
        }
    }

    /// True if `next` will return an element. May fetch batches.
    pub async fn has_next(&mut self) -> Result<bool> {
        while self.buffer.is_empty() {
            if self.exhausted {
                return Ok(false);
            }
            self.fetch().await?;
        }
        Ok(true)
    }

    /// Returns the next entry or fails with `Exhausted`.
    pub async fn next(&mut self) -> Result<Entry> {
        self.try_next().await?.ok_or(MapError::Exhausted)
    }

    /// Returns the next entry, or `None` once the scan is complete.
    pub async fn try_next(&mut self) -> Result<Option<Entry>> {
        if !self.has_next().await? {
            return Ok(None);
        }
        let (field, value) = match self.buffer.pop_front() {
            Some(pair) => pair,
            None => return Ok(None),
        };
        self.current = Some(field.clone());
        Ok(Some((tokens::decode(field), tokens::decode(value))))
    }

    /// Deletes the field last returned by `next` with a plain `HDEL`.
    pub async fn remove(&mut self) -> Result<()> {
        let field = self.current.take().ok_or(MapError::InvalidIteratorState)?;
        let mut session = self.backend.session().await?;
        session.hdel(&self.key, &[field]).await?;
        Ok(())
    }

    /// Drains the remaining entries.
    pub async fn collect_remaining(&mut self) -> Result<Vec<Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.try_next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn fetch(&mut self) -> Result<()> {
        let page = {
            let mut session = self.backend.session().await?;
            session
                .hscan(&self.key, self.cursor, self.batch_size)
                .await?
        };

        self.cursor = page.cursor;
        if page.is_last() {
            self.exhausted = true;
        }

        let fetched = page.entries.len();
        for (field, value) in page.entries {
            if tokens::is_marker(&field) || self.seen.contains(&field) {
                continue;
            }
            self.seen.insert(field.clone());
            self.buffer.push_back((field, value));
        }

        tracing::debug!(
            "Scanned {} fields of {} ({} new, cursor {})",
            fetched,
            self.key,
            self.buffer.len(),
            self.cursor
        );
        Ok(())
    }
}
