//! Identifier Minting and Validation
//!
//! Ids come from an `INCR` on [`COUNTER_KEY`]. When the counter passes
//! `max_id` it is deleted and minting starts over from 1; the delete happens
//! under WATCH so that two clients racing past the bound do not both reset it
//! (the second reset would hand out ids the first one just minted).
//!
//! A minted id whose key already exists is skipped. This happens when a caller
//! attached to an explicit id that the counter had not reached yet.

use super::keys::{MapKey, COUNTER_KEY, KEY_PREFIX};
use crate::config::MapConfig;
use crate::error::{MapError, Result};
use crate::store::{Backend, Commit, KeyType, Session, WriteOp};

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

pub struct KeyRegistry {
    /// Store holding the counter and the hashes whose types are checked.
    backend: Arc<dyn Backend>,
    /// Largest id handed out or accepted.
    max_id: u64,
    /// Expiration reset on the counter after every mint.
    counter_ttl: Duration,
    /// Anchored `redis-map:<ascii digits>` matcher.
    pattern: Regex,
}

impl KeyRegistry {
    pub fn new(backend: Arc<dyn Backend>, config: &MapConfig) -> Result<Self> {
        let pattern = Regex::new(&format!(r"^{}:([0-9]+)$", regex::escape(KEY_PREFIX)))
            .map_err(|e| MapError::Config(format!("key pattern: {}", e)))?;

        Ok(Self {
            backend,
            max_id: config.max_id,
            counter_ttl: config.counter_ttl,
            pattern,
        })
    }

    pub fn max_id(&self) -> u64 {
        self.max_id
    }

    /// Returns an id that no existing hash uses.
    ///
    /// The counter's expiration is reset to `counter_ttl` after every mint, so an
    /// idle deployment eventually forgets it and starts over from 1.
    pub async fn mint(&self) -> Result<MapKey> {
        let mut session = self.backend.session().await?;

        loop {
            let next = session.incr(COUNTER_KEY).await?;
            if next <= 0 || next as u64 > self.max_id {
                tracing::debug!("Counter reached {}, resetting", next);
                self.reset_counter(session.as_mut()).await?;
                continue;
            }

            let key = MapKey::new(next as u64);
            if session.exists(&key.to_string()).await? {
                tracing::debug!("Minted id {} is already taken, skipping", next);
                continue;
            }

            session.expire(COUNTER_KEY, self.counter_ttl).await?;
            tracing::debug!("Minted {}", key);
            return Ok(key);
        }
    }

    /// Deletes the counter if it is still above `max_id`.
    async fn reset_counter(&self, session: &mut dyn Session) -> Result<()> {
        loop {
            session.watch(COUNTER_KEY).await?;

            let current = match session.get(COUNTER_KEY).await? {
                Some(raw) => raw.parse::<i64>().unwrap_or(i64::MAX),
                None => 0,
            };

            if current <= 0 || (current as u64) <= self.max_id {
                // Someone else already reset it.
                session.unwatch().await?;
                return Ok(());
            }

            let ops = [WriteOp::Del {
                key: COUNTER_KEY.to_string(),
            }];
            match session.exec(&ops).await? {
                Commit::Applied => {
                    tracing::info!("Id counter wrapped around after {}", self.max_id);
                    return Ok(());
                }
                Commit::Aborted => {
                    tracing::trace!("Counter reset raced with another client, retrying");
                }
            }
        }
    }

    /// Checks that `id` lies in `1..=max_id`.
    pub fn validate_id(&self, id: i64) -> Result<MapKey> {
        if id <= 0 || id as u64 > self.max_id {
            return Err(MapError::Validation(format!(
                "map id {} is outside 1..={}",
                id, self.max_id
            )));
        }
        Ok(MapKey::new(id as u64))
    }

    /// Parses `redis-map:<id>`, ignoring surrounding whitespace.
    ///
    /// Only the canonical spelling is accepted: `redis-map:007` names a different
    /// hash than `redis-map:7`, and handles always address the latter.
    pub fn parse_key(&self, raw: &str) -> Result<MapKey> {
        let trimmed = raw.trim();
        let digits = self
            .pattern
            .captures(trimmed)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| {
                MapError::Validation(format!(
                    "'{}' does not match {}:<id>",
                    trimmed, KEY_PREFIX
                ))
            })?;

        // Digit runs too long for i64 are out of range by definition.
        let id = digits.as_str().parse::<i64>().unwrap_or(i64::MAX);
        let key = self.validate_id(id)?;
        if key.to_string() != trimmed {
            return Err(MapError::Validation(format!(
                "'{}' is not in canonical form, expected '{}'",
                trimmed, key
            )));
        }
        Ok(key)
    }

    /// Validates an id and the type of any value already stored under it.
    pub async fn validate_existing_id(&self, id: i64) -> Result<MapKey> {
        let key = self.validate_id(id)?;
        self.check_type(&key).await?;
        Ok(key)
    }

    /// Validates a textual key and the type of any value already stored under it.
    pub async fn validate_key(&self, raw: &str) -> Result<MapKey> {
        let key = self.parse_key(raw)?;
        self.check_type(&key).await?;
        Ok(key)
    }

    async fn check_type(&self, key: &MapKey) -> Result<()> {
        let mut session = self.backend.session().await?;
        match session.key_type(&key.to_string()).await? {
            KeyType::None | KeyType::Hash => Ok(()),
            other => Err(MapError::Validation(format!(
                "key {} holds a {}, expected a hash",
                key,
                other.as_str()
            ))),
        }
    }
}
