//! Error Taxonomy
//!
//! [`MapError`] is the public error type of every map, registry, scan and lease
//! operation. Failures of the backing store itself are represented by
//! [`StoreError`] and propagated through `MapError::Store`.
//!
//! Optimistic-lock conflicts are absent from both enums: a rejected
//! commit is the internal retry trigger of the field protocol and never reaches
//! the caller.

use thiserror::Error;

/// Errors raised by the backing store or its connection pool.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis client reported a protocol, I/O or server error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// No pooled connection became available within the configured wait.
    #[error("connection pool exhausted after {wait_ms}ms")]
    PoolTimeout {
        /// Wait budget that elapsed.
        wait_ms: u128,
    },
    /// The pool itself could not be built or has been shut down.
    #[error("connection pool failure: {0}")]
    Pool(String),
    /// A hash command was issued against a key holding another type.
    #[error("WRONGTYPE operation against key '{key}' holding the wrong kind of value")]
    WrongType {
        /// Key that holds the unexpected type.
        key: String,
    },
    /// A counter command was issued against a value that is not an integer.
    #[error("value at '{key}' is not an integer")]
    NotAnInteger {
        /// Key holding the offending value.
        key: String,
    },
}

/// Errors produced by map handles and their collaborators.
#[derive(Debug, Error)]
pub enum MapError {
    /// Malformed id or key, or an existing value of the wrong type at the target key.
    #[error("{0}")]
    Validation(String),
    /// A required argument was absent where the contract forbids it.
    #[error("required argument '{0}' is null")]
    NullArgument(&'static str),
    /// The iterator has no more elements.
    #[error("iteration has no more elements")]
    Exhausted,
    /// `remove` was called without a preceding `next`, or twice for one element.
    #[error("remove called without a current element")]
    InvalidIteratorState,
    /// The configuration violates one of its invariants.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The backing store is unavailable; never retried by the core.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MapError {
    /// True for errors that reflect caller input rather than store availability.
    pub fn is_validation(&self) -> bool {
        matches!(self, MapError::Validation(_) | MapError::NullArgument(_))
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type Result<T> = std::result::Result<T, MapError>;
