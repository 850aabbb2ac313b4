//! Backing Store Module
//!
//! The remote hash store every map handle is built on, reduced to the
//! primitives the map protocols consume: point field access, field counts,
//! cursor scans, WATCH + MULTI/EXEC, expiration, type introspection and an
//! atomic counter.
//!
//! ## Implementations
//! - **`redis`**: a bb8-pooled Redis client, the production backend.
//! - **`memory`**: an in-process emulation with the same observable semantics,
//!   used for tests and for running the gateway without a server.

pub mod backend;
pub mod memory;
pub mod redis;
pub mod types;

pub use backend::{Backend, Session};
pub use memory::MemoryBackend;
pub use self::redis::RedisBackend;
pub use types::{Commit, KeyType, ScanPage, WriteOp, SCAN_START};
