//! Shared Redis-Backed Maps
//!
//! This library crate provides string maps whose contents live in a Redis hash
//! and can be used concurrently by many handles, in one process or many. It
//! serves as the foundation for the gateway binary (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of loosely coupled subsystems, leaves first:
//!
//! - **`store`**: The backing store seam. A bb8-pooled Redis backend and an
//!   in-process emulation behind the same `Backend`/`Session` traits.
//! - **`registry`**: Mints handle ids from a shared counter and validates
//!   caller-supplied ids and keys.
//! - **`lifecycle`**: One periodic lease renewal task per handle. When renewal
//!   stops, the hash expires; there is no other teardown.
//! - **`fields`**: Single-field operations under WATCH/MULTI/EXEC with unbounded
//!   optimistic retries, and the null sentinel encoding.
//! - **`scan`**: Weakly consistent HSCAN iteration that tolerates concurrent
//!   resizing and never returns a field twice.
//! - **`map`**: `MapClient` and the `RedisMap` handle composing the above.
//! - **`server`**: An axum gateway exposing handles over HTTP.
//!
//! Ambient pieces: `config` (defaults, environment overrides, validation) and
//! `error` (the `MapError`/`StoreError` taxonomy).

pub mod config;
pub mod error;
pub mod fields;
pub mod lifecycle;
pub mod map;
pub mod registry;
pub mod scan;
pub mod server;
pub mod store;

pub use config::{MapConfig, PoolConfig};
pub use error::{MapError, Result, StoreError};
pub use map::{MapClient, RedisMap};
