//! HTTP Gateway Module
//!
//! Exposes map handles over JSON/HTTP so processes without a native client can
//! share a hash. The gateway owns one [`MapClient`](crate::map::MapClient) and
//! keeps the handles it opened alive until they are released; a released
//! hash expires on its own once its TTL elapses.
//!
//! Field paths address non-null keys only.

pub mod gateway;
pub mod handlers;
pub mod protocol;

pub use gateway::{router, Gateway};
