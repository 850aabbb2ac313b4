//! Map Module
//!
//! The public face of the crate: a [`MapClient`] that opens handles, and the
//! [`RedisMap`] handle exposing the associative-map contract over one backing
//! hash.
//!
//! ## Responsibilities
//! - **Construction**: fresh handles from the registry, or attachment to an
//!   existing id or key. Attaching is idempotent and creates the hash if absent.
//! - **Lifetime**: each handle owns a [`Lease`](crate::lifecycle::Lease); dropping
//!   the handle stops renewal and the hash expires on its own.
//! - **Views**: keys, values and entries are live adapters over a fresh scan.

pub mod client;
pub mod handle;
pub mod views;

pub use client::MapClient;
pub use handle::RedisMap;
pub use views::{Keys, Values};
