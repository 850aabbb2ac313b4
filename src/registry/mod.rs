//! Key Registry Module
//!
//! Mints and validates the identifiers of backing hashes.
//!
//! ## Responsibilities
//! - **Minting**: draws fresh ids from a shared counter in the store, wrapping
//!   around under a guarded reset once the counter passes `max_id`.
//! - **Validation**: checks caller-supplied ids and textual keys, and rejects
//!   keys that already hold a value of a non-hash type.

pub mod keys;
pub mod registry;

pub use keys::{MapKey, COUNTER_KEY, KEY_PREFIX};
pub use registry::KeyRegistry;

#[cfg(test)]
mod tests;
