//! Field Store Module
//!
//! Single-field operations on one backing hash under optimistic concurrency.
//!
//! ## Responsibilities
//! - **Encoding**: nullable keys and values cross into the store through reserved
//!   sentinel tokens (`tokens`).
//! - **Decisions**: what each operation writes given the field's current value,
//!   as pure functions (`rules`).
//! - **Commit protocol**: WATCH the hash, read the field, decide, then stage the
//!   write in MULTI/EXEC and start over if the hash changed (`store`). Writes
//!   re-assert the empty marker and the expiration in the same transaction.

pub mod rules;
pub mod store;
pub mod tokens;

pub use rules::Step;
pub use store::FieldStore;
pub use tokens::{EMPTY_FIELD_TOKEN, NULL_TOKEN};

/// A logically nullable key or value. `None` is stored as [`NULL_TOKEN`].
pub type Value = Option<String>;

#[cfg(test)]
mod tests;
