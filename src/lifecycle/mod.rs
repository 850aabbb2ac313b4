//! Lifecycle Module
//!
//! Keeps a backing hash alive for exactly as long as its in-process handle.
//!
//! ## Responsibilities
//! - **Renewal**: one periodic task per handle resets the hash's expiration to the
//!   configured TTL, recreating it with its empty marker if it expired anyway.
//! - **Teardown**: there is none. Dropping the handle aborts its renewal task and
//!   the hash disappears once its TTL elapses.

pub mod lease;

pub use lease::Lease;
