//! Scan Module
//!
//! Weakly consistent traversal of a backing hash that other handles may be
//! growing, shrinking or clearing at the same time.
//!
//! ## Guarantees
//! - A field present for the whole iteration is returned exactly once.
//! - A field added or removed during the iteration may or may not be returned,
//!   but never twice.
//!
//! This is weaker than a snapshot: values are whatever the batch that carried
//! them saw, and no lock is held between batches.

pub mod iterator;

pub use iterator::{Entry, ScanIterator};
