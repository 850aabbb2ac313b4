use std::fmt;

/// Prefix shared by every backing hash key.
pub const KEY_PREFIX: &str = "redis-map";

/// Shared counter used to mint ids.
pub const COUNTER_KEY: &str = "redis-map-counter";

/// Identifier of one backing hash, rendered as `redis-map:<id>`.
///
/// Instances only come out of [`KeyRegistry`](super::KeyRegistry), so the id is
/// always within `1..=max_id` of the registry that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MapKey {
    id: u64,
}

impl MapKey {
    pub(crate) fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", KEY_PREFIX, self.id)
    }
}
