use std::time::Duration;

/// Cursor value that starts a scan and signals its completion.
pub const SCAN_START: u64 = 0;

/// Result of a `TYPE` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyType {
    /// No value is stored at the key.
    None,
    Hash,
    String,
    /// Any other Redis type (list, set, zset, stream, ...).
    Other(String),
}

impl KeyType {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "none" => KeyType::None,
            "hash" => KeyType::Hash,
            "string" => KeyType::String,
            other => KeyType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            KeyType::None => "none",
            KeyType::Hash => "hash",
            KeyType::String => "string",
            KeyType::Other(name) => name,
        }
    }
}

/// A mutation staged inside a MULTI/EXEC block.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Multi-field `HSET`; `pairs` must not be empty.
    HSetMany {
        key: String,
        pairs: Vec<(String, String)>,
    },
    HDel {
        key: String,
        field: String,
    },
    /// Non-blocking whole-key delete.
    Unlink { key: String },
    Del { key: String },
    /// Millisecond-precision expiration reset.
    Expire { key: String, ttl: Duration },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::HSet { key, .. }
            | WriteOp::HSetMany { key, .. }
            | WriteOp::HDel { key, .. }
            | WriteOp::Unlink { key }
            | WriteOp::Del { key }
            | WriteOp::Expire { key, .. } => key,
        }
    }
}

/// Outcome of an EXEC call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Every staged operation was applied atomically.
    Applied,
    /// A watched key changed after WATCH; nothing was applied.
    Aborted,
}

/// One HSCAN reply: the next cursor and a batch of raw field/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanPage {
    pub cursor: u64,
    pub entries: Vec<(String, String)>,
}

impl ScanPage {
    /// True when the cursor has returned to its initial value.
    pub fn is_last(&self) -> bool {
        self.cursor == SCAN_START
    }
}
